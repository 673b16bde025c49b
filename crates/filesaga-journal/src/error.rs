use std::path::PathBuf;

use filesaga_core::{StepStatus, TransactionId, TransactionStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to create journal directory '{path}'")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal at '{path}' is in use by another process")]
    Locked {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read journal entry '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write journal entry '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse journal entry '{path}'")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize journal entry for transaction {id}")]
    Serialize {
        id: TransactionId,
        #[source]
        source: serde_json::Error,
    },

    #[error("journal entry '{path}' has format version {version}, newer than supported")]
    UnsupportedFormat { path: PathBuf, version: u32 },

    #[error("no journal entry for transaction {0}")]
    NotFound(TransactionId),

    #[error("journal entry for transaction {0} already exists")]
    AlreadyExists(TransactionId),

    #[error("transaction {0} must begin with every step pending")]
    NotPending(TransactionId),

    #[error("transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("step {index} of transaction {id} cannot move from {from} to {to}")]
    InvalidStepTransition {
        id: TransactionId,
        index: usize,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("transaction {id} has {len} steps, step {index} does not exist")]
    StepOutOfRange {
        id: TransactionId,
        index: usize,
        len: usize,
    },

    #[error("transaction {id} is {status}, not terminal")]
    NotTerminal {
        id: TransactionId,
        status: TransactionStatus,
    },

    #[error("journal task failed: {0}")]
    Task(String),

    #[cfg(any(test, feature = "testing"))]
    #[error("injected journal write failure")]
    Injected,
}
