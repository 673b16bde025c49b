use std::path::PathBuf;

use filesaga_core::{ConfigError, TransactionId};
use filesaga_journal::JournalError;
use filesaga_saga::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to load configuration")]
    Config(#[from] ConfigError),

    #[error("failed to start the engine")]
    Engine(#[from] EngineError),

    #[error("journal error")]
    Journal(#[from] JournalError),

    #[error("failed to read batch file '{path}'")]
    ReadBatch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch file '{path}' is not valid JSON")]
    ParseBatch {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("'{value}' is not a transaction id")]
    InvalidTransactionId {
        value: String,
        #[source]
        source: uuid::Error,
    },

    #[error("no journal entry for transaction {0}")]
    NotFound(TransactionId),

    #[error("failed to render output")]
    Render(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
