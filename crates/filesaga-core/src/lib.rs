//! Core types for transactional batch file operations.
//!
//! A batch of [`FileOperation`]s becomes a [`Transaction`] whose [`Step`]s
//! are journaled, applied in order, and compensated in reverse on failure.

pub mod batch;
pub mod config;
pub mod error;
pub mod outcome;
pub mod types;

pub use batch::{DEFAULT_MAX_BATCH_SIZE, OperationRequest, validate_batch, validate_batch_value};
pub use config::{EngineConfig, default_config_path, default_journal_dir};
pub use error::{ConfigError, ValidationError};
pub use outcome::{
    BatchError, BatchOutcome, CommittedBatch, ErrorKind, FailedBatch, RejectedBatch,
    RollbackResult, StepReport, UnrevertedStep,
};
pub use types::{
    FileOperation, OperationKind, Step, StepCheckpoint, StepStatus, Transaction, TransactionId,
    TransactionStatus,
};
