use filesaga_executor::StepError;
use filesaga_journal::JournalError;
use thiserror::Error;

/// Error from a failed compensation.
#[derive(Debug, Error)]
#[error("compensation failed for step {step}: {description}")]
pub struct CompensationError {
    /// Index of the forward step being compensated.
    pub step: usize,
    /// What the compensation was trying to do.
    pub description: String,
    #[source]
    pub error: StepError,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("failed to open the journal")]
    Journal(#[from] JournalError),
}
