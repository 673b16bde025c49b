use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{OperationKind, TransactionId, TransactionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    DestinationConflict,
    Io,
    JournalWrite,
    Timeout,
    PartialRollback,
    Cancelled,
}

/// Error as it appears in a batch outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BatchError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ValidationError> for BatchError {
    fn from(err: &ValidationError) -> Self {
        Self::new(ErrorKind::Validation, err.to_string())
    }
}

/// Forward result of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub index: usize,
    pub kind: OperationKind,
    pub source: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchError>,
}

/// Result of one compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub success: bool,
    /// Index of the forward step being compensated.
    pub step: usize,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A step whose files could not be put back where they were.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrevertedStep {
    pub step: usize,
    pub kind: OperationKind,
    pub original_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_path: Option<PathBuf>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedBatch {
    pub success: bool,
    pub transaction_id: TransactionId,
    pub results: Vec<StepReport>,
    pub success_count: usize,
    pub fail_count: usize,
}

impl CommittedBatch {
    #[must_use]
    pub fn new(transaction_id: TransactionId, results: Vec<StepReport>) -> Self {
        let success_count = results.len();
        Self {
            success: true,
            transaction_id,
            results,
            success_count,
            fail_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedBatch {
    pub success: bool,
    pub error: BatchError,
    pub transaction_id: TransactionId,
    pub rolled_back: bool,
    /// One entry per applied step, in the order they were compensated.
    pub rollback_results: Vec<RollbackResult>,
    /// Steps whose forward outcome was unknown, checked and cleaned up
    /// before the undo.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reconciled: Vec<RollbackResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    pub results: Vec<StepReport>,
    pub final_status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreverted: Vec<UnrevertedStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permanent_effects: Vec<PathBuf>,
}

impl FailedBatch {
    /// Steps that reached the filesystem before the failure.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Applied steps whose compensation succeeded.
    #[must_use]
    pub fn reverted_count(&self) -> usize {
        self.rollback_results.iter().filter(|r| r.success).count()
    }

    /// Some files were not put back.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.final_status == TransactionStatus::PartiallyRolledBack
    }

    /// Text shown to the user after a failed batch.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{}; rolled back {} of {} operations",
            self.error.message,
            self.reverted_count(),
            self.applied_count()
        );

        if !self.unreverted.is_empty() || !self.permanent_effects.is_empty() {
            text.push_str("\nverify these files manually:");
            for step in &self.unreverted {
                match &step.current_path {
                    Some(current) => {
                        let _ = write!(
                            text,
                            "\n  {} (now at {})",
                            step.original_path.display(),
                            current.display()
                        );
                    }
                    None => {
                        let _ = write!(text, "\n  {}", step.original_path.display());
                    }
                }
            }
            for path in &self.permanent_effects {
                let _ = write!(text, "\n  {} (deleted)", path.display());
            }
        }

        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedBatch {
    pub success: bool,
    pub error: BatchError,
}

impl RejectedBatch {
    #[must_use]
    pub fn new(error: BatchError) -> Self {
        Self {
            success: false,
            error,
        }
    }
}

/// Structured result of executing a batch; errors never escape as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Committed(CommittedBatch),
    Failed(FailedBatch),
    Rejected(RejectedBatch),
}

impl BatchOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    #[must_use]
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            Self::Committed(batch) => Some(batch.transaction_id),
            Self::Failed(batch) => Some(batch.transaction_id),
            Self::Rejected(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&BatchError> {
        match self {
            Self::Committed(_) => None,
            Self::Failed(batch) => Some(&batch.error),
            Self::Rejected(batch) => Some(&batch.error),
        }
    }
}
