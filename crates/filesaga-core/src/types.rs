use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Executing,
    Committed,
    RollingBack,
    RolledBack,
    PartiallyRolledBack,
}

impl TransactionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Committed | Self::RolledBack | Self::PartiallyRolledBack
        )
    }

    /// `Pending -> RolledBack` is only taken by recovery for an entry that
    /// never reached `Executing`, i.e. nothing was mutated.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing | Self::RolledBack)
                | (Self::Executing, Self::Committed | Self::RollingBack)
                | (
                    Self::RollingBack,
                    Self::RolledBack | Self::PartiallyRolledBack
                )
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Committed => "committed",
            Self::RollingBack => "rolling back",
            Self::RolledBack => "rolled back",
            Self::PartiallyRolledBack => "partially rolled back",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Applied,
    Failed,
    Reverted,
}

impl StepStatus {
    /// Steps only move forward: `Pending -> Applied -> Reverted` or
    /// `Pending -> Failed`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Applied | Self::Failed) | (Self::Applied, Self::Reverted)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Reverted => "reverted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Move,
    Copy,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// A validated filesystem mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileOperation {
    Move {
        source: PathBuf,
        destination: PathBuf,
    },
    Copy {
        source: PathBuf,
        destination: PathBuf,
    },
    Delete {
        source: PathBuf,
    },
}

impl FileOperation {
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Move { .. } => OperationKind::Move,
            Self::Copy { .. } => OperationKind::Copy,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }

    #[must_use]
    pub fn source(&self) -> &Path {
        match self {
            Self::Move { source, .. } | Self::Copy { source, .. } | Self::Delete { source } => {
                source
            }
        }
    }

    #[must_use]
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Self::Move { destination, .. } | Self::Copy { destination, .. } => Some(destination),
            Self::Delete { .. } => None,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Move {
                source,
                destination,
            } => format!("move {} -> {}", source.display(), destination.display()),
            Self::Copy {
                source,
                destination,
            } => format!("copy {} -> {}", source.display(), destination.display()),
            Self::Delete { source } => format!("delete {}", source.display()),
        }
    }
}

/// Durable progress marker inside a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCheckpoint {
    /// Cross-device move: the destination copy is complete, the source has
    /// not been removed yet.
    CopyCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub operation: FileOperation,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<StepCheckpoint>,
    /// The forward effect may or may not have reached the filesystem.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub in_doubt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Step {
    #[must_use]
    pub fn pending(operation: FileOperation) -> Self {
        Self {
            operation,
            status: StepStatus::Pending,
            checkpoint: None,
            in_doubt: false,
            details: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    #[must_use]
    pub fn new(operations: Vec<FileOperation>) -> Self {
        Self {
            id: TransactionId::new(),
            status: TransactionStatus::Pending,
            steps: operations.into_iter().map(Step::pending).collect(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Index of the step that was in flight when the journal stopped
    /// hearing back: the first step after the applied prefix, if it is
    /// still pending.
    ///
    /// Steps run strictly in order, so only that step can have an unknown
    /// outcome. Steps after a recorded failure were never attempted.
    #[must_use]
    pub fn unrecorded_step(&self) -> Option<usize> {
        let index = self.steps.iter().position(|s| {
            !matches!(s.status, StepStatus::Applied | StepStatus::Reverted)
        })?;
        (self.steps[index].status == StepStatus::Pending).then_some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(from: &str, to: &str) -> FileOperation {
        FileOperation::Move {
            source: PathBuf::from(from),
            destination: PathBuf::from(to),
        }
    }

    #[test]
    fn transaction_id_roundtrips_through_display() -> anyhow::Result<()> {
        let id = TransactionId::new();

        let parsed: TransactionId = id.to_string().parse()?;

        assert_eq!(parsed, id);
        Ok(())
    }

    #[test]
    fn transaction_ids_are_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TransactionStatus::Committed.is_terminal());
        assert!(TransactionStatus::RolledBack.is_terminal());
        assert!(TransactionStatus::PartiallyRolledBack.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::Executing.is_terminal());
        assert!(!TransactionStatus::RollingBack.is_terminal());
    }

    #[test]
    fn transaction_status_follows_state_machine() {
        use TransactionStatus::{
            Committed, Executing, PartiallyRolledBack, Pending, RolledBack, RollingBack,
        };

        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Committed));
        assert!(Executing.can_transition_to(RollingBack));
        assert!(RollingBack.can_transition_to(RolledBack));
        assert!(RollingBack.can_transition_to(PartiallyRolledBack));

        assert!(!Pending.can_transition_to(Committed));
        assert!(!Executing.can_transition_to(RolledBack));
        assert!(!Committed.can_transition_to(RollingBack));
        assert!(!RolledBack.can_transition_to(Executing));
    }

    #[test]
    fn step_status_only_moves_forward() {
        use StepStatus::{Applied, Failed, Pending, Reverted};

        assert!(Pending.can_transition_to(Applied));
        assert!(Pending.can_transition_to(Failed));
        assert!(Applied.can_transition_to(Reverted));

        assert!(!Pending.can_transition_to(Reverted));
        assert!(!Applied.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Applied));
        assert!(!Reverted.can_transition_to(Applied));
        assert!(!Applied.can_transition_to(Applied));
    }

    #[test]
    fn new_transaction_has_only_pending_steps() {
        let txn = Transaction::new(vec![mv("a", "b"), mv("c", "d")]);

        assert_eq!(txn.status, TransactionStatus::Pending);
        assert!(txn.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(txn.completed_at.is_none());
    }

    #[test]
    fn unrecorded_step_is_first_pending_after_prefix() {
        let mut txn = Transaction::new(vec![mv("a", "b"), mv("c", "d"), mv("e", "f")]);
        txn.steps[0].status = StepStatus::Applied;

        assert_eq!(txn.unrecorded_step(), Some(1));
    }

    #[test]
    fn unrecorded_step_is_none_when_failure_was_recorded() {
        let mut txn = Transaction::new(vec![mv("a", "b"), mv("c", "d"), mv("e", "f")]);
        txn.steps[0].status = StepStatus::Applied;
        txn.steps[1].status = StepStatus::Failed;

        assert_eq!(txn.unrecorded_step(), None);
    }

    #[test]
    fn unrecorded_step_survives_partial_rollback() {
        let mut txn = Transaction::new(vec![mv("a", "b"), mv("c", "d"), mv("e", "f")]);
        txn.steps[0].status = StepStatus::Reverted;
        txn.steps[1].status = StepStatus::Applied;

        assert_eq!(txn.unrecorded_step(), Some(2));
    }

    #[test]
    fn file_operation_serializes_with_type_tag() -> anyhow::Result<()> {
        let op = FileOperation::Delete {
            source: PathBuf::from("/tmp/x"),
        };

        let json = serde_json::to_value(&op)?;

        assert_eq!(json["type"], "delete");
        assert_eq!(json["source"], "/tmp/x");
        Ok(())
    }

    #[test]
    fn delete_has_no_destination() {
        let delete = FileOperation::Delete {
            source: PathBuf::from("x"),
        };

        assert_eq!(delete.destination(), None);
        assert_eq!(mv("a", "b").destination(), Some(Path::new("b")));
    }
}
