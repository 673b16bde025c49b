//! Collaborators told about committed batches.
//!
//! Both hooks are best effort: a failure is logged and never undoes a
//! commit.

use std::path::PathBuf;

use async_trait::async_trait;
use filesaga_core::{FileOperation, OperationKind, TransactionId};
use serde::Serialize;

pub type NotifyError = Box<dyn std::error::Error + Send + Sync>;

/// Where a file went in a committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathUpdate {
    pub kind: OperationKind,
    pub old_path: PathBuf,
    /// `None` for deletions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_path: Option<PathBuf>,
}

impl From<&FileOperation> for PathUpdate {
    fn from(operation: &FileOperation) -> Self {
        Self {
            kind: operation.kind(),
            old_path: operation.source().to_path_buf(),
            new_path: operation.destination().map(PathBuf::from),
        }
    }
}

/// A search index keyed by path.
#[async_trait]
pub trait PathIndex: Send + Sync {
    /// # Errors
    ///
    /// Any failure; the caller only logs it.
    async fn update_paths(&self, updates: &[PathUpdate]) -> Result<(), NotifyError>;
}

/// User-facing undo history.
#[async_trait]
pub trait UndoHistory: Send + Sync {
    /// # Errors
    ///
    /// Any failure; the caller only logs it.
    async fn record_batch(
        &self,
        transaction: TransactionId,
        updates: &[PathUpdate],
    ) -> Result<(), NotifyError>;
}

pub(crate) fn path_updates(operations: &[FileOperation]) -> Vec<PathUpdate> {
    operations.iter().map(PathUpdate::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_has_no_new_path() {
        let updates = path_updates(&[
            FileOperation::Move {
                source: PathBuf::from("/a"),
                destination: PathBuf::from("/b"),
            },
            FileOperation::Delete {
                source: PathBuf::from("/c"),
            },
        ]);

        assert_eq!(updates[0].new_path, Some(PathBuf::from("/b")));
        assert_eq!(updates[1].kind, OperationKind::Delete);
        assert_eq!(updates[1].new_path, None);
    }
}
