use std::path::{Path, PathBuf};

use filesaga_core::{FileOperation, StepCheckpoint};

/// What has to happen to put one step's files back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Undo a step recorded as applied.
    Undo { step: usize, operation: FileOperation },

    /// Restore the pre-step state of a step whose outcome is unknown,
    /// touching only files that are provably the step's own output.
    Reconcile {
        step: usize,
        operation: FileOperation,
        checkpoint: Option<StepCheckpoint>,
        /// The journal still holds the step as pending.
        unrecorded: bool,
    },

    /// An applied delete. Nothing can bring the file back.
    Irreversible { step: usize, path: PathBuf },
}

impl Compensation {
    #[must_use]
    pub fn step(&self) -> usize {
        match self {
            Self::Undo { step, .. } | Self::Reconcile { step, .. } | Self::Irreversible { step, .. } => {
                *step
            }
        }
    }

    /// Where the step's file lived before the batch.
    #[must_use]
    pub fn original_path(&self) -> &Path {
        match self {
            Self::Undo { operation, .. } | Self::Reconcile { operation, .. } => operation.source(),
            Self::Irreversible { path, .. } => path,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Undo {
                operation:
                    FileOperation::Move {
                        source,
                        destination,
                    },
                ..
            } => format!("move {} -> {}", destination.display(), source.display()),
            Self::Undo {
                operation: FileOperation::Copy { destination, .. },
                ..
            } => format!("remove copy {}", destination.display()),
            Self::Undo {
                operation: FileOperation::Delete { source },
                ..
            }
            | Self::Irreversible { path: source, .. } => {
                format!("restore deleted {}", source.display())
            }
            Self::Reconcile { operation, .. } => format!("reconcile {}", operation.describe()),
        }
    }
}

/// How a compensation left the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertEffect {
    /// The file was moved back to its original path.
    Restored,
    /// The file was already at its original path.
    AlreadyRestored,
    /// A copy made by the step was removed.
    CopyRemoved,
    /// Both the original and an identical copy existed; the copy was removed.
    DuplicateRemoved,
    /// Nothing could be attributed to the step, so nothing was touched.
    Untouched,
}
