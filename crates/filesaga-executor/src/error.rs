use std::path::PathBuf;
use std::time::Duration;

use filesaga_core::ErrorKind;
use filesaga_journal::JournalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("destination '{path}' already exists")]
    DestinationConflict { path: PathBuf },

    #[error("'{path}' does not exist")]
    SourceMissing { path: PathBuf },

    #[error("failed to {action} '{path}'")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The copy reached the destination but the source is still in place.
    #[error("cross-device move left '{path}' in place: {action} failed")]
    CrossDevice {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The change is on disk but its directory entry was not synced.
    #[error("'{path}' changed but could not be made durable")]
    Unsynced {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{path}' is not a regular file")]
    NotARegularFile { path: PathBuf },

    #[error("step timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("'{path}' was deleted and cannot be restored")]
    Irreversible { path: PathBuf },

    #[error("journal write failed")]
    Journal {
        /// The filesystem effect happened but was not recorded.
        in_doubt: bool,
        #[source]
        source: JournalError,
    },

    #[error("filesystem task failed: {0}")]
    Task(String),
}

impl StepError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DestinationConflict { .. } => ErrorKind::DestinationConflict,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Journal { .. } => ErrorKind::JournalWrite,
            Self::SourceMissing { .. }
            | Self::Io { .. }
            | Self::CrossDevice { .. }
            | Self::Unsynced { .. }
            | Self::NotARegularFile { .. }
            | Self::Irreversible { .. }
            | Self::Task(_) => ErrorKind::Io,
        }
    }

    /// Whether the filesystem may hold some or all of the step's effect.
    #[must_use]
    pub fn is_in_doubt(&self) -> bool {
        match self {
            Self::Timeout(_)
            | Self::CrossDevice { .. }
            | Self::Unsynced { .. }
            | Self::Task(_) => true,
            Self::Journal { in_doubt, .. } => *in_doubt,
            _ => false,
        }
    }

    /// Message including the source chain, for journal details and reports.
    #[must_use]
    pub fn detailed(&self) -> String {
        let mut text = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_destination_conflict_kind() {
        let err = StepError::DestinationConflict {
            path: PathBuf::from("/folder/b.txt"),
        };

        assert_eq!(err.kind(), ErrorKind::DestinationConflict);
        assert!(!err.is_in_doubt());
        assert!(err.to_string().contains("/folder/b.txt"));
    }

    #[test]
    fn timeout_is_in_doubt() {
        let err = StepError::Timeout(Duration::from_millis(250));

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_in_doubt());
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn journal_error_is_in_doubt_only_after_effect() {
        let before = StepError::Journal {
            in_doubt: false,
            source: JournalError::Task("gone".to_string()),
        };
        let after = StepError::Journal {
            in_doubt: true,
            source: JournalError::Task("gone".to_string()),
        };

        assert_eq!(before.kind(), ErrorKind::JournalWrite);
        assert!(!before.is_in_doubt());
        assert!(after.is_in_doubt());
    }

    #[test]
    fn unsynced_change_is_in_doubt() {
        let err = StepError::Unsynced {
            path: PathBuf::from("/folder"),
            source: std::io::Error::other("fsync failed"),
        };

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.is_in_doubt());
        assert!(err.detailed().contains("fsync failed"));
    }

    #[test]
    fn plain_io_error_is_not_in_doubt() {
        let err = StepError::io("rename", "/x", std::io::Error::other("busy"));

        assert!(!err.is_in_doubt());
    }

    #[test]
    fn detailed_includes_source_chain() {
        let err = StepError::io(
            "remove",
            "/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
        );

        let text = err.detailed();

        assert!(text.contains("failed to remove '/x'"));
        assert!(text.contains("permission denied"));
    }
}
