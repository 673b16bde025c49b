use std::sync::Arc;

use filesaga_core::EngineConfig;
use filesaga_executor::FileSystemStepExecutor;
use filesaga_journal::FileSystemJournalStore;
use tracing::debug;

use crate::coordinator::SagaCoordinator;
use crate::error::EngineError;
use crate::notify::{PathIndex, UndoHistory};
use crate::recovery::{RecoveryReport, RecoveryRunner};

/// The assembled engine: journal, executor and coordinator.
///
/// Opening an engine recovers interrupted transactions before any new
/// batch can run.
pub struct Engine {
    config: EngineConfig,
    journal: Arc<FileSystemJournalStore>,
    coordinator: SagaCoordinator,
}

impl Engine {
    /// Opens the journal, runs recovery, and returns the engine with the
    /// recovery report.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be opened (including when another process
    /// holds it) or listed.
    pub async fn open(config: EngineConfig) -> Result<(Self, RecoveryReport), EngineError> {
        let journal = Arc::new(FileSystemJournalStore::open(config.journal_dir())?);
        let executor = Arc::new(FileSystemStepExecutor::from_config(&config));

        let report = RecoveryRunner::new(journal.clone(), executor.clone())
            .with_retention(config.retention())
            .run()
            .await?;
        debug!(
            recovered = report.recovered.len(),
            pruned = report.pruned,
            "engine ready"
        );

        let coordinator = SagaCoordinator::new(journal.clone(), executor)
            .with_max_batch_size(config.max_batch_size());

        Ok((
            Self {
                config,
                journal,
                coordinator,
            },
            report,
        ))
    }

    /// Tells `index` about every committed or rolled-back path change.
    #[must_use]
    pub fn with_path_index(mut self, index: Arc<dyn PathIndex>) -> Self {
        self.coordinator = self.coordinator.with_path_index(index);
        self
    }

    /// Records each committed batch in `history`.
    #[must_use]
    pub fn with_undo_history(mut self, history: Arc<dyn UndoHistory>) -> Self {
        self.coordinator = self.coordinator.with_undo_history(history);
        self
    }

    /// Coordinator for running batches.
    #[must_use]
    pub fn coordinator(&self) -> &SagaCoordinator {
        &self.coordinator
    }

    /// Journal backing this engine, for listing and pruning entries.
    #[must_use]
    pub fn journal(&self) -> &FileSystemJournalStore {
        &self.journal
    }

    /// Settings the engine was opened with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
