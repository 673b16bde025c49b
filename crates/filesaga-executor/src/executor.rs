use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use filesaga_core::{EngineConfig, FileOperation, StepCheckpoint};
use filesaga_journal::{StepCursor, StepUpdate};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::compensation::{Compensation, RevertEffect};
use crate::error::StepError;
use crate::fs_ops::{self, Abort, Renamed};

/// How a forward step reached the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedEffect {
    Renamed,
    /// Copied to another filesystem, then the source was removed.
    MovedAcrossDevices,
    Copied,
    Deleted,
}

/// Performs single steps and their compensations.
///
/// Every call records its outcome through the cursor before returning, so
/// the journal never lags the filesystem by more than the step in flight.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Applies one forward step and records `Applied` or `Failed`.
    ///
    /// # Errors
    ///
    /// Returns the step's failure. [`StepError::is_in_doubt`] tells whether
    /// the filesystem may hold part of the effect.
    async fn apply(
        &self,
        operation: &FileOperation,
        cursor: StepCursor<'_>,
    ) -> Result<AppliedEffect, StepError>;

    /// Runs one compensation. An undo records `Reverted`; a reconcile of a
    /// step the journal never heard back from records it as failed.
    ///
    /// # Errors
    ///
    /// Returns why the files could not be put back.
    async fn revert(
        &self,
        compensation: &Compensation,
        cursor: StepCursor<'_>,
    ) -> Result<RevertEffect, StepError>;
}

/// Executes steps against the local filesystem on tokio's blocking pool.
#[derive(Clone)]
pub struct FileSystemStepExecutor {
    io_slots: Arc<Semaphore>,
    step_timeout: Duration,
    allow_overwrite: bool,
    #[cfg(any(test, feature = "testing"))]
    hooks: TestHooks,
}

#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Clone, Copy, Default)]
struct TestHooks {
    force_copy_fallback: bool,
    apply_delay: Option<Duration>,
    /// Restricts `apply_delay` to one step index.
    delayed_step: Option<usize>,
}

impl FileSystemStepExecutor {
    /// Executor allowing `max_concurrent_io` blocking phases at once, each
    /// step bounded by `step_timeout`.
    #[must_use]
    pub fn new(max_concurrent_io: usize, step_timeout: Duration) -> Self {
        Self {
            io_slots: Arc::new(Semaphore::new(max_concurrent_io.max(1))),
            step_timeout,
            allow_overwrite: false,
            #[cfg(any(test, feature = "testing"))]
            hooks: TestHooks::default(),
        }
    }

    /// Executor configured from the engine settings.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_concurrent_io(), config.step_timeout())
            .with_overwrite(config.allow_overwrite())
    }

    /// Replace existing destinations instead of failing. A replaced file is
    /// not restored by rollback.
    #[must_use]
    pub fn with_overwrite(mut self, allow: bool) -> Self {
        self.allow_overwrite = allow;
        self
    }

    /// Treats every move as crossing devices.
    #[cfg(any(test, feature = "testing"))]
    #[must_use]
    pub fn force_copy_fallback(mut self) -> Self {
        self.hooks.force_copy_fallback = true;
        self
    }

    /// Stalls each forward filesystem phase before it starts; an abort
    /// cuts the stall short. Compensations run undelayed.
    #[cfg(any(test, feature = "testing"))]
    #[must_use]
    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.hooks.apply_delay = Some(delay);
        self
    }

    /// Like [`Self::with_apply_delay`], for the step at `index` only.
    #[cfg(any(test, feature = "testing"))]
    #[must_use]
    pub fn with_apply_delay_at(mut self, index: usize, delay: Duration) -> Self {
        self.hooks.apply_delay = Some(delay);
        self.hooks.delayed_step = Some(index);
        self
    }

    fn forces_copy(&self) -> bool {
        #[cfg(any(test, feature = "testing"))]
        {
            self.hooks.force_copy_fallback
        }
        #[cfg(not(any(test, feature = "testing")))]
        {
            false
        }
    }

    fn apply_delay(&self, step: usize) -> Option<Duration> {
        #[cfg(any(test, feature = "testing"))]
        {
            self.hooks
                .apply_delay
                .filter(|_| self.hooks.delayed_step.is_none_or(|index| index == step))
        }
        #[cfg(not(any(test, feature = "testing")))]
        {
            let _ = step;
            None
        }
    }

    async fn slot(&self) -> Result<OwnedSemaphorePermit, StepError> {
        Arc::clone(&self.io_slots)
            .acquire_owned()
            .await
            .map_err(|err| StepError::Task(err.to_string()))
    }

    /// Runs blocking work with a deadline. On expiry the work is told to
    /// stop and awaited, so nothing reaches the disk after a timeout is
    /// reported.
    async fn phase<T, F>(
        &self,
        deadline: Instant,
        delay: Option<Duration>,
        work: F,
    ) -> Result<T, StepError>
    where
        T: Send + 'static,
        F: FnOnce(&Abort) -> Result<T, StepError> + Send + 'static,
    {
        let abort = Abort::default();
        let flag = abort.clone();

        let mut handle = tokio::task::spawn_blocking(move || {
            if let Some(delay) = delay {
                stall(delay, &flag);
            }
            work(&flag)
        });

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(joined) => joined.map_err(|err| StepError::Task(err.to_string()))?,
            Err(_) => {
                abort.set();
                let late = handle.await;
                debug!(finished = matches!(late, Ok(Ok(_))), "phase stopped after deadline");
                Err(StepError::Timeout(self.step_timeout))
            }
        }
    }

    async fn perform(
        &self,
        operation: &FileOperation,
        cursor: StepCursor<'_>,
        deadline: Instant,
    ) -> Result<AppliedEffect, StepError> {
        let overwrite = self.allow_overwrite;
        match operation.clone() {
            FileOperation::Move {
                source,
                destination,
            } => {
                self.move_file(source, destination, cursor, deadline)
                    .await
            }
            FileOperation::Copy {
                source,
                destination,
            } => {
                self.phase(deadline, self.apply_delay(cursor.index()), move |abort| {
                    fs_ops::copy(&source, &destination, overwrite, abort)
                })
                .await?;
                Ok(AppliedEffect::Copied)
            }
            FileOperation::Delete { source } => {
                self.phase(deadline, self.apply_delay(cursor.index()), move |_| {
                    fs_ops::delete(&source)
                })
                .await?;
                Ok(AppliedEffect::Deleted)
            }
        }
    }

    async fn move_file(
        &self,
        source: PathBuf,
        destination: PathBuf,
        cursor: StepCursor<'_>,
        deadline: Instant,
    ) -> Result<AppliedEffect, StepError> {
        let overwrite = self.allow_overwrite;
        let force_copy = self.forces_copy();
        let (src, dst) = (source.clone(), destination.clone());
        let renamed = self
            .phase(deadline, self.apply_delay(cursor.index()), move |_| {
                fs_ops::prepare_move(&src, &dst, overwrite, force_copy)
            })
            .await?;
        if renamed == Renamed::Done {
            return Ok(AppliedEffect::Renamed);
        }

        debug!(
            source = %source.display(),
            destination = %destination.display(),
            "falling back to copy and delete"
        );
        let (src, dst) = (source.clone(), destination.clone());
        self.phase(deadline, self.apply_delay(cursor.index()), move |abort| {
            fs_ops::copy(&src, &dst, overwrite, abort)
        })
        .await?;

        if let Err(err) = cursor.checkpoint(StepCheckpoint::CopyCompleted).await {
            // The copy is ours and the source is intact; drop the copy so
            // the step leaves no trace.
            let dst = destination.clone();
            let discarded = self
                .phase(Instant::now() + self.step_timeout, None, move |_| {
                    fs_ops::discard(&dst)
                })
                .await;
            return Err(StepError::Journal {
                in_doubt: discarded.is_err(),
                source: err,
            });
        }

        self.phase(deadline, self.apply_delay(cursor.index()), move |_| {
            fs_ops::remove_moved_source(&source)
        })
        .await?;
        Ok(AppliedEffect::MovedAcrossDevices)
    }

    async fn undo(
        &self,
        operation: &FileOperation,
        checkpoint: Option<StepCheckpoint>,
        reconcile: bool,
        deadline: Instant,
    ) -> Result<RevertEffect, StepError> {
        let copy_completed = checkpoint == Some(StepCheckpoint::CopyCompleted);
        match operation.clone() {
            FileOperation::Move {
                source,
                destination,
            } => {
                self.phase(deadline, None, move |abort| {
                    fs_ops::restore_move(&source, &destination, copy_completed, reconcile, abort)
                })
                .await
            }
            FileOperation::Copy {
                source,
                destination,
            } => {
                self.phase(deadline, None, move |_| {
                    fs_ops::remove_copy(&source, &destination, reconcile)
                })
                .await
            }
            FileOperation::Delete { source } => {
                let present = self
                    .phase(deadline, None, {
                        let source = source.clone();
                        move |_| fs_ops::exists(&source)
                    })
                    .await?;
                if reconcile && present {
                    Ok(RevertEffect::Untouched)
                } else {
                    Err(StepError::Irreversible { path: source })
                }
            }
        }
    }
}

fn stall(delay: Duration, abort: &Abort) {
    let until = std::time::Instant::now() + delay;
    while std::time::Instant::now() < until && !abort.is_set() {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[async_trait]
impl StepExecutor for FileSystemStepExecutor {
    async fn apply(
        &self,
        operation: &FileOperation,
        cursor: StepCursor<'_>,
    ) -> Result<AppliedEffect, StepError> {
        let _slot = self.slot().await?;
        let deadline = Instant::now() + self.step_timeout;

        match self.perform(operation, cursor, deadline).await {
            Ok(effect) => {
                cursor
                    .record(StepUpdate::applied())
                    .await
                    .map_err(|source| StepError::Journal {
                        in_doubt: true,
                        source,
                    })?;
                debug!(step = cursor.index(), ?effect, "step applied");
                Ok(effect)
            }
            Err(err) => {
                let update = if err.is_in_doubt() {
                    StepUpdate::in_doubt(err.detailed())
                } else {
                    StepUpdate::failed(err.detailed())
                };
                if let Err(journal) = cursor.record(update).await {
                    warn!(
                        step = cursor.index(),
                        error = %journal,
                        "could not record step failure"
                    );
                }
                Err(err)
            }
        }
    }

    async fn revert(
        &self,
        compensation: &Compensation,
        cursor: StepCursor<'_>,
    ) -> Result<RevertEffect, StepError> {
        let _slot = self.slot().await?;
        let deadline = Instant::now() + self.step_timeout;

        match compensation {
            Compensation::Undo { operation, .. } => {
                let effect = self.undo(operation, None, false, deadline).await?;
                if let Err(err) = cursor.record(StepUpdate::reverted()).await {
                    warn!(
                        step = cursor.index(),
                        error = %err,
                        "files restored but the journal still shows the step applied"
                    );
                }
                Ok(effect)
            }
            Compensation::Reconcile {
                operation,
                checkpoint,
                unrecorded,
                ..
            } => {
                let effect = self.undo(operation, *checkpoint, true, deadline).await?;
                if *unrecorded {
                    let note = format!("outcome unknown; reconciled ({effect:?})");
                    if let Err(err) = cursor.record(StepUpdate::in_doubt(note)).await {
                        warn!(step = cursor.index(), error = %err, "could not record reconcile");
                    }
                }
                Ok(effect)
            }
            Compensation::Irreversible { path, .. } => Err(StepError::Irreversible {
                path: path.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use filesaga_core::{StepStatus, Transaction, TransactionStatus};
    use filesaga_journal::{InMemoryJournalStore, JournalStore, WriteKind};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    async fn begin(journal: &InMemoryJournalStore, ops: Vec<FileOperation>) -> Transaction {
        let txn = Transaction::new(ops);
        journal.begin(&txn).await.expect("begin");
        journal
            .set_status(txn.id, TransactionStatus::Executing)
            .await
            .expect("executing");
        txn
    }

    fn step_status(journal: &InMemoryJournalStore, txn: &Transaction, index: usize) -> StepStatus {
        journal.get(txn.id).expect("entry").steps[index].status
    }

    #[tokio::test]
    async fn apply_move_records_applied() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.txt");
        let destination = dir.path().join("folder/a.txt");
        fs::write(&source, "alpha")?;
        let op = FileOperation::Move {
            source: source.clone(),
            destination: destination.clone(),
        };
        let journal = InMemoryJournalStore::new();
        let txn = begin(&journal, vec![op.clone()]).await;
        let executor = FileSystemStepExecutor::new(2, TIMEOUT);

        let effect = executor
            .apply(&op, StepCursor::new(&journal, txn.id, 0))
            .await?;

        assert_eq!(effect, AppliedEffect::Renamed);
        assert_eq!(step_status(&journal, &txn, 0), StepStatus::Applied);
        assert_eq!(fs::read_to_string(&destination)?, "alpha");
        Ok(())
    }

    #[tokio::test]
    async fn conflict_records_failure_without_touching_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.txt");
        let destination = dir.path().join("b.txt");
        fs::write(&source, "alpha")?;
        fs::write(&destination, "beta")?;
        let op = FileOperation::Move {
            source: source.clone(),
            destination: destination.clone(),
        };
        let journal = InMemoryJournalStore::new();
        let txn = begin(&journal, vec![op.clone()]).await;
        let executor = FileSystemStepExecutor::new(2, TIMEOUT);

        let result = executor
            .apply(&op, StepCursor::new(&journal, txn.id, 0))
            .await;

        assert!(matches!(result, Err(StepError::DestinationConflict { .. })));
        let step = &journal.get(txn.id).expect("entry").steps[0];
        assert_eq!(step.status, StepStatus::Failed);
        assert!(!step.in_doubt);
        assert_eq!(fs::read_to_string(&destination)?, "beta");
        Ok(())
    }

    #[tokio::test]
    async fn cross_device_fallback_checkpoints_copy() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.txt");
        let destination = dir.path().join("other/a.txt");
        fs::write(&source, "alpha")?;
        let op = FileOperation::Move {
            source: source.clone(),
            destination: destination.clone(),
        };
        let journal = InMemoryJournalStore::new();
        let txn = begin(&journal, vec![op.clone()]).await;
        let executor = FileSystemStepExecutor::new(2, TIMEOUT).force_copy_fallback();

        let effect = executor
            .apply(&op, StepCursor::new(&journal, txn.id, 0))
            .await?;

        assert_eq!(effect, AppliedEffect::MovedAcrossDevices);
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&destination)?, "alpha");
        let step = &journal.get(txn.id).expect("entry").steps[0];
        assert_eq!(step.checkpoint, Some(StepCheckpoint::CopyCompleted));
        assert_eq!(step.status, StepStatus::Applied);
        Ok(())
    }

    #[tokio::test]
    async fn failed_checkpoint_discards_copy() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.txt");
        let destination = dir.path().join("other/a.txt");
        fs::write(&source, "alpha")?;
        let op = FileOperation::Move {
            source: source.clone(),
            destination: destination.clone(),
        };
        let journal = InMemoryJournalStore::new();
        let txn = begin(&journal, vec![op.clone()]).await;
        journal.fail_next(WriteKind::Checkpoint);
        let executor = FileSystemStepExecutor::new(2, TIMEOUT).force_copy_fallback();

        let result = executor
            .apply(&op, StepCursor::new(&journal, txn.id, 0))
            .await;

        let Err(err) = result else {
            panic!("expected journal failure");
        };
        assert!(matches!(err, StepError::Journal { in_doubt: false, .. }));
        assert!(source.exists());
        assert!(!destination.exists());
        Ok(())
    }

    #[tokio::test]
    async fn unrecorded_success_is_in_doubt() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.txt");
        fs::write(&source, "alpha")?;
        let op = FileOperation::Copy {
            source: source.clone(),
            destination: dir.path().join("b.txt"),
        };
        let journal = InMemoryJournalStore::new();
        let txn = begin(&journal, vec![op.clone()]).await;
        journal.fail_next(WriteKind::StepResult);
        let executor = FileSystemStepExecutor::new(2, TIMEOUT);

        let result = executor
            .apply(&op, StepCursor::new(&journal, txn.id, 0))
            .await;

        assert!(matches!(result, Err(ref e) if e.is_in_doubt()));
        assert_eq!(step_status(&journal, &txn, 0), StepStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn timeout_stops_step_and_marks_in_doubt() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.txt");
        let destination = dir.path().join("b.txt");
        fs::write(&source, "alpha")?;
        let op = FileOperation::Move {
            source: source.clone(),
            destination: destination.clone(),
        };
        let journal = InMemoryJournalStore::new();
        let txn = begin(&journal, vec![op.clone()]).await;
        let executor = FileSystemStepExecutor::new(2, Duration::from_millis(50))
            .with_apply_delay(Duration::from_secs(5));

        let result = executor
            .apply(&op, StepCursor::new(&journal, txn.id, 0))
            .await;

        assert!(matches!(result, Err(StepError::Timeout(_))));
        let step = &journal.get(txn.id).expect("entry").steps[0];
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.in_doubt);
        assert!(source.exists());
        assert!(!destination.exists());
        Ok(())
    }

    #[tokio::test]
    async fn undo_move_records_reverted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.txt");
        let destination = dir.path().join("folder/a.txt");
        fs::write(&source, "alpha")?;
        let op = FileOperation::Move {
            source: source.clone(),
            destination: destination.clone(),
        };
        let journal = InMemoryJournalStore::new();
        let txn = begin(&journal, vec![op.clone()]).await;
        let executor = FileSystemStepExecutor::new(2, TIMEOUT);
        let cursor = StepCursor::new(&journal, txn.id, 0);
        executor.apply(&op, cursor).await?;

        let effect = executor
            .revert(
                &Compensation::Undo {
                    step: 0,
                    operation: op,
                },
                cursor,
            )
            .await?;

        assert_eq!(effect, RevertEffect::Restored);
        assert_eq!(step_status(&journal, &txn, 0), StepStatus::Reverted);
        assert_eq!(fs::read_to_string(&source)?, "alpha");
        assert!(!destination.exists());
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_of_unrecorded_step_records_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("a.txt");
        fs::write(&source, "alpha")?;
        let op = FileOperation::Move {
            source: source.clone(),
            destination: dir.path().join("b.txt"),
        };
        let journal = InMemoryJournalStore::new();
        let txn = begin(&journal, vec![op.clone()]).await;
        let executor = FileSystemStepExecutor::new(2, TIMEOUT);

        let effect = executor
            .revert(
                &Compensation::Reconcile {
                    step: 0,
                    operation: op,
                    checkpoint: None,
                    unrecorded: true,
                },
                StepCursor::new(&journal, txn.id, 0),
            )
            .await?;

        assert_eq!(effect, RevertEffect::AlreadyRestored);
        let step = &journal.get(txn.id).expect("entry").steps[0];
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.in_doubt);
        Ok(())
    }

    #[tokio::test]
    async fn irreversible_compensation_fails() -> anyhow::Result<()> {
        let journal = InMemoryJournalStore::new();
        let txn = begin(
            &journal,
            vec![FileOperation::Delete {
                source: PathBuf::from("/gone.txt"),
            }],
        )
        .await;
        let executor = FileSystemStepExecutor::new(1, TIMEOUT);

        let result = executor
            .revert(
                &Compensation::Irreversible {
                    step: 0,
                    path: PathBuf::from("/gone.txt"),
                },
                StepCursor::new(&journal, txn.id, 0),
            )
            .await;

        assert!(matches!(result, Err(StepError::Irreversible { .. })));
        Ok(())
    }
}
