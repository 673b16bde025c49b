use std::sync::Arc;

use filesaga_core::{
    BatchError, BatchOutcome, CommittedBatch, DEFAULT_MAX_BATCH_SIZE, ErrorKind, FailedBatch,
    FileOperation, OperationRequest, RejectedBatch, StepReport, StepStatus, Transaction,
    TransactionId, TransactionStatus, UnrevertedStep, ValidationError, validate_batch,
    validate_batch_value,
};
use filesaga_executor::{StepError, StepExecutor};
use filesaga_journal::{JournalStore, StepCursor};
use tracing::{debug, error, info, warn};

use crate::audit::BatchAuditLog;
use crate::cancel::CancelToken;
use crate::notify::{PathIndex, UndoHistory, path_updates};
use crate::planner::RollbackPlanner;

/// A validated batch waiting to run.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    operations: Vec<FileOperation>,
    cancel: CancelToken,
}

impl PreparedBatch {
    /// Normalized operations, in execution order.
    #[must_use]
    pub fn operations(&self) -> &[FileOperation] {
        &self.operations
    }

    /// Number of operations in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Always false for a batch that passed validation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Handle that cancels this batch if used before it starts.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// The step that stopped forward execution.
struct Failure {
    /// `None` when every step applied but the commit could not be recorded.
    step: Option<usize>,
    error: StepError,
}

/// Runs batches as all-or-nothing units.
///
/// Each batch is journaled before its first mutation, executed step by step,
/// and either committed or compensated in reverse order.
pub struct SagaCoordinator {
    journal: Arc<dyn JournalStore>,
    executor: Arc<dyn StepExecutor>,
    max_batch_size: usize,
    path_index: Option<Arc<dyn PathIndex>>,
    undo_history: Option<Arc<dyn UndoHistory>>,
}

impl SagaCoordinator {
    /// Create a coordinator with the default batch size limit.
    #[must_use]
    pub fn new(journal: Arc<dyn JournalStore>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            journal,
            executor,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            path_index: None,
            undo_history: None,
        }
    }

    /// Largest batch `prepare` accepts.
    #[must_use]
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Notify `index` of path changes after each commit or rollback.
    #[must_use]
    pub fn with_path_index(mut self, index: Arc<dyn PathIndex>) -> Self {
        self.path_index = Some(index);
        self
    }

    /// Record committed batches in `history` so they can be undone later.
    #[must_use]
    pub fn with_undo_history(mut self, history: Arc<dyn UndoHistory>) -> Self {
        self.undo_history = Some(history);
        self
    }

    /// Largest batch this coordinator accepts.
    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Validates a batch without touching the journal or the filesystem.
    ///
    /// # Errors
    ///
    /// Returns the first problem found in the batch.
    pub fn prepare(&self, requests: Vec<OperationRequest>) -> Result<PreparedBatch, ValidationError> {
        let operations = validate_batch(requests, self.max_batch_size)?;
        Ok(PreparedBatch {
            operations,
            cancel: CancelToken::new(),
        })
    }

    /// Like [`Self::prepare`], for loosely-typed JSON input.
    ///
    /// # Errors
    ///
    /// Returns the first problem found in the batch.
    pub fn prepare_json(&self, value: serde_json::Value) -> Result<PreparedBatch, ValidationError> {
        let operations = validate_batch_value(value, self.max_batch_size)?;
        Ok(PreparedBatch {
            operations,
            cancel: CancelToken::new(),
        })
    }

    /// Validates and runs a batch. Validation failures come back as
    /// [`BatchOutcome::Rejected`] without touching the journal.
    pub async fn execute(&self, requests: Vec<OperationRequest>) -> BatchOutcome {
        match self.prepare(requests) {
            Ok(batch) => self.run(batch).await,
            Err(err) => reject(&err),
        }
    }

    /// Like [`Self::execute`], for loosely-typed JSON input.
    pub async fn execute_json(&self, value: serde_json::Value) -> BatchOutcome {
        match self.prepare_json(value) {
            Ok(batch) => self.run(batch).await,
            Err(err) => reject(&err),
        }
    }

    /// Runs a prepared batch to commit or rollback.
    pub async fn run(&self, batch: PreparedBatch) -> BatchOutcome {
        if batch.cancel.is_cancelled() {
            info!(steps = batch.len(), "batch cancelled before it started");
            return BatchOutcome::Rejected(RejectedBatch::new(BatchError::new(
                ErrorKind::Cancelled,
                "batch was cancelled before it started",
            )));
        }

        let mut transaction = Transaction::new(batch.operations);
        let id = transaction.id;

        if let Err(err) = self.journal.begin(&transaction).await {
            error!(transaction = %id, error = %err, "could not journal batch");
            return BatchOutcome::Rejected(RejectedBatch::new(BatchError::new(
                ErrorKind::JournalWrite,
                format!("could not journal batch: {err}"),
            )));
        }
        if let Err(err) = self
            .journal
            .set_status(id, TransactionStatus::Executing)
            .await
        {
            error!(transaction = %id, error = %err, "could not start batch");
            return self.abandon(id, &err.to_string()).await;
        }
        info!(transaction = %id, steps = transaction.steps.len(), "batch started");

        let mut audit = BatchAuditLog::new();
        let mut results = Vec::with_capacity(transaction.steps.len());
        let mut failure = None;

        for index in 0..transaction.steps.len() {
            let operation = transaction.steps[index].operation.clone();
            audit.record_start(index, operation.describe());
            let cursor = StepCursor::new(self.journal.as_ref(), id, index);

            match self.executor.apply(&operation, cursor).await {
                Ok(effect) => {
                    debug!(transaction = %id, step = index, ?effect, "step applied");
                    audit.record_success();
                    transaction.steps[index].status = StepStatus::Applied;
                    results.push(report(index, &operation, None));
                }
                Err(err) => {
                    warn!(
                        transaction = %id,
                        step = index,
                        error = %err.detailed(),
                        "step failed: {}",
                        operation.describe()
                    );
                    audit.record_failure();
                    let step = &mut transaction.steps[index];
                    step.status = StepStatus::Failed;
                    step.in_doubt = err.is_in_doubt();
                    results.push(report(index, &operation, Some(&err)));
                    failure = Some(Failure {
                        step: Some(index),
                        error: err,
                    });
                    break;
                }
            }
        }

        let failure = match failure {
            Some(failure) => failure,
            None => match self.journal.complete(id, TransactionStatus::Committed).await {
                Ok(()) => {
                    info!(transaction = %id, "batch committed");
                    debug!(transaction = %id, "audit:\n{}", audit.summary());
                    self.notify(id, &transaction).await;
                    return BatchOutcome::Committed(CommittedBatch::new(id, results));
                }
                Err(err) => {
                    error!(transaction = %id, error = %err, "could not record commit, rolling back");
                    Failure {
                        step: None,
                        error: StepError::Journal {
                            in_doubt: false,
                            source: err,
                        },
                    }
                }
            },
        };

        let outcome = self
            .roll_back(transaction, failure, results, &mut audit)
            .await;
        debug!(transaction = %id, "audit:\n{}", audit.summary());
        BatchOutcome::Failed(outcome)
    }

    async fn roll_back(
        &self,
        local: Transaction,
        failure: Failure,
        results: Vec<StepReport>,
        audit: &mut BatchAuditLog,
    ) -> FailedBatch {
        let id = local.id;
        let message = match failure.step {
            Some(index) => format!(
                "operation {} of {} ({}) failed: {}",
                index + 1,
                local.steps.len(),
                local.steps[index].operation.describe(),
                failure.error.detailed()
            ),
            None => format!("commit failed: {}", failure.error.detailed()),
        };

        if let Err(err) = self
            .journal
            .set_status(id, TransactionStatus::RollingBack)
            .await
        {
            // Compensations are mutations too; without a durable RollingBack
            // record they wait for recovery.
            error!(transaction = %id, error = %err, "could not start rollback, deferring to recovery");
            let unreverted = local
                .steps
                .iter()
                .enumerate()
                .filter(|(_, step)| step.status == StepStatus::Applied || step.in_doubt)
                .map(|(index, step)| UnrevertedStep {
                    step: index,
                    kind: step.operation.kind(),
                    original_path: step.operation.source().to_path_buf(),
                    current_path: step.operation.destination().map(Into::into),
                    reason: "rollback deferred to recovery".to_string(),
                })
                .collect();
            return FailedBatch {
                success: false,
                error: BatchError::new(
                    ErrorKind::JournalWrite,
                    format!("{message}; could not start rollback: {err}"),
                ),
                transaction_id: id,
                rolled_back: false,
                rollback_results: Vec::new(),
                reconciled: Vec::new(),
                failed_step: failure.step,
                results,
                final_status: TransactionStatus::Executing,
                unreverted,
                permanent_effects: Vec::new(),
            };
        }
        info!(transaction = %id, "rolling back");

        // The journal decides what reached the filesystem; the local mirror
        // covers a journal that cannot be read back.
        let snapshot = match self.journal.load(id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => local,
            Err(err) => {
                warn!(transaction = %id, error = %err, "could not reload journal entry");
                local
            }
        };
        let in_flight = failure
            .step
            .filter(|_| failure.error.is_in_doubt())
            .filter(|index| {
                snapshot
                    .steps
                    .get(*index)
                    .is_some_and(|step| step.status == StepStatus::Pending)
            });
        let plan = RollbackPlanner::plan(&snapshot, in_flight);
        let outcome = plan
            .execute(self.executor.as_ref(), self.journal.as_ref(), id, audit)
            .await;

        let mut final_status = outcome.final_status();
        if let Err(err) = self.journal.complete(id, final_status).await {
            error!(transaction = %id, error = %err, "could not record rollback result, recovery will finish it");
            final_status = TransactionStatus::RollingBack;
        }

        let error = if outcome.is_complete() {
            BatchError::new(failure.error.kind(), message)
        } else {
            warn!(
                transaction = %id,
                failed = outcome.failures.len(),
                "rollback incomplete"
            );
            BatchError::new(ErrorKind::PartialRollback, message)
        };
        info!(transaction = %id, status = %final_status, "batch rolled back");

        FailedBatch {
            success: false,
            error,
            transaction_id: id,
            rolled_back: true,
            rollback_results: outcome.results,
            reconciled: outcome.reconciled,
            failed_step: failure.step,
            results,
            final_status,
            unreverted: outcome.unreverted,
            permanent_effects: outcome.permanent_effects,
        }
    }

    /// Ends a transaction that never reached the filesystem.
    async fn abandon(&self, id: TransactionId, reason: &str) -> BatchOutcome {
        let final_status = match self.journal.complete(id, TransactionStatus::RolledBack).await {
            Ok(()) => TransactionStatus::RolledBack,
            Err(err) => {
                warn!(transaction = %id, error = %err, "could not close abandoned batch");
                TransactionStatus::Pending
            }
        };
        BatchOutcome::Failed(FailedBatch {
            success: false,
            error: BatchError::new(
                ErrorKind::JournalWrite,
                format!("could not start batch: {reason}"),
            ),
            transaction_id: id,
            rolled_back: true,
            rollback_results: Vec::new(),
            reconciled: Vec::new(),
            failed_step: None,
            results: Vec::new(),
            final_status,
            unreverted: Vec::new(),
            permanent_effects: Vec::new(),
        })
    }

    async fn notify(&self, id: TransactionId, transaction: &Transaction) {
        if self.path_index.is_none() && self.undo_history.is_none() {
            return;
        }
        let operations: Vec<_> = transaction
            .steps
            .iter()
            .map(|s| s.operation.clone())
            .collect();
        let updates = path_updates(&operations);

        if let Some(index) = &self.path_index {
            if let Err(err) = index.update_paths(&updates).await {
                warn!(transaction = %id, error = %err, "path index update failed");
            }
        }
        if let Some(history) = &self.undo_history {
            if let Err(err) = history.record_batch(id, &updates).await {
                warn!(transaction = %id, error = %err, "undo history update failed");
            }
        }
    }
}

fn reject(err: &ValidationError) -> BatchOutcome {
    debug!(error = %err, "batch rejected");
    BatchOutcome::Rejected(RejectedBatch::new(BatchError::from(err)))
}

fn report(index: usize, operation: &FileOperation, error: Option<&StepError>) -> StepReport {
    StepReport {
        index,
        kind: operation.kind(),
        source: operation.source().to_path_buf(),
        destination: operation.destination().map(Into::into),
        success: error.is_none(),
        error: error.map(|err| BatchError::new(err.kind(), err.detailed())),
    }
}
