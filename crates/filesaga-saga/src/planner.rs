use std::path::PathBuf;

use filesaga_core::{
    FileOperation, RollbackResult, StepStatus, Transaction, TransactionId, TransactionStatus,
    UnrevertedStep,
};
use filesaga_executor::{Compensation, StepError, StepExecutor};
use filesaga_journal::{JournalStore, StepCursor};
use tracing::{debug, warn};

use crate::audit::BatchAuditLog;
use crate::error::CompensationError;

/// Ordered compensations for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RollbackPlan {
    compensations: Vec<Compensation>,
}

/// Derives rollback plans from journal state.
pub struct RollbackPlanner;

impl RollbackPlanner {
    /// Plans the rollback of `transaction`.
    ///
    /// Steps in doubt are reconciled first, then applied steps are undone in
    /// reverse order. Reverted steps are skipped, so planning a half-done
    /// rollback continues where it stopped. `in_flight` names a step that
    /// may have reached the filesystem even though the journal still shows
    /// it pending.
    #[must_use]
    pub fn plan(transaction: &Transaction, in_flight: Option<usize>) -> RollbackPlan {
        let mut compensations = Vec::new();

        for (index, step) in transaction.steps.iter().enumerate().rev() {
            let unrecorded = step.status == StepStatus::Pending && in_flight == Some(index);
            let recorded_doubt = step.status == StepStatus::Failed && step.in_doubt;
            if unrecorded || recorded_doubt {
                compensations.push(Compensation::Reconcile {
                    step: index,
                    operation: step.operation.clone(),
                    checkpoint: step.checkpoint,
                    unrecorded,
                });
            }
        }

        for (index, step) in transaction.steps.iter().enumerate().rev() {
            if step.status != StepStatus::Applied {
                continue;
            }
            compensations.push(match &step.operation {
                FileOperation::Delete { source } => Compensation::Irreversible {
                    step: index,
                    path: source.clone(),
                },
                operation => Compensation::Undo {
                    step: index,
                    operation: operation.clone(),
                },
            });
        }

        RollbackPlan { compensations }
    }
}

impl RollbackPlan {
    /// Compensations in the order they run.
    #[must_use]
    pub fn compensations(&self) -> &[Compensation] {
        &self.compensations
    }

    /// Number of planned compensations, reconciles included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.compensations.len()
    }

    /// Whether there is nothing to compensate.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compensations.is_empty()
    }

    /// Runs every compensation in order. A failed compensation does not stop
    /// the rest.
    pub async fn execute(
        &self,
        executor: &dyn StepExecutor,
        journal: &dyn JournalStore,
        transaction: TransactionId,
        audit: &mut BatchAuditLog,
    ) -> RollbackOutcome {
        let mut outcome = RollbackOutcome::default();

        for compensation in &self.compensations {
            let step = compensation.step();
            let description = compensation.describe();
            let cursor = StepCursor::new(journal, transaction, step);

            match executor.revert(compensation, cursor).await {
                Ok(effect) => {
                    debug!(%transaction, step, ?effect, "compensated: {description}");
                    audit.record_compensated(step, description.clone());
                    outcome.results_for(compensation).push(RollbackResult {
                        success: true,
                        step,
                        action: description,
                        error: None,
                    });
                }
                Err(error) => {
                    warn!(
                        %transaction,
                        step,
                        error = %error.detailed(),
                        "compensation failed: {description}"
                    );
                    audit.record_compensation_failed(step, description.clone());
                    outcome.record_failure(compensation, description, error);
                }
            }
        }

        outcome
    }
}

/// What a rollback achieved.
#[derive(Debug, Default)]
pub struct RollbackOutcome {
    /// Compensations of applied steps.
    pub results: Vec<RollbackResult>,
    /// Reconciles of steps whose forward outcome was unknown.
    pub reconciled: Vec<RollbackResult>,
    pub failures: Vec<CompensationError>,
    pub unreverted: Vec<UnrevertedStep>,
    /// Files deleted by the batch; these stay gone.
    pub permanent_effects: Vec<PathBuf>,
}

impl RollbackOutcome {
    fn results_for(&mut self, compensation: &Compensation) -> &mut Vec<RollbackResult> {
        if matches!(compensation, Compensation::Reconcile { .. }) {
            &mut self.reconciled
        } else {
            &mut self.results
        }
    }

    fn record_failure(
        &mut self,
        compensation: &Compensation,
        description: String,
        error: StepError,
    ) {
        let step = compensation.step();
        self.results_for(compensation).push(RollbackResult {
            success: false,
            step,
            action: description.clone(),
            error: Some(error.detailed()),
        });

        match (compensation, &error) {
            (Compensation::Irreversible { path, .. }, _)
            | (_, StepError::Irreversible { path }) => {
                self.permanent_effects.push(path.clone());
            }
            (Compensation::Undo { operation, .. } | Compensation::Reconcile { operation, .. }, _) => {
                self.unreverted.push(UnrevertedStep {
                    step,
                    kind: operation.kind(),
                    original_path: operation.source().to_path_buf(),
                    current_path: operation.destination().map(PathBuf::from),
                    reason: error.detailed(),
                });
            }
        }

        self.failures.push(CompensationError {
            step,
            description,
            error,
        });
    }

    /// Whether every compensation succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `RolledBack` when every compensation succeeded, otherwise
    /// `PartiallyRolledBack`.
    #[must_use]
    pub fn final_status(&self) -> TransactionStatus {
        if self.is_complete() {
            TransactionStatus::RolledBack
        } else {
            TransactionStatus::PartiallyRolledBack
        }
    }
}
