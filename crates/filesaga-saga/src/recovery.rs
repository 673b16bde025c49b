use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use filesaga_core::{
    RollbackResult, Transaction, TransactionId, TransactionStatus, UnrevertedStep,
};
use filesaga_executor::StepExecutor;
use filesaga_journal::{JournalError, JournalStore};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audit::BatchAuditLog;
use crate::planner::RollbackPlanner;

/// How one interrupted transaction was finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredTransaction {
    pub transaction_id: TransactionId,
    /// Status found in the journal at startup.
    pub found_status: TransactionStatus,
    pub final_status: TransactionStatus,
    pub rollback_results: Vec<RollbackResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reconciled: Vec<RollbackResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreverted: Vec<UnrevertedStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permanent_effects: Vec<PathBuf>,
}

/// A transaction recovery could not finish; it stays in the journal for
/// the next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryFailure {
    pub transaction_id: TransactionId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub recovered: Vec<RecoveredTransaction>,
    pub failures: Vec<RecoveryFailure>,
    /// Expired terminal entries removed after recovery.
    pub pruned: usize,
}

impl RecoveryReport {
    /// Nothing was interrupted and nothing went wrong.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.recovered.is_empty() && self.failures.is_empty()
    }

    /// Some recovered transaction could not be fully rolled back.
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        !self.failures.is_empty()
            || self
                .recovered
                .iter()
                .any(|r| r.final_status == TransactionStatus::PartiallyRolledBack)
    }
}

/// Finishes transactions left incomplete by a crash, always by rolling
/// them back.
pub struct RecoveryRunner {
    journal: Arc<dyn JournalStore>,
    executor: Arc<dyn StepExecutor>,
    retention: Option<Duration>,
}

impl RecoveryRunner {
    /// Create a runner that keeps terminal entries until pruned by hand.
    #[must_use]
    pub fn new(journal: Arc<dyn JournalStore>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            journal,
            executor,
            retention: None,
        }
    }

    /// Prune terminal entries older than `retention` after recovering.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Rolls back every incomplete transaction, oldest first.
    ///
    /// Safe to run repeatedly: finished transactions are terminal and no
    /// longer listed, and a run that was itself interrupted resumes from the
    /// journal's `Reverted` markers.
    ///
    /// # Errors
    ///
    /// Fails only if the journal cannot be listed. Problems with single
    /// transactions are collected in the report.
    pub async fn run(&self) -> Result<RecoveryReport, JournalError> {
        let incomplete = self.journal.list_incomplete().await?;
        let mut report = RecoveryReport::default();
        if !incomplete.is_empty() {
            info!(count = incomplete.len(), "recovering interrupted transactions");
        }

        for transaction in incomplete {
            let id = transaction.id;
            match self.recover(transaction).await {
                Ok(recovered) => {
                    info!(
                        transaction = %id,
                        from = %recovered.found_status,
                        to = %recovered.final_status,
                        "transaction recovered"
                    );
                    report.recovered.push(recovered);
                }
                Err(err) => {
                    error!(transaction = %id, error = %err, "recovery failed");
                    report.failures.push(RecoveryFailure {
                        transaction_id: id,
                        error: err.to_string(),
                    });
                }
            }
        }

        report.pruned = self.prune_expired().await;
        Ok(report)
    }

    async fn recover(&self, transaction: Transaction) -> Result<RecoveredTransaction, JournalError> {
        let id = transaction.id;
        let found_status = transaction.status;

        match found_status {
            TransactionStatus::Pending => {
                debug!(transaction = %id, "never started, closing");
                self.journal
                    .complete(id, TransactionStatus::RolledBack)
                    .await?;
                return Ok(RecoveredTransaction {
                    transaction_id: id,
                    found_status,
                    final_status: TransactionStatus::RolledBack,
                    rollback_results: Vec::new(),
                    reconciled: Vec::new(),
                    unreverted: Vec::new(),
                    permanent_effects: Vec::new(),
                });
            }
            TransactionStatus::Executing => {
                self.journal
                    .set_status(id, TransactionStatus::RollingBack)
                    .await?;
            }
            _ => {}
        }

        let in_flight = transaction.unrecorded_step();
        let plan = RollbackPlanner::plan(&transaction, in_flight);
        debug!(
            transaction = %id,
            compensations = plan.len(),
            ?in_flight,
            "resuming rollback"
        );

        let mut audit = BatchAuditLog::new();
        let outcome = plan
            .execute(self.executor.as_ref(), self.journal.as_ref(), id, &mut audit)
            .await;
        debug!(transaction = %id, "audit:\n{}", audit.summary());

        let final_status = outcome.final_status();
        self.journal.complete(id, final_status).await?;
        if !outcome.is_complete() {
            warn!(transaction = %id, "files need manual attention after recovery");
        }

        Ok(RecoveredTransaction {
            transaction_id: id,
            found_status,
            final_status,
            rollback_results: outcome.results,
            reconciled: outcome.reconciled,
            unreverted: outcome.unreverted,
            permanent_effects: outcome.permanent_effects,
        })
    }

    async fn prune_expired(&self) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let Some(cutoff) = TimeDelta::from_std(retention)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        match self.journal.prune_expired(cutoff).await {
            Ok(pruned) => {
                if pruned > 0 {
                    debug!(pruned, "pruned expired journal entries");
                }
                pruned
            }
            Err(err) => {
                warn!(error = %err, "could not prune expired journal entries");
                0
            }
        }
    }
}
