use chrono::Utc;
use filesaga_core::{StepCheckpoint, StepStatus, Transaction, TransactionStatus};
use serde::{Deserialize, Serialize};

use crate::error::JournalError;
use crate::store::StepUpdate;

pub const JOURNAL_FORMAT_VERSION: u32 = 1;

/// Persisted projection of a [`Transaction`].
///
/// The store only applies the transitions below; it never decides what a
/// transaction does next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub format_version: u32,
    pub transaction: Transaction,
}

impl JournalEntry {
    /// # Errors
    ///
    /// Returns [`JournalError::NotPending`] unless the transaction and all
    /// its steps are still pending.
    pub fn begin(transaction: Transaction) -> Result<Self, JournalError> {
        let untouched = transaction.status == TransactionStatus::Pending
            && transaction
                .steps
                .iter()
                .all(|s| s.status == StepStatus::Pending);
        if !untouched {
            return Err(JournalError::NotPending(transaction.id));
        }
        Ok(Self {
            format_version: JOURNAL_FORMAT_VERSION,
            transaction,
        })
    }

    pub(crate) fn set_status(&mut self, status: TransactionStatus) -> Result<(), JournalError> {
        let txn = &mut self.transaction;
        if !txn.status.can_transition_to(status) {
            return Err(JournalError::InvalidTransition {
                id: txn.id,
                from: txn.status,
                to: status,
            });
        }
        txn.status = status;
        Ok(())
    }

    pub(crate) fn complete(&mut self, status: TransactionStatus) -> Result<(), JournalError> {
        if !status.is_terminal() {
            return Err(JournalError::NotTerminal {
                id: self.transaction.id,
                status,
            });
        }
        self.set_status(status)?;
        self.transaction.completed_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn record_step(
        &mut self,
        index: usize,
        update: &StepUpdate,
    ) -> Result<(), JournalError> {
        let id = self.transaction.id;
        let len = self.transaction.steps.len();
        let step = self
            .transaction
            .steps
            .get_mut(index)
            .ok_or(JournalError::StepOutOfRange { id, index, len })?;

        if !step.status.can_transition_to(update.status) {
            return Err(JournalError::InvalidStepTransition {
                id,
                index,
                from: step.status,
                to: update.status,
            });
        }

        step.status = update.status;
        step.in_doubt = update.in_doubt;
        if update.details.is_some() {
            step.details.clone_from(&update.details);
        }
        Ok(())
    }

    pub(crate) fn record_checkpoint(
        &mut self,
        index: usize,
        checkpoint: StepCheckpoint,
    ) -> Result<(), JournalError> {
        let id = self.transaction.id;
        let len = self.transaction.steps.len();
        let step = self
            .transaction
            .steps
            .get_mut(index)
            .ok_or(JournalError::StepOutOfRange { id, index, len })?;
        step.checkpoint = Some(checkpoint);
        Ok(())
    }

    pub(crate) fn is_expired(&self, older_than: chrono::DateTime<Utc>) -> bool {
        self.transaction.is_terminal()
            && self
                .transaction
                .completed_at
                .is_some_and(|done| done < older_than)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use filesaga_core::FileOperation;

    use super::*;

    fn entry() -> anyhow::Result<JournalEntry> {
        let txn = Transaction::new(vec![
            FileOperation::Move {
                source: PathBuf::from("/a"),
                destination: PathBuf::from("/b"),
            },
            FileOperation::Copy {
                source: PathBuf::from("/c"),
                destination: PathBuf::from("/d"),
            },
        ]);
        Ok(JournalEntry::begin(txn)?)
    }

    #[test]
    fn begin_rejects_touched_transaction() {
        let mut txn = Transaction::new(vec![FileOperation::Delete {
            source: PathBuf::from("/a"),
        }]);
        txn.steps[0].status = StepStatus::Applied;

        let result = JournalEntry::begin(txn);

        assert!(matches!(result, Err(JournalError::NotPending(_))));
    }

    #[test]
    fn record_step_rejects_backward_transition() -> anyhow::Result<()> {
        let mut entry = entry()?;
        entry.record_step(0, &StepUpdate::failed("boom"))?;

        let result = entry.record_step(0, &StepUpdate::applied());

        assert!(matches!(
            result,
            Err(JournalError::InvalidStepTransition { index: 0, .. })
        ));
        Ok(())
    }

    #[test]
    fn record_step_out_of_range() -> anyhow::Result<()> {
        let mut entry = entry()?;

        let result = entry.record_step(5, &StepUpdate::applied());

        assert!(matches!(
            result,
            Err(JournalError::StepOutOfRange { index: 5, len: 2, .. })
        ));
        Ok(())
    }

    #[test]
    fn complete_requires_terminal_status() -> anyhow::Result<()> {
        let mut entry = entry()?;
        entry.set_status(TransactionStatus::Executing)?;

        let result = entry.complete(TransactionStatus::RollingBack);

        assert!(matches!(result, Err(JournalError::NotTerminal { .. })));
        Ok(())
    }

    #[test]
    fn complete_stamps_completion_time() -> anyhow::Result<()> {
        let mut entry = entry()?;
        entry.set_status(TransactionStatus::Executing)?;

        entry.complete(TransactionStatus::Committed)?;

        assert!(entry.transaction.completed_at.is_some());
        assert!(entry.transaction.is_terminal());
        Ok(())
    }

    #[test]
    fn in_doubt_update_sets_flag_and_details() -> anyhow::Result<()> {
        let mut entry = entry()?;

        entry.record_step(1, &StepUpdate::in_doubt("timed out"))?;

        let step = &entry.transaction.steps[1];
        assert_eq!(step.status, StepStatus::Failed);
        assert!(step.in_doubt);
        assert_eq!(step.details.as_deref(), Some("timed out"));
        Ok(())
    }
}
