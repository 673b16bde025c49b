use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filesaga_core::{StepCheckpoint, StepStatus, Transaction, TransactionId, TransactionStatus};

use crate::Result;

/// New state for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepUpdate {
    pub status: StepStatus,
    pub details: Option<String>,
    pub in_doubt: bool,
}

impl StepUpdate {
    #[must_use]
    pub fn applied() -> Self {
        Self {
            status: StepStatus::Applied,
            details: None,
            in_doubt: false,
        }
    }

    #[must_use]
    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            details: Some(details.into()),
            in_doubt: false,
        }
    }

    /// Failed, but the filesystem effect may have happened anyway.
    #[must_use]
    pub fn in_doubt(details: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            details: Some(details.into()),
            in_doubt: true,
        }
    }

    #[must_use]
    pub fn reverted() -> Self {
        Self {
            status: StepStatus::Reverted,
            details: None,
            in_doubt: false,
        }
    }
}

/// Durable state of transactions and their steps.
///
/// Implementations serialize their own writes; every method returns only
/// after the change is durable. Callers never issue two writes for the same
/// transaction concurrently.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Persists a new entry. Must complete before any filesystem mutation of
    /// the transaction.
    ///
    /// # Errors
    ///
    /// Fails if the entry cannot be written, already exists, or has
    /// non-pending steps.
    async fn begin(&self, transaction: &Transaction) -> Result<()>;

    /// Moves a transaction to a non-terminal status.
    ///
    /// # Errors
    ///
    /// Fails on a disallowed transition or write failure.
    async fn set_status(&self, id: TransactionId, status: TransactionStatus) -> Result<()>;

    /// Atomically updates one step.
    ///
    /// # Errors
    ///
    /// Fails on a backward step transition or write failure.
    async fn record_step_result(
        &self,
        id: TransactionId,
        index: usize,
        update: StepUpdate,
    ) -> Result<()>;

    /// Records a progress marker inside a step without changing its status.
    ///
    /// # Errors
    ///
    /// Fails if the step does not exist or the write fails.
    async fn record_checkpoint(
        &self,
        id: TransactionId,
        index: usize,
        checkpoint: StepCheckpoint,
    ) -> Result<()>;

    /// Marks the entry terminal.
    ///
    /// # Errors
    ///
    /// Fails if `status` is not terminal, the transition is disallowed, or
    /// the write fails.
    async fn complete(&self, id: TransactionId, status: TransactionStatus) -> Result<()>;

    /// # Errors
    ///
    /// Fails if an existing entry cannot be read.
    async fn load(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Every entry, oldest first.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be listed.
    async fn list(&self) -> Result<Vec<Transaction>>;

    /// Every entry not yet terminal, oldest first.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be listed.
    async fn list_incomplete(&self) -> Result<Vec<Transaction>> {
        let mut entries = self.list().await?;
        entries.retain(|txn| !txn.is_terminal());
        Ok(entries)
    }

    /// Removes a terminal entry. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Refuses non-terminal entries.
    async fn prune(&self, id: TransactionId) -> Result<bool>;

    /// Removes terminal entries completed before `older_than`.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be listed or an entry cannot be removed.
    async fn prune_expired(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

/// Journal access scoped to one step of one transaction.
#[derive(Clone, Copy)]
pub struct StepCursor<'a> {
    journal: &'a dyn JournalStore,
    transaction: TransactionId,
    index: usize,
}

impl<'a> StepCursor<'a> {
    #[must_use]
    pub fn new(journal: &'a dyn JournalStore, transaction: TransactionId, index: usize) -> Self {
        Self {
            journal,
            transaction,
            index,
        }
    }

    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// # Errors
    ///
    /// Propagates the journal write failure.
    pub async fn record(&self, update: StepUpdate) -> Result<()> {
        self.journal
            .record_step_result(self.transaction, self.index, update)
            .await
    }

    /// # Errors
    ///
    /// Propagates the journal write failure.
    pub async fn checkpoint(&self, checkpoint: StepCheckpoint) -> Result<()> {
        self.journal
            .record_checkpoint(self.transaction, self.index, checkpoint)
            .await
    }
}
