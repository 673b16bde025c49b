use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filesaga_core::{StepCheckpoint, Transaction, TransactionId, TransactionStatus};

use crate::Result;
use crate::entry::JournalEntry;
use crate::error::JournalError;
use crate::store::{JournalStore, StepUpdate};

/// Kinds of journal writes, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Begin,
    Status,
    StepResult,
    Checkpoint,
    Complete,
}

/// Journal kept in memory, with one-shot write failures on demand.
#[derive(Default)]
pub struct InMemoryJournalStore {
    entries: Mutex<BTreeMap<TransactionId, JournalEntry>>,
    failures: Mutex<HashSet<WriteKind>>,
    writes: Mutex<Vec<(TransactionId, WriteKind)>>,
}

impl InMemoryJournalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The next write of `kind` fails with [`JournalError::Injected`].
    pub fn fail_next(&self, kind: WriteKind) {
        lock(&self.failures).insert(kind);
    }

    /// Stores an entry as-is, bypassing transition checks.
    pub fn insert(&self, transaction: Transaction) {
        let entry = JournalEntry {
            format_version: crate::entry::JOURNAL_FORMAT_VERSION,
            transaction,
        };
        lock(&self.entries).insert(entry.transaction.id, entry);
    }

    #[must_use]
    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        lock(&self.entries).get(&id).map(|e| e.transaction.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Successful writes in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(TransactionId, WriteKind)> {
        lock(&self.writes).clone()
    }

    fn check_injected(&self, kind: WriteKind) -> Result<()> {
        if lock(&self.failures).remove(&kind) {
            return Err(JournalError::Injected);
        }
        Ok(())
    }

    fn update<F>(&self, id: TransactionId, kind: WriteKind, apply: F) -> Result<()>
    where
        F: FnOnce(&mut JournalEntry) -> Result<()>,
    {
        self.check_injected(kind)?;
        let mut entries = lock(&self.entries);
        let entry = entries.get_mut(&id).ok_or(JournalError::NotFound(id))?;
        let mut updated = entry.clone();
        apply(&mut updated)?;
        *entry = updated;
        lock(&self.writes).push((id, kind));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl JournalStore for InMemoryJournalStore {
    async fn begin(&self, transaction: &Transaction) -> Result<()> {
        self.check_injected(WriteKind::Begin)?;
        let entry = JournalEntry::begin(transaction.clone())?;
        let mut entries = lock(&self.entries);
        if entries.contains_key(&transaction.id) {
            return Err(JournalError::AlreadyExists(transaction.id));
        }
        entries.insert(transaction.id, entry);
        lock(&self.writes).push((transaction.id, WriteKind::Begin));
        Ok(())
    }

    async fn set_status(&self, id: TransactionId, status: TransactionStatus) -> Result<()> {
        self.update(id, WriteKind::Status, |entry| entry.set_status(status))
    }

    async fn record_step_result(
        &self,
        id: TransactionId,
        index: usize,
        update: StepUpdate,
    ) -> Result<()> {
        self.update(id, WriteKind::StepResult, |entry| {
            entry.record_step(index, &update)
        })
    }

    async fn record_checkpoint(
        &self,
        id: TransactionId,
        index: usize,
        checkpoint: StepCheckpoint,
    ) -> Result<()> {
        self.update(id, WriteKind::Checkpoint, |entry| {
            entry.record_checkpoint(index, checkpoint)
        })
    }

    async fn complete(&self, id: TransactionId, status: TransactionStatus) -> Result<()> {
        self.update(id, WriteKind::Complete, |entry| entry.complete(status))
    }

    async fn load(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.get(id))
    }

    async fn list(&self) -> Result<Vec<Transaction>> {
        let mut all: Vec<_> = lock(&self.entries)
            .values()
            .map(|e| e.transaction.clone())
            .collect();
        all.sort_by_key(|txn| txn.created_at);
        Ok(all)
    }

    async fn prune(&self, id: TransactionId) -> Result<bool> {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get(&id) else {
            return Ok(false);
        };
        if !entry.transaction.is_terminal() {
            return Err(JournalError::NotTerminal {
                id,
                status: entry.transaction.status,
            });
        }
        entries.remove(&id);
        Ok(true)
    }

    async fn prune_expired(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(older_than));
        Ok(before - entries.len())
    }
}
