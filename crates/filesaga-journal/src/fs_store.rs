use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filesaga_core::{StepCheckpoint, Transaction, TransactionId, TransactionStatus};
use fs2::FileExt;
use tracing::{debug, error};

use crate::Result;
use crate::entry::{JOURNAL_FORMAT_VERSION, JournalEntry};
use crate::error::JournalError;
use crate::io::{atomic_write, is_temp_file, remove_durably};
use crate::store::{JournalStore, StepUpdate};

const LOCK_FILENAME: &str = ".lock";
const ENTRY_EXTENSION: &str = "json";

/// One JSON file per transaction under a directory owned by this process.
///
/// Writes are read-modify-write cycles under a mutex held inside the
/// blocking task, so a write abandoned by its caller still completes
/// before the next one starts.
#[derive(Clone)]
pub struct FileSystemJournalStore {
    inner: Arc<Inner>,
}

struct Inner {
    dir: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileSystemJournalStore {
    /// Opens (creating if needed) the journal directory and takes the
    /// exclusive process lock.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Locked`] if another process holds the journal.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| JournalError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let lock_path = dir.join(LOCK_FILENAME);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| JournalError::Write {
                path: lock_path.clone(),
                source,
            })?;
        lock_file
            .try_lock_exclusive()
            .map_err(|source| JournalError::Locked {
                path: dir.to_path_buf(),
                source,
            })?;

        debug!(dir = %dir.display(), "opened journal");

        Ok(Self {
            inner: Arc::new(Inner {
                dir: dir.to_path_buf(),
                write_lock: Mutex::new(()),
                _lock_file: lock_file,
            }),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    #[must_use]
    pub fn entry_path(&self, id: TransactionId) -> PathBuf {
        self.inner.entry_path(id)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| JournalError::Task(e.to_string()))?
    }

    async fn update<F>(&self, id: TransactionId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut JournalEntry) -> Result<()> + Send + 'static,
    {
        self.blocking(move |inner| {
            let _guard = inner
                .write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let path = inner.entry_path(id);
            let mut entry = read_entry(&path)?.ok_or(JournalError::NotFound(id))?;
            apply(&mut entry)?;
            write_entry(&path, &entry)
        })
        .await
    }
}

impl Inner {
    fn entry_path(&self, id: TransactionId) -> PathBuf {
        self.dir.join(format!("{id}.{ENTRY_EXTENSION}"))
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir).map_err(|source| JournalError::Read {
            path: self.dir.clone(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| JournalError::Read {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if is_temp_file(&path) || path.extension().is_none_or(|ext| ext != ENTRY_EXTENSION) {
                continue;
            }
            paths.push(path);
        }
        Ok(paths)
    }

    fn read_all(&self) -> Result<Vec<JournalEntry>> {
        let mut entries = Vec::new();
        for path in self.entry_paths()? {
            match read_entry(&path) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => {
                    error!(path = %path.display(), error = %e, "skipping unreadable journal entry");
                }
            }
        }
        entries.sort_by_key(|e| e.transaction.created_at);
        Ok(entries)
    }
}

fn read_entry(path: &Path) -> Result<Option<JournalEntry>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(JournalError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let entry: JournalEntry =
        serde_json::from_slice(&content).map_err(|source| JournalError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if entry.format_version > JOURNAL_FORMAT_VERSION {
        return Err(JournalError::UnsupportedFormat {
            path: path.to_path_buf(),
            version: entry.format_version,
        });
    }

    Ok(Some(entry))
}

fn write_entry(path: &Path, entry: &JournalEntry) -> Result<()> {
    let data =
        serde_json::to_vec_pretty(entry).map_err(|source| JournalError::Serialize {
            id: entry.transaction.id,
            source,
        })?;
    atomic_write(path, &data).map_err(|source| JournalError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl JournalStore for FileSystemJournalStore {
    async fn begin(&self, transaction: &Transaction) -> Result<()> {
        let entry = JournalEntry::begin(transaction.clone())?;
        let id = transaction.id;

        self.blocking(move |inner| {
            let _guard = inner
                .write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let path = inner.entry_path(id);
            if path.exists() {
                return Err(JournalError::AlreadyExists(id));
            }
            write_entry(&path, &entry)
        })
        .await?;

        debug!(transaction = %id, steps = transaction.steps.len(), "journal entry begun");
        Ok(())
    }

    async fn set_status(&self, id: TransactionId, status: TransactionStatus) -> Result<()> {
        self.update(id, move |entry| entry.set_status(status)).await
    }

    async fn record_step_result(
        &self,
        id: TransactionId,
        index: usize,
        update: StepUpdate,
    ) -> Result<()> {
        self.update(id, move |entry| entry.record_step(index, &update))
            .await
    }

    async fn record_checkpoint(
        &self,
        id: TransactionId,
        index: usize,
        checkpoint: StepCheckpoint,
    ) -> Result<()> {
        self.update(id, move |entry| entry.record_checkpoint(index, checkpoint))
            .await
    }

    async fn complete(&self, id: TransactionId, status: TransactionStatus) -> Result<()> {
        self.update(id, move |entry| entry.complete(status)).await?;
        debug!(transaction = %id, %status, "journal entry completed");
        Ok(())
    }

    async fn load(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.blocking(move |inner| {
            Ok(read_entry(&inner.entry_path(id))?.map(|entry| entry.transaction))
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Transaction>> {
        self.blocking(|inner| {
            Ok(inner
                .read_all()?
                .into_iter()
                .map(|entry| entry.transaction)
                .collect())
        })
        .await
    }

    async fn prune(&self, id: TransactionId) -> Result<bool> {
        self.blocking(move |inner| {
            let _guard = inner
                .write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let path = inner.entry_path(id);
            let Some(entry) = read_entry(&path)? else {
                return Ok(false);
            };
            if !entry.transaction.is_terminal() {
                return Err(JournalError::NotTerminal {
                    id,
                    status: entry.transaction.status,
                });
            }
            remove_durably(&path).map_err(|source| JournalError::Write { path, source })
        })
        .await
    }

    async fn prune_expired(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.blocking(move |inner| {
            let _guard = inner
                .write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut removed = 0;
            for entry in inner.read_all()? {
                if !entry.is_expired(older_than) {
                    continue;
                }
                let path = inner.entry_path(entry.transaction.id);
                if remove_durably(&path).map_err(|source| JournalError::Write { path, source })? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
    }
}
