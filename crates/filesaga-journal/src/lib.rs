//! Write-ahead journal for filesaga transactions.
//!
//! An entry is durable before the first filesystem mutation of its
//! transaction and stays until its terminal status is recorded, which is
//! what makes crash recovery possible.

mod entry;
mod error;
mod fs_store;
pub mod io;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod store;

pub use entry::{JOURNAL_FORMAT_VERSION, JournalEntry};
pub use error::JournalError;
pub use fs_store::FileSystemJournalStore;
#[cfg(any(test, feature = "testing"))]
pub use memory::{InMemoryJournalStore, WriteKind};
pub use store::{JournalStore, StepCursor, StepUpdate};

pub type Result<T> = std::result::Result<T, JournalError>;
