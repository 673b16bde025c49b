//! Saga coordination for filesaga batches.
//!
//! A batch runs as a saga: every step is journaled, and when one fails the
//! steps already applied are compensated in reverse order (LIFO). The
//! [`RecoveryRunner`] finishes whatever a crash interrupted, using the same
//! [`RollbackPlanner`].
//!
//! # Example
//!
//! ```no_run
//! use filesaga_core::{EngineConfig, OperationRequest};
//! use filesaga_saga::Engine;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (engine, _recovery) = Engine::open(EngineConfig::with_journal_dir("/tmp/journal")).await?;
//! let outcome = engine
//!     .coordinator()
//!     .execute(vec![OperationRequest::move_file("/tmp/a.txt", "/tmp/sorted/a.txt")])
//!     .await;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

mod audit;
mod cancel;
mod coordinator;
mod engine;
mod error;
mod notify;
mod planner;
mod recovery;

pub use audit::{AuditRecord, AuditStatus, BatchAuditLog};
pub use cancel::CancelToken;
pub use coordinator::{PreparedBatch, SagaCoordinator};
pub use engine::Engine;
pub use error::{CompensationError, EngineError};
pub use notify::{NotifyError, PathIndex, PathUpdate, UndoHistory};
pub use planner::{RollbackOutcome, RollbackPlan, RollbackPlanner};
pub use recovery::{RecoveredTransaction, RecoveryFailure, RecoveryReport, RecoveryRunner};
