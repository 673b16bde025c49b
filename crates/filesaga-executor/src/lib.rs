//! Applies single file operations and their compensations.
//!
//! The executor owns the filesystem side of a step: preconditions, the
//! cross-device fallback for moves, per-step timeouts and the bound on
//! concurrent I/O. It records each outcome in the journal before returning.

mod compensation;
mod error;
mod executor;
mod fs_ops;

pub use compensation::{Compensation, RevertEffect};
pub use error::StepError;
pub use executor::{AppliedEffect, FileSystemStepExecutor, StepExecutor};
