//! Shared plumbing for the silt version control system.
//!
//! Small, dependency-light helpers used across the silt crates: the lockfile
//! protocol for atomic file updates, date/identity handling for log records,
//! and glob matching for ref patterns.

pub mod date;
pub mod error;
pub mod glob;
pub mod lockfile;

pub use error::{LockError, UtilError};

pub type Result<T> = std::result::Result<T, UtilError>;
