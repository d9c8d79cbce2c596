use std::path::PathBuf;

use silt_hash::ObjectId;

/// Error types for reference operations.
///
/// Backends report failures through these variants; the coordinator surfaces
/// the first error and aborts the transaction. Warnings travel separately as
/// [`RefWarning`] — fatal and non-fatal outcomes are never merged into one
/// stream.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("invalid ref name: {0}")]
    BadName(String),

    #[error("ref not found: {0}")]
    NotFound(String),

    /// CAS failure: the ref did not have the expected old value.
    #[error("cannot lock ref '{name}': is at {actual} but expected {expected}")]
    CasMismatch {
        name: String,
        expected: ObjectId,
        actual: ObjectId,
    },

    /// A ref that was expected to be absent exists.
    #[error("cannot lock ref '{name}': ref already exists")]
    AlreadyExists { name: String },

    #[error("'{conflict}' exists; cannot create '{name}'")]
    NameConflict { name: String, conflict: String },

    #[error("broken ref: {0}")]
    Broken(String),

    #[error("symbolic ref chain too deep resolving {0}")]
    TooDeep(String),

    #[error("{0}")]
    Generic(String),

    #[error("reflog error: {0}")]
    Reflog(String),

    #[error("lock file error: {0}")]
    Lock(#[from] silt_utils::LockError),

    #[error("{0}")]
    Util(#[from] silt_utils::UtilError),

    #[error("config error: {0}")]
    Config(#[from] silt_config::ConfigError),

    #[error(transparent)]
    Hash(#[from] silt_hash::HashError),

    #[error("key-value store error: {0}")]
    Kv(#[from] redb::Error),

    #[error("I/O error on {path}: {source}")]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Non-fatal conditions reported alongside a successful operation.
///
/// These are also emitted on the `tracing` warn stream; the typed value lets
/// callers react programmatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefWarning {
    /// A transaction was split across two backends and the second commit
    /// failed after the first succeeded.
    SplitTransaction { detail: String },
}

/// The text of the split-transaction warning, verbatim.
pub const SPLIT_TRANSACTION_WARNING: &str = "A ref transaction was split across two refs backends. \
Part of the transaction succeeded, but then the update to the per-worktree refs failed. \
Your repository may be in an inconsistent state.";
