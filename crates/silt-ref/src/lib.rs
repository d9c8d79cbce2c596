//! Reference storage for the silt version control system.
//!
//! This crate maps human-readable reference names (branches, tags,
//! remote-tracking refs, `HEAD`, pseudorefs) to object ids and records the
//! history every reference has held (its reflog).
//!
//! Storage is pluggable behind the [`RefBackend`] contract:
//!
//! - [`FilesBackend`] — loose files under `refs/` plus a `packed-refs`
//!   catalog, with lockfile-based compare-and-set; the default.
//! - [`RedbBackend`] — refs and reflog entries as keys in an embedded
//!   ordered key-value store with snapshot-isolated transactions.
//!
//! [`RefStore`] is the front door: it selects the backend from
//! `extensions.refstorage`, routes per-worktree refs and pseudorefs to the
//! files backend regardless of the selection, and runs the multi-update
//! commit pipeline with its symref dereference pass.

mod backend;
mod error;
pub mod files;
mod iter;
pub mod kv;
mod name;
mod pseudoref;
pub mod reflog;
mod registry;
mod resolve;
mod store;
mod transaction;

pub use backend::{IterFlags, RawRef, RefBackend};
pub use error::{RefError, RefWarning, SPLIT_TRANSACTION_WARNING};
pub use files::FilesBackend;
pub use kv::RedbBackend;
pub use name::{check_refname_format, refname_is_safe, CheckFlags, RefKind, RefName};
pub use reflog::{fold_message, ExpireFlags, ReflogEntry};
pub use registry::{
    configured_backend_name, validate_submodule_backend, BackendRegistry, DEFAULT_BACKEND,
};
pub use resolve::{RefFlags, ResolveFlags, ResolvedRef, MAX_SYMREF_DEPTH};
pub use store::{CommitOutcome, RefStore};
pub use transaction::{RefTransaction, RefUpdate, TxnState, UpdateFlags};
