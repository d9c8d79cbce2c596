//! The backend contract: the operation set every storage engine supplies.
//!
//! The coordinator and the iteration facade consume this trait; backend
//! identity is not exposed outside the registry and the coordinator.

use bstr::{BStr, BString};
use silt_hash::ObjectId;
use silt_utils::date::Signature;

use crate::error::RefError;
use crate::reflog::{ExpireFlags, ReflogEntry};
use crate::resolve::RefFlags;
use crate::transaction::RefTransaction;

/// The raw, single-hop value of a ref: either a direct object id or the
/// unvalidated name of another ref. Symbolic targets stay as raw bytes —
/// whether they are legal names is the resolver's call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRef {
    Object(ObjectId),
    Symbolic(BString),
}

bitflags::bitflags! {
    /// Flags for ref iteration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IterFlags: u32 {
        /// Pass through refs that would otherwise be skipped as broken.
        const INCLUDE_BROKEN = 0x01;
    }
}

/// Callback for ref iteration. A non-zero return stops the iteration and
/// becomes its result.
pub type EachRefFn<'a> = dyn FnMut(&BStr, &ObjectId, RefFlags) -> i32 + 'a;

/// Callback for reflog-entry iteration, same stopping convention.
pub type EachReflogEntFn<'a> = dyn FnMut(&ReflogEntry) -> i32 + 'a;

/// Predicate for reflog expiry: true keeps the entry.
pub type ReflogKeepFn<'a> = dyn FnMut(&ReflogEntry) -> bool + 'a;

/// A pluggable reference storage engine.
///
/// Engines store normal refs however they like; the semantics each operation
/// must provide are fixed. Transactions reach an engine only through
/// [`RefBackend::commit`] — staging happens in the engine-independent
/// [`RefTransaction`].
pub trait RefBackend: Send + Sync {
    /// The registry name of this backend (`"files"`, `"redb"`, …).
    fn name(&self) -> &'static str;

    /// Create empty storage. Idempotent.
    fn init_db(&self) -> Result<(), RefError>;

    /// Read one ref without following symbolic targets.
    ///
    /// Returns `Ok(None)` when the ref does not exist and `Err(Broken)` when
    /// its stored value cannot be classified.
    fn read_raw_ref(&self, name: &BStr) -> Result<Option<RawRef>, RefError>;

    /// Apply a prepared transaction. Updates are applied in sorted-name
    /// order; the first failure aborts with nothing further applied (the
    /// engine's own atomicity determines what is already visible).
    fn commit(&self, tx: &mut RefTransaction, identity: &Signature) -> Result<(), RefError>;

    /// Commit without per-ref existence checks, for fresh-repository
    /// creation only.
    fn initial_commit(
        &self,
        tx: &mut RefTransaction,
        identity: &Signature,
    ) -> Result<(), RefError>;

    /// Iterate refs whose names start with `base`, in ascending name order,
    /// trimming `trim` leading bytes before invoking `f`. An empty base
    /// iterates `refs/`.
    fn for_each_ref(
        &self,
        base: &BStr,
        trim: usize,
        flags: IterFlags,
        f: &mut EachRefFn<'_>,
    ) -> Result<i32, RefError>;

    /// Fail unless `name` could be created without conflicting with an
    /// existing ref (no strict prefix or extension of it exists). Names in
    /// `extras` count as existing; names in `skip` are ignored.
    fn verify_refname_available(
        &self,
        name: &BStr,
        extras: &[BString],
        skip: &[BString],
    ) -> Result<(), RefError>;

    /// Write a symbolic ref. `log` carries an `(old, new, message)`
    /// transition to append to the ref's reflog — the coordinator resolves
    /// it, since the target may live in another backend.
    fn create_symref(
        &self,
        name: &BStr,
        target: &BStr,
        log: Option<(ObjectId, ObjectId, &str)>,
        identity: &Signature,
    ) -> Result<(), RefError>;

    /// Rename a (non-symbolic) ref, carrying its reflog across.
    fn rename_ref(
        &self,
        old_name: &BStr,
        new_name: &BStr,
        logmsg: Option<&str>,
        identity: &Signature,
    ) -> Result<(), RefError>;

    /// The peeled (tag-dereferenced) value of a ref, when the engine has one
    /// on record.
    fn peel_ref(&self, name: &BStr) -> Result<Option<ObjectId>, RefError>;

    /// Fold loose storage into the packed catalog. Engines without the
    /// loose/packed distinction do nothing.
    fn pack_refs(&self, prune: bool) -> Result<(), RefError>;

    /// Delete several refs, best effort, with their reflogs.
    fn delete_refs(&self, names: &[BString]) -> Result<(), RefError>;

    // Reflog operations.

    /// Does a reflog exist for `name`?
    fn reflog_exists(&self, name: &BStr) -> Result<bool, RefError>;

    /// Create an empty reflog. Without `force`, only names that qualify for
    /// auto-creation get one.
    fn create_reflog(&self, name: &BStr, force: bool) -> Result<(), RefError>;

    /// Remove the reflog (header and entries) for `name`.
    fn delete_reflog(&self, name: &BStr) -> Result<(), RefError>;

    /// Invoke `f` for every ref that has a reflog.
    fn for_each_reflog(&self, f: &mut dyn FnMut(&BStr) -> i32) -> Result<i32, RefError>;

    /// Iterate reflog entries, oldest first.
    fn for_each_reflog_ent(
        &self,
        name: &BStr,
        f: &mut EachReflogEntFn<'_>,
    ) -> Result<i32, RefError>;

    /// Iterate reflog entries, newest first.
    fn for_each_reflog_ent_reverse(
        &self,
        name: &BStr,
        f: &mut EachReflogEntFn<'_>,
    ) -> Result<i32, RefError>;

    /// Drop reflog entries the predicate declines to keep. `UPDATE_REF`
    /// additionally moves a non-symbolic ref to the last kept new-value when
    /// at least one entry survives.
    fn reflog_expire(
        &self,
        name: &BStr,
        flags: ExpireFlags,
        keep: &mut ReflogKeepFn<'_>,
        identity: &Signature,
    ) -> Result<(), RefError>;
}
