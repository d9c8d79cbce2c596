//! The engine-independent transaction object.
//!
//! A transaction accumulates pending updates while `Open`, is handed to the
//! coordinator on commit (`Prepared`), and ends `Closed` whether the commit
//! succeeded or not. Dropping an uncommitted transaction discards everything.

use bstr::{BString, ByteSlice};
use silt_hash::ObjectId;

use crate::error::RefError;
use crate::name::{check_refname_format, CheckFlags};

bitflags::bitflags! {
    /// Per-update flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateFlags: u32 {
        /// Operate on the symref itself, not its pointee.
        const NODEREF = 0x01;
        /// Write only a reflog entry, not the ref.
        const LOG_ONLY = 0x02;
        /// Derived: the new value is the null OID.
        const DELETING = 0x04;
        /// The caller knows this ref is not the current HEAD target.
        const IS_NOT_HEAD = 0x08;
        /// Internal: suppress the reflog entry (value unchanged).
        const NO_REFLOG = 0x10;
        /// Internal: the symref dereference pass failed on this update;
        /// the backend reports it at commit time.
        const BROKEN = 0x20;
    }
}

/// One staged update: `(refname, new?, old?, flags, message?)`.
///
/// `new == None` is a verify-only update; `new == Some(NULL)` is a deletion.
/// `old == None` means no expectation; `old == Some(NULL)` means the ref must
/// not exist; any other `old` must equal the current value at commit time.
#[derive(Debug, Clone)]
pub struct RefUpdate {
    pub name: BString,
    pub new: Option<ObjectId>,
    pub old: Option<ObjectId>,
    pub flags: UpdateFlags,
    pub message: Option<String>,
    /// The value read during the coordinator's dereference pass or under the
    /// backend's lock; feeds the reflog old-value.
    pub(crate) read_oid: Option<ObjectId>,
}

impl RefUpdate {
    pub fn is_deletion(&self) -> bool {
        self.flags.contains(UpdateFlags::DELETING)
    }
}

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting updates.
    Open,
    /// Commit has begun.
    Prepared,
    /// Committed or aborted; the transaction is spent.
    Closed,
}

/// An atomic batch of ref updates.
#[derive(Debug)]
pub struct RefTransaction {
    pub(crate) updates: Vec<RefUpdate>,
    pub(crate) state: TxnState,
}

impl RefTransaction {
    /// Begin an empty transaction.
    pub fn new() -> Self {
        Self {
            updates: Vec::new(),
            state: TxnState::Open,
        }
    }

    pub(crate) fn from_updates(updates: Vec<RefUpdate>) -> Self {
        Self {
            updates,
            state: TxnState::Open,
        }
    }

    /// Stage an update. Fails when the name is syntactically bad while the
    /// new value is a real OID; deletions of bad-but-safe names stay
    /// possible so damage can be cleaned up.
    ///
    /// # Panics
    ///
    /// Panics if the transaction is no longer open — that is a caller bug,
    /// not an input error.
    pub fn update(
        &mut self,
        name: impl Into<BString>,
        new: Option<ObjectId>,
        old: Option<ObjectId>,
        flags: UpdateFlags,
        message: Option<&str>,
    ) -> Result<(), RefError> {
        assert!(
            self.state == TxnState::Open,
            "BUG: update called for transaction that is not open"
        );
        let name = name.into();

        let mut flags = flags
            & (UpdateFlags::NODEREF | UpdateFlags::LOG_ONLY | UpdateFlags::IS_NOT_HEAD);
        if matches!(new, Some(oid) if oid.is_null()) {
            flags |= UpdateFlags::DELETING;
        }

        if matches!(new, Some(oid) if !oid.is_null())
            && !check_refname_format(name.as_bstr(), CheckFlags::ALLOW_ONELEVEL)
        {
            return Err(RefError::Generic(format!(
                "refusing to update ref with bad name {}",
                name.to_str_lossy()
            )));
        }

        self.updates.push(RefUpdate {
            name,
            new,
            old,
            flags,
            message: message.map(String::from),
            read_oid: None,
        });
        Ok(())
    }

    /// Stage a creation: the ref must not exist.
    ///
    /// # Panics
    ///
    /// Panics if `new` is the null OID.
    pub fn create(
        &mut self,
        name: impl Into<BString>,
        new: ObjectId,
        flags: UpdateFlags,
        message: Option<&str>,
    ) -> Result<(), RefError> {
        assert!(!new.is_null(), "BUG: create called without valid new OID");
        self.update(name, Some(new), Some(ObjectId::NULL), flags, message)
    }

    /// Stage a deletion, optionally CAS-checked against `old`.
    ///
    /// # Panics
    ///
    /// Panics if `old` is exactly the null OID — "delete whatever isn't
    /// there" is meaningless.
    pub fn delete(
        &mut self,
        name: impl Into<BString>,
        old: Option<ObjectId>,
        flags: UpdateFlags,
        message: Option<&str>,
    ) -> Result<(), RefError> {
        assert!(
            old.map_or(true, |o| !o.is_null()),
            "BUG: delete called with old OID set to zeros"
        );
        self.update(name, Some(ObjectId::NULL), old, flags, message)
    }

    /// Stage a verification: the ref must currently hold `old` (the null OID
    /// verifies absence).
    pub fn verify(
        &mut self,
        name: impl Into<BString>,
        old: ObjectId,
        flags: UpdateFlags,
    ) -> Result<(), RefError> {
        self.update(name, None, Some(old), flags, None)
    }

    /// The staged updates.
    pub fn updates(&self) -> &[RefUpdate] {
        &self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn state(&self) -> TxnState {
        self.state
    }
}

impl Default for RefTransaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort the affected names and fail on any duplicate. Called per
/// sub-transaction after the dereference pass, before anything touches
/// storage.
pub(crate) fn check_duplicate_names(updates: &[RefUpdate]) -> Result<Vec<BString>, RefError> {
    let mut names: Vec<BString> = updates.iter().map(|u| u.name.clone()).collect();
    names.sort();
    for pair in names.windows(2) {
        if pair[0] == pair[1] {
            return Err(RefError::Generic(format!(
                "multiple updates for ref '{}' not allowed",
                pair[0].to_str_lossy()
            )));
        }
    }
    Ok(names)
}

/// Sorted index order of `updates` by name; backends apply (and lock) in
/// this order so concurrent transactions cannot deadlock.
pub(crate) fn sorted_update_order(updates: &[RefUpdate]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..updates.len()).collect();
    order.sort_by(|&a, &b| updates[a].name.cmp(&updates[b].name));
    order
}
