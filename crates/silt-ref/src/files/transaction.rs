//! The files-backend commit protocol.
//!
//! The protocol, per transaction:
//! 1. Acquire lock files for every updated ref, in sorted name order
//! 2. Under each lock, read the current value and verify the CAS condition
//! 3. Write new values to the lock files
//! 4. Write reflog entries, then commit each lock (atomic rename)
//! 5. Rewrite packed-refs once if any deletion touched it
//!
//! If any step fails, every unreleased lock rolls back via Drop and the
//! on-disk state is untouched except for renames already performed —
//! readers may observe a partial-commit window, which is this backend's
//! documented isolation level.

use std::io::Write;

use bstr::{BStr, ByteSlice};
use silt_hash::ObjectId;
use silt_utils::date::Signature;
use silt_utils::lockfile::LockFile;

use crate::error::RefError;
use crate::files::{loose, packed::PackedRefs, reflog as files_reflog, FilesBackend};
use crate::reflog::ReflogEntry;
use crate::resolve::{resolve_raw, ResolveFlags};
use crate::transaction::{
    check_duplicate_names, sorted_update_order, RefTransaction, UpdateFlags,
};

pub(crate) fn commit_transaction(
    backend: &FilesBackend,
    tx: &mut RefTransaction,
    identity: &Signature,
) -> Result<(), RefError> {
    if tx.is_empty() {
        return Ok(());
    }

    let names = check_duplicate_names(&tx.updates)?;
    let order = sorted_update_order(&tx.updates);
    let git_dir = backend.git_dir().to_path_buf();
    let packed = PackedRefs::load(&git_dir)?;

    let mut locks: Vec<Option<LockFile>> = tx.updates.iter().map(|_| None).collect();

    // Phase 1: lock in sorted order, read current values, verify CAS.
    for &i in &order {
        let update = &tx.updates[i];
        let name = update.name.as_bstr();

        if update.flags.contains(UpdateFlags::BROKEN) {
            return Err(RefError::Generic(format!(
                "cannot lock ref '{}': reference is broken",
                name.to_str_lossy()
            )));
        }

        let path = loose::loose_ref_path(&git_dir, name);
        ensure_ref_parent_dirs(&git_dir, name)?;
        let lock = LockFile::acquire(&path)?;

        let exists = match backend.read_raw_with(&packed, name) {
            Ok(raw) => raw.is_some(),
            Err(RefError::Broken(_)) => true,
            Err(e) => return Err(e),
        };

        let mut rflags = ResolveFlags::ALLOW_BAD_NAME;
        if matches!(update.old, Some(o) if !o.is_null()) {
            rflags |= ResolveFlags::READING;
        }
        let current = match resolve_raw(
            |n: &BStr| backend.read_raw_with(&packed, n),
            name,
            rflags,
        ) {
            Ok(res) if res.oid.is_null() => None,
            Ok(res) => Some(res.oid),
            Err(RefError::NotFound(_)) if update.old.is_none() => None,
            Err(RefError::NotFound(_)) => {
                return Err(RefError::CasMismatch {
                    name: name.to_str_lossy().into_owned(),
                    expected: update.old.unwrap(),
                    actual: ObjectId::NULL,
                })
            }
            Err(RefError::Broken(_)) if update.is_deletion() => None,
            Err(e) => return Err(e),
        };

        match update.old {
            None => {}
            Some(o) if o.is_null() => {
                if exists {
                    return Err(RefError::AlreadyExists {
                        name: name.to_str_lossy().into_owned(),
                    });
                }
            }
            Some(o) => match current {
                Some(c) if c == o => {}
                other => {
                    return Err(RefError::CasMismatch {
                        name: name.to_str_lossy().into_owned(),
                        expected: o,
                        actual: other.unwrap_or(ObjectId::NULL),
                    })
                }
            },
        }

        if !exists
            && !update.is_deletion()
            && !update.flags.contains(UpdateFlags::LOG_ONLY)
        {
            backend.verify_available_with(&packed, name, &[], &names)?;
        }

        if tx.updates[i].read_oid.is_none() {
            tx.updates[i].read_oid = current;
        }
        locks[i] = Some(lock);
    }

    // Phase 2: write values and reflog entries under the locks, then commit
    // each lock.
    let mut packed = packed;
    let mut packed_changed = false;

    for (i, update) in tx.updates.iter().enumerate() {
        let name = update.name.as_bstr();
        let lock = locks[i].take().expect("lock held for every update");
        let old_oid = update.read_oid.unwrap_or(ObjectId::NULL);

        if update.flags.contains(UpdateFlags::LOG_ONLY) {
            if let Some(new) = update.new {
                log_ref_write(backend, name, old_oid, new, update.message.as_deref(), identity)?;
            }
            lock.rollback()?;
        } else if update.is_deletion() {
            lock.rollback()?;
            loose::delete_loose_ref(&git_dir, name)?;
            if packed.remove(name) {
                packed_changed = true;
            }
            files_reflog::delete_reflog(&git_dir, name)?;
        } else if let Some(new) = update.new {
            let mut lock = lock;
            lock.write_all(format!("{}\n", new.to_hex()).as_bytes())
                .map_err(|e| RefError::IoPath {
                    path: lock.path().to_path_buf(),
                    source: e,
                })?;
            log_ref_write(backend, name, old_oid, new, update.message.as_deref(), identity)?;
            lock.commit()?;
        } else {
            // Verify-only: the CAS check in phase 1 was the whole point.
            lock.rollback()?;
        }
    }

    if packed_changed {
        packed.write(&git_dir)?;
    }

    Ok(())
}

/// Commit for fresh-repository creation: no per-ref existence checks, all
/// refs land in packed-refs directly, no reflogs.
pub(crate) fn initial_commit(
    backend: &FilesBackend,
    tx: &mut RefTransaction,
) -> Result<(), RefError> {
    let names = check_duplicate_names(&tx.updates)?;

    for update in &tx.updates {
        assert!(
            update.old.map_or(true, |o| o.is_null()),
            "BUG: initial ref transaction with old value set"
        );
    }

    let mut packed = PackedRefs::load(backend.git_dir())?;
    for update in &tx.updates {
        let name = update.name.as_bstr();
        backend.verify_available_with(&packed, name, &[], &names)?;
        match update.new {
            Some(new) if !new.is_null() => {
                packed.upsert(update.name.clone(), new, None);
            }
            _ => {
                return Err(RefError::Generic(format!(
                    "initial transaction may only create refs, not '{}'",
                    name.to_str_lossy()
                )))
            }
        }
    }
    packed.write(backend.git_dir())?;
    Ok(())
}

/// Create the parent directories a loose ref needs. A plain file sitting
/// where a directory must go is a directory/file conflict, reported as such
/// rather than as an I/O failure.
pub(crate) fn ensure_ref_parent_dirs(
    git_dir: &std::path::Path,
    name: &BStr,
) -> Result<(), RefError> {
    let bytes = name.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'/' {
            continue;
        }
        let prefix = bytes[..i].as_bstr();
        let path = loose::loose_ref_path(git_dir, prefix);
        if path.is_file() {
            return Err(RefError::NameConflict {
                name: name.to_str_lossy().into_owned(),
                conflict: prefix.to_str_lossy().into_owned(),
            });
        }
        match std::fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(RefError::IoPath { path, source: e }),
        }
    }
    Ok(())
}

/// Append a reflog entry for one transition, honoring auto-creation.
pub(crate) fn log_ref_write(
    backend: &FilesBackend,
    name: &BStr,
    old_oid: ObjectId,
    new_oid: ObjectId,
    message: Option<&str>,
    identity: &Signature,
) -> Result<(), RefError> {
    let entry = ReflogEntry::new(old_oid, new_oid, identity.clone(), message);
    files_reflog::append_entry(
        backend.git_dir(),
        name,
        &entry,
        backend.should_autocreate_reflog(name),
    )
}
