//! Pseudorefs: `FETCH_HEAD`, `MERGE_HEAD` and friends.
//!
//! These are plain files in the repository root, written under a lockfile
//! with an optional old-value check. They bypass the ref backends entirely
//! and never carry a reflog.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bstr::{BStr, ByteSlice};
use silt_hash::ObjectId;
use silt_utils::lockfile::LockFile;

use crate::error::RefError;

fn pseudoref_path(git_dir: &Path, name: &BStr) -> PathBuf {
    git_dir.join(name.to_str_lossy().as_ref())
}

/// Read a pseudoref's OID. Files like `FETCH_HEAD` may carry annotations
/// after the OID; only the leading 40 hex characters of the first line
/// count.
pub(crate) fn read_pseudoref(git_dir: &Path, name: &BStr) -> Result<Option<ObjectId>, RefError> {
    let path = pseudoref_path(git_dir, name);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RefError::IoPath { path, source: e }),
    };
    let first_line = data.lines().next().unwrap_or(b"");
    if first_line.len() < 40 {
        return Err(RefError::Broken(name.to_str_lossy().into_owned()));
    }
    ObjectId::from_hex(&first_line[..40])
        .map(Some)
        .map_err(|_| RefError::Broken(name.to_str_lossy().into_owned()))
}

fn check_old(
    git_dir: &Path,
    name: &BStr,
    old: Option<ObjectId>,
) -> Result<(), RefError> {
    let Some(old) = old else { return Ok(()) };
    let current = read_pseudoref(git_dir, name)?;
    if old.is_null() {
        if current.is_some() {
            return Err(RefError::AlreadyExists {
                name: name.to_str_lossy().into_owned(),
            });
        }
        return Ok(());
    }
    match current {
        Some(c) if c == old => Ok(()),
        other => Err(RefError::CasMismatch {
            name: name.to_str_lossy().into_owned(),
            expected: old,
            actual: other.unwrap_or(ObjectId::NULL),
        }),
    }
}

/// Write a pseudoref under its lockfile, optionally CAS-checked.
pub(crate) fn write_pseudoref(
    git_dir: &Path,
    name: &BStr,
    oid: ObjectId,
    old: Option<ObjectId>,
) -> Result<(), RefError> {
    let path = pseudoref_path(git_dir, name);
    let mut lock = LockFile::acquire(&path)?;
    check_old(git_dir, name, old)?;
    lock.write_all(format!("{}\n", oid.to_hex()).as_bytes())
        .map_err(|e| RefError::IoPath {
            path: path.clone(),
            source: e,
        })?;
    lock.commit()?;
    Ok(())
}

/// Delete a pseudoref, optionally CAS-checked. Deleting an absent
/// pseudoref is fine unless an old value was demanded.
pub(crate) fn delete_pseudoref(
    git_dir: &Path,
    name: &BStr,
    old: Option<ObjectId>,
) -> Result<(), RefError> {
    let path = pseudoref_path(git_dir, name);
    let lock = LockFile::acquire(&path)?;
    check_old(git_dir, name, old)?;
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(RefError::IoPath { path, source: e }),
    }
    lock.rollback()?;
    Ok(())
}
