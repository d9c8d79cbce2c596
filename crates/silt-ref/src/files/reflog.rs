//! Per-ref reflog files under `logs/`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use silt_utils::lockfile::LockFile;

use crate::error::RefError;
use crate::reflog::ReflogEntry;

/// The reflog file path for a ref.
pub(crate) fn log_path(git_dir: &Path, name: &BStr) -> PathBuf {
    let mut path = git_dir.join("logs");
    for component in name.split_str(b"/") {
        path.push(component.to_str_lossy().as_ref());
    }
    path
}

pub(crate) fn reflog_exists(git_dir: &Path, name: &BStr) -> bool {
    log_path(git_dir, name).is_file()
}

/// Create an empty reflog file (and parents). Idempotent.
pub(crate) fn create_reflog(git_dir: &Path, name: &BStr) -> Result<(), RefError> {
    let path = log_path(git_dir, name);
    if path.is_file() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| RefError::IoPath { path, source: e })?;
    Ok(())
}

/// Remove a reflog file and prune now-empty parents under `logs/`.
pub(crate) fn delete_reflog(git_dir: &Path, name: &BStr) -> Result<(), RefError> {
    let path = log_path(git_dir, name);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(RefError::IoPath { path, source: e }),
    }

    let logs_dir = git_dir.join("logs");
    let mut dir = path.parent().map(|p| p.to_path_buf());
    while let Some(d) = dir {
        if d == logs_dir || d == *git_dir {
            break;
        }
        if d.read_dir().map(|mut e| e.next().is_none()).unwrap_or(false) {
            let _ = fs::remove_dir(&d);
            dir = d.parent().map(|p| p.to_path_buf());
        } else {
            break;
        }
    }
    Ok(())
}

/// Append one entry. Without `autocreate`, a missing log file means the
/// entry is silently not recorded (the ref does not keep a log).
pub(crate) fn append_entry(
    git_dir: &Path,
    name: &BStr,
    entry: &ReflogEntry,
    autocreate: bool,
) -> Result<(), RefError> {
    let path = log_path(git_dir, name);
    if !path.is_file() {
        if !autocreate {
            return Ok(());
        }
        create_reflog(git_dir, name)?;
    }

    let mut line = entry.to_bytes();
    line.push(b'\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| RefError::IoPath {
            path: path.clone(),
            source: e,
        })?;
    file.write_all(&line).map_err(|e| RefError::IoPath {
        path,
        source: e,
    })?;
    Ok(())
}

/// Read every entry, oldest first. A missing file is an empty log.
pub(crate) fn read_entries(git_dir: &Path, name: &BStr) -> Result<Vec<ReflogEntry>, RefError> {
    let path = log_path(git_dir, name);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RefError::IoPath { path, source: e }),
    };

    let mut entries = Vec::new();
    for line in data.lines() {
        if line.is_empty() {
            continue;
        }
        entries.push(ReflogEntry::parse(line.as_bstr())?);
    }
    Ok(entries)
}

/// Replace the log's contents atomically: write survivors to the lock file
/// and rename over.
pub(crate) fn write_entries(
    git_dir: &Path,
    name: &BStr,
    entries: &[ReflogEntry],
) -> Result<(), RefError> {
    let path = log_path(git_dir, name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let mut lock = LockFile::acquire(&path)?;
    let mut out: Vec<u8> = Vec::new();
    for entry in entries {
        out.extend_from_slice(&entry.to_bytes());
        out.push(b'\n');
    }
    lock.write_all(&out).map_err(|e| RefError::IoPath {
        path: path.clone(),
        source: e,
    })?;
    lock.commit()?;
    Ok(())
}

/// Every ref that has a reflog file, sorted.
pub(crate) fn enumerate_reflogs(git_dir: &Path) -> Result<Vec<BString>, RefError> {
    let logs_dir = git_dir.join("logs");
    let mut result = Vec::new();
    if logs_dir.is_dir() {
        collect_recursive(&logs_dir, &logs_dir, &mut result)?;
    }
    result.sort();
    Ok(result)
}

fn collect_recursive(
    logs_dir: &Path,
    dir: &Path,
    result: &mut Vec<BString>,
) -> Result<(), RefError> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(RefError::IoPath {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };
    for entry in entries {
        let entry = entry.map_err(|e| RefError::IoPath {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(logs_dir, &path, result)?;
        } else if let Ok(rel) = path.strip_prefix(logs_dir) {
            let name = rel.to_string_lossy().replace('\\', "/");
            if !name.ends_with(".lock") {
                result.push(BString::from(name.into_bytes()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BString;
    use silt_hash::ObjectId;
    use silt_utils::date::{Signature, SiltDate};

    fn sig() -> Signature {
        Signature {
            name: BString::from("Test User"),
            email: BString::from("test@example.com"),
            date: SiltDate::new(1234567890, 0),
        }
    }

    fn entry(old: char, new: char, msg: &str) -> ReflogEntry {
        ReflogEntry::new(
            ObjectId::from_hex(old.to_string().repeat(40)).unwrap(),
            ObjectId::from_hex(new.to_string().repeat(40)).unwrap(),
            sig(),
            Some(msg),
        )
    }

    #[test]
    fn append_without_log_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let name = b"refs/heads/main".as_bstr();
        append_entry(dir.path(), name, &entry('0', 'a', "one"), false).unwrap();
        assert!(!reflog_exists(dir.path(), name));
        assert!(read_entries(dir.path(), name).unwrap().is_empty());
    }

    #[test]
    fn append_autocreates_and_reads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let name = b"refs/heads/main".as_bstr();
        append_entry(dir.path(), name, &entry('0', 'a', "one"), true).unwrap();
        append_entry(dir.path(), name, &entry('a', 'b', "two"), true).unwrap();

        assert!(reflog_exists(dir.path(), name));
        let entries = read_entries(dir.path(), name).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, BString::from("one"));
        assert_eq!(entries[1].message, BString::from("two"));
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let name = b"refs/heads/main".as_bstr();
        append_entry(dir.path(), name, &entry('0', 'a', "one"), true).unwrap();
        append_entry(dir.path(), name, &entry('a', 'b', "two"), true).unwrap();

        write_entries(dir.path(), name, &[entry('0', 'a', "one")]).unwrap();
        let entries = read_entries(dir.path(), name).unwrap();
        assert_eq!(entries.len(), 1);

        // Keeping nothing leaves an empty file: the log still exists.
        write_entries(dir.path(), name, &[]).unwrap();
        assert!(reflog_exists(dir.path(), name));
        assert!(read_entries(dir.path(), name).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_file_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let name = b"refs/heads/feature/x".as_bstr();
        append_entry(dir.path(), name, &entry('0', 'a', "one"), true).unwrap();
        delete_reflog(dir.path(), name).unwrap();
        assert!(!reflog_exists(dir.path(), name));
        assert!(!dir.path().join("logs/refs/heads/feature").exists());
    }

    #[test]
    fn enumerate_includes_head_and_branches() {
        let dir = tempfile::tempdir().unwrap();
        append_entry(dir.path(), b"HEAD".as_bstr(), &entry('0', 'a', ""), true).unwrap();
        append_entry(
            dir.path(),
            b"refs/heads/main".as_bstr(),
            &entry('0', 'a', ""),
            true,
        )
        .unwrap();

        let logs = enumerate_reflogs(dir.path()).unwrap();
        assert_eq!(logs, vec!["HEAD", "refs/heads/main"]);
    }
}
