//! Loose ref files: one small file per ref under the repository directory.

use std::fs;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use silt_hash::ObjectId;

use crate::backend::RawRef;
use crate::error::RefError;
use crate::name::{check_refname_format, CheckFlags};

/// The filesystem path of a loose ref. One-level names (`HEAD`,
/// `FETCH_HEAD`) land directly in the repository directory.
pub(crate) fn loose_ref_path(git_dir: &Path, name: &BStr) -> PathBuf {
    let mut path = git_dir.to_path_buf();
    for component in name.split_str(b"/") {
        path.push(component.to_str_lossy().as_ref());
    }
    path
}

/// Classify the content of a loose ref file.
///
/// Accepted forms are `<40hex>` and `ref: <target>`, each with an optional
/// trailing newline. Leading whitespace is rejected in both arms; whitespace
/// after `ref:` is skipped. Anything else is a broken ref.
pub(crate) fn parse_loose_content(name: &BStr, data: &[u8]) -> Result<RawRef, RefError> {
    let broken = || RefError::Broken(name.to_str_lossy().into_owned());

    if let Some(rest) = data.strip_prefix(b"ref:") {
        let target = rest
            .trim_start_with(|c| c == ' ' || c == '\t')
            .trim_end()
            .as_bstr();
        if target.is_empty() {
            return Err(broken());
        }
        return Ok(RawRef::Symbolic(BString::from(target)));
    }

    let trimmed = data.trim_end();
    match ObjectId::from_hex(trimmed) {
        Ok(oid) => Ok(RawRef::Object(oid)),
        Err(_) => Err(broken()),
    }
}

/// Read one loose ref. `Ok(None)` when no loose file exists; `Err(Broken)`
/// when the content cannot be classified.
pub(crate) fn read_loose_ref(git_dir: &Path, name: &BStr) -> Result<Option<RawRef>, RefError> {
    let path = loose_ref_path(git_dir, name);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        // A directory here means "no loose ref", not an error: the name may
        // be a prefix of other refs.
        Err(_) if path.is_dir() => return Ok(None),
        Err(e) => {
            return Err(RefError::IoPath {
                path,
                source: e,
            })
        }
    };
    parse_loose_content(name, &data).map(Some)
}

/// Delete a loose ref file and prune now-empty parent directories up to
/// (not including) `refs/`.
pub(crate) fn delete_loose_ref(git_dir: &Path, name: &BStr) -> Result<(), RefError> {
    let path = loose_ref_path(git_dir, name);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(RefError::IoPath {
                path,
                source: e,
            })
        }
    }

    let refs_dir = git_dir.join("refs");
    let mut dir = path.parent().map(|p| p.to_path_buf());
    while let Some(d) = dir {
        if d == refs_dir || d == *git_dir {
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

/// Enumerate loose ref names under `base` (a name prefix such as
/// `refs/heads/`), sorted. Only names under `refs/` are walked; `.lock`
/// droppings and names that fail validation are skipped.
pub(crate) fn enumerate_loose_refs(
    git_dir: &Path,
    base: &BStr,
) -> Result<Vec<BString>, RefError> {
    let refs_base = git_dir.join("refs");
    let search_dir = {
        let sub = base
            .as_bytes()
            .strip_prefix(b"refs/")
            .unwrap_or(base.as_bytes());
        // Walk from the deepest complete directory of the prefix.
        let dir_part = match sub.rfind_byte(b'/') {
            Some(pos) => &sub[..pos],
            None => b"",
        };
        if dir_part.is_empty() {
            refs_base.clone()
        } else {
            refs_base.join(dir_part.to_str_lossy().as_ref())
        }
    };

    let mut result = Vec::new();
    if search_dir.is_dir() {
        collect_recursive(git_dir, &search_dir, &mut result)?;
    }
    result.retain(|name| name.starts_with(base.as_bytes()));
    result.sort();
    Ok(result)
}

fn collect_recursive(
    git_dir: &Path,
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
            collect_recursive(git_dir, &path, result)?;
            continue;
        }

        let rel = path
            .strip_prefix(git_dir)
            .map_err(|_| RefError::Generic("ref path outside repository".into()))?;
        let name = BString::from(rel.to_string_lossy().replace('\\', "/").into_bytes());

        if name.ends_with(b".lock") {
            continue;
        }
        if check_refname_format(name.as_bstr(), CheckFlags::ALLOW_ONELEVEL) {
            result.push(name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_direct() {
        let raw = parse_loose_content(
            b"refs/heads/main".as_bstr(),
            b"da39a3ee5e6b4b0d3255bfef95601890afd80709\n",
        )
        .unwrap();
        assert_eq!(
            raw,
            RawRef::Object(
                ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap()
            )
        );
    }

    #[test]
    fn parse_symbolic() {
        let raw =
            parse_loose_content(b"HEAD".as_bstr(), b"ref: refs/heads/main\n").unwrap();
        assert_eq!(raw, RawRef::Symbolic(BString::from("refs/heads/main")));
    }

    #[test]
    fn parse_symbolic_extra_spaces_after_colon() {
        let raw =
            parse_loose_content(b"HEAD".as_bstr(), b"ref:   refs/heads/main\n").unwrap();
        assert_eq!(raw, RawRef::Symbolic(BString::from("refs/heads/main")));
    }

    #[test]
    fn parse_rejects_leading_whitespace() {
        assert!(parse_loose_content(
            b"refs/heads/main".as_bstr(),
            b" da39a3ee5e6b4b0d3255bfef95601890afd80709\n",
        )
        .is_err());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_loose_content(b"refs/heads/main".as_bstr(), b"not an oid\n").is_err());
        assert!(parse_loose_content(b"HEAD".as_bstr(), b"ref: \n").is_err());
    }

    #[test]
    fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_loose_ref(dir.path(), b"refs/heads/none".as_bstr())
            .unwrap()
            .is_none());
    }

    #[test]
    fn read_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("refs/heads/main")).unwrap();
        assert!(read_loose_ref(dir.path(), b"refs/heads/main".as_bstr())
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_prunes_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("refs/heads/feature");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("x"), b"da39a3ee5e6b4b0d3255bfef95601890afd80709\n").unwrap();

        delete_loose_ref(dir.path(), b"refs/heads/feature/x".as_bstr()).unwrap();
        assert!(!nested.exists());
        assert!(dir.path().join("refs").exists());
    }

    #[test]
    fn enumerate_sorted_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["refs/heads/b", "refs/heads/a", "refs/tags/v1"] {
            let path = loose_ref_path(dir.path(), name.as_bytes().as_bstr());
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"da39a3ee5e6b4b0d3255bfef95601890afd80709\n").unwrap();
        }

        let all = enumerate_loose_refs(dir.path(), b"refs/".as_bstr()).unwrap();
        assert_eq!(all, vec!["refs/heads/a", "refs/heads/b", "refs/tags/v1"]);

        let heads = enumerate_loose_refs(dir.path(), b"refs/heads/".as_bstr()).unwrap();
        assert_eq!(heads, vec!["refs/heads/a", "refs/heads/b"]);

        let partial = enumerate_loose_refs(dir.path(), b"refs/heads/a".as_bstr()).unwrap();
        assert_eq!(partial, vec!["refs/heads/a"]);
    }

    #[test]
    fn enumerate_skips_lock_files() {
        let dir = tempfile::tempdir().unwrap();
        let heads = dir.path().join("refs/heads");
        fs::create_dir_all(&heads).unwrap();
        fs::write(heads.join("main"), b"da39a3ee5e6b4b0d3255bfef95601890afd80709\n").unwrap();
        fs::write(heads.join("main.lock"), b"").unwrap();

        let all = enumerate_loose_refs(dir.path(), b"refs/".as_bstr()).unwrap();
        assert_eq!(all, vec!["refs/heads/main"]);
    }
}
