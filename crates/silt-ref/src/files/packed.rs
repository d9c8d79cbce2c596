//! The packed-refs catalog: a single sorted file shadowed by loose refs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use silt_hash::ObjectId;
use silt_utils::lockfile::LockFile;

use crate::error::RefError;

/// A single entry in the packed-refs file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRef {
    pub name: BString,
    pub oid: ObjectId,
    /// The `^`-annotated peeled OID of an annotated tag.
    pub peeled: Option<ObjectId>,
}

/// Parsed packed-refs file.
///
/// Format:
/// ```text
/// # pack-refs with: peeled fully-peeled sorted
/// <hex-oid> <refname>
/// ^<hex-oid>   (peeled value of the tag above)
/// ```
#[derive(Debug, Clone)]
pub struct PackedRefs {
    refs: Vec<PackedRef>,
    sorted: bool,
}

impl PackedRefs {
    pub fn empty() -> Self {
        Self {
            refs: Vec::new(),
            sorted: true,
        }
    }

    /// Parse packed-refs bytes.
    pub fn parse(data: &[u8]) -> Result<Self, RefError> {
        let mut refs: Vec<PackedRef> = Vec::new();
        let mut sorted = false;

        for line in data.lines() {
            if line.is_empty() {
                continue;
            }

            if line.starts_with(b"#") {
                if line.find(b"sorted").is_some() {
                    sorted = true;
                }
                continue;
            }

            if let Some(hex) = line.strip_prefix(b"^") {
                let peeled = ObjectId::from_hex(hex.trim())?;
                match refs.last_mut() {
                    Some(last) => last.peeled = Some(peeled),
                    None => {
                        return Err(RefError::Generic(
                            "packed-refs: peeled line without a ref".into(),
                        ))
                    }
                }
                continue;
            }

            let space = line
                .find_byte(b' ')
                .ok_or_else(|| RefError::Generic("packed-refs: malformed line".into()))?;
            let oid = ObjectId::from_hex(&line[..space])?;
            let name = BString::from(line[space + 1..].trim());
            refs.push(PackedRef {
                name,
                oid,
                peeled: None,
            });
        }

        if !sorted {
            refs.sort_by(|a, b| a.name.cmp(&b.name));
            sorted = true;
        }
        Ok(Self { refs, sorted })
    }

    /// Load from disk. A missing file is an empty catalog.
    pub fn load(git_dir: &Path) -> Result<Self, RefError> {
        let path = packed_refs_path(git_dir);
        match fs::read(&path) {
            Ok(data) => Self::parse(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::empty()),
            Err(e) => Err(RefError::IoPath { path, source: e }),
        }
    }

    /// Binary-search lookup by name.
    pub fn find(&self, name: &BStr) -> Option<&PackedRef> {
        debug_assert!(self.sorted);
        self.refs
            .binary_search_by(|pr| pr.name.as_bstr().cmp(name))
            .ok()
            .map(|idx| &self.refs[idx])
    }

    /// Does any entry sort under `name/`?
    pub fn has_entries_under(&self, name: &BStr) -> Option<&BStr> {
        let mut prefix = BString::from(name.as_bytes());
        prefix.push(b'/');
        let start = self
            .refs
            .partition_point(|pr| pr.name.as_bstr() < prefix.as_bstr());
        self.refs
            .get(start)
            .filter(|pr| pr.name.starts_with(&prefix))
            .map(|pr| pr.name.as_bstr())
    }

    /// Rewrite the packed-refs file under its global lock.
    pub fn write(&self, git_dir: &Path) -> Result<(), RefError> {
        let path = packed_refs_path(git_dir);
        let mut lock = LockFile::acquire(&path)?;

        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(b"# pack-refs with: peeled fully-peeled sorted \n");
        let mut sorted_refs: Vec<&PackedRef> = self.refs.iter().collect();
        sorted_refs.sort_by(|a, b| a.name.cmp(&b.name));
        for pr in sorted_refs {
            out.extend_from_slice(pr.oid.to_hex().as_bytes());
            out.push(b' ');
            out.extend_from_slice(&pr.name);
            out.push(b'\n');
            if let Some(peeled) = &pr.peeled {
                out.push(b'^');
                out.extend_from_slice(peeled.to_hex().as_bytes());
                out.push(b'\n');
            }
        }

        lock.write_all(&out).map_err(|e| RefError::IoPath {
            path: path.clone(),
            source: e,
        })?;
        lock.commit()?;
        Ok(())
    }

    /// Add or update an entry, keeping the catalog sorted.
    pub fn upsert(&mut self, name: BString, oid: ObjectId, peeled: Option<ObjectId>) {
        match self
            .refs
            .binary_search_by(|pr| pr.name.cmp(&name))
        {
            Ok(idx) => {
                self.refs[idx].oid = oid;
                self.refs[idx].peeled = peeled;
            }
            Err(idx) => self.refs.insert(idx, PackedRef { name, oid, peeled }),
        }
    }

    /// Remove an entry. Returns whether it existed.
    pub fn remove(&mut self, name: &BStr) -> bool {
        match self.refs.binary_search_by(|pr| pr.name.as_bstr().cmp(name)) {
            Ok(idx) => {
                self.refs.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    pub fn refs(&self) -> &[PackedRef] {
        &self.refs
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// The path of the packed-refs file.
pub(crate) fn packed_refs_path(git_dir: &Path) -> PathBuf {
    git_dir.join("packed-refs")
}
