//! The filesystem-backed ref store: loose files plus a packed catalog.

pub(crate) mod loose;
pub mod packed;
pub(crate) mod reflog;
pub(crate) mod transaction;

use std::fs;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use silt_hash::ObjectId;
use silt_utils::date::Signature;
use silt_utils::lockfile::LockFile;

use crate::backend::{EachRefFn, EachReflogEntFn, IterFlags, RawRef, RefBackend, ReflogKeepFn};
use crate::error::RefError;
use crate::reflog::{ExpireFlags, ReflogEntry};
use crate::resolve::{resolve_raw, RefFlags, ResolveFlags};
use crate::transaction::RefTransaction;

use self::packed::PackedRefs;

/// The files backend: loose refs under `refs/`, a `packed-refs` catalog,
/// reflogs under `logs/`. Loose shadows packed; updates serialize on
/// per-ref lock files.
pub struct FilesBackend {
    git_dir: PathBuf,
    log_all_ref_updates: bool,
}

impl FilesBackend {
    /// Open a files backend rooted at the repository directory.
    pub fn new(git_dir: impl AsRef<Path>) -> Self {
        Self {
            git_dir: git_dir.as_ref().to_path_buf(),
            log_all_ref_updates: true,
        }
    }

    /// Override `core.logAllRefUpdates`.
    pub fn with_log_all_ref_updates(mut self, on: bool) -> Self {
        self.log_all_ref_updates = on;
        self
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Does `name` qualify for reflog auto-creation?
    pub(crate) fn should_autocreate_reflog(&self, name: &BStr) -> bool {
        if reflog::reflog_exists(&self.git_dir, name) {
            return true;
        }
        self.log_all_ref_updates
            && (name == "HEAD"
                || name.starts_with(b"refs/heads/")
                || name.starts_with(b"refs/remotes/")
                || name.starts_with(b"refs/notes/"))
    }

    /// Single-hop read against an already-loaded packed catalog.
    pub(crate) fn read_raw_with(
        &self,
        packed: &PackedRefs,
        name: &BStr,
    ) -> Result<Option<RawRef>, RefError> {
        if let Some(raw) = loose::read_loose_ref(&self.git_dir, name)? {
            return Ok(Some(raw));
        }
        Ok(packed.find(name).map(|pr| RawRef::Object(pr.oid)))
    }

    /// Directory/file conflict check against an already-loaded catalog.
    pub(crate) fn verify_available_with(
        &self,
        packed: &PackedRefs,
        name: &BStr,
        extras: &[BString],
        skip: &[BString],
    ) -> Result<(), RefError> {
        let skipped = |candidate: &BStr| skip.iter().any(|s| s.as_bstr() == candidate);
        let conflict = |conflict: &BStr| {
            Err(RefError::NameConflict {
                name: name.to_str_lossy().into_owned(),
                conflict: conflict.to_str_lossy().into_owned(),
            })
        };

        // Strict extensions: anything living under `name/`.
        let ext_prefix = extension_prefix(name);
        for sub in loose::enumerate_loose_refs(&self.git_dir, ext_prefix.as_bstr())? {
            if !skipped(sub.as_bstr()) {
                return conflict(sub.as_bstr());
            }
        }
        if let Some(packed_sub) = packed.has_entries_under(name) {
            if !skipped(packed_sub) {
                return conflict(packed_sub);
            }
        }
        for extra in extras {
            if extra.starts_with(&ext_prefix) && !skipped(extra.as_bstr()) {
                return conflict(extra.as_bstr());
            }
        }

        // Strict prefixes: each parent path of `name` taken as a ref.
        let bytes = name.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if b != b'/' {
                continue;
            }
            let prefix = bytes[..i].as_bstr();
            if skipped(prefix) {
                continue;
            }
            if extras.iter().any(|e| e.as_bstr() == prefix) {
                return conflict(prefix);
            }
            if loose::loose_ref_path(&self.git_dir, prefix).is_file()
                || packed.find(prefix).is_some()
            {
                return conflict(prefix);
            }
        }
        Ok(())
    }
}

fn extension_prefix(name: &BStr) -> BString {
    let mut prefix = BString::from(name.as_bytes());
    prefix.push(b'/');
    prefix
}

impl RefBackend for FilesBackend {
    fn name(&self) -> &'static str {
        "files"
    }

    fn init_db(&self) -> Result<(), RefError> {
        for dir in ["refs", "refs/heads", "refs/tags", "logs"] {
            let path = self.git_dir.join(dir);
            fs::create_dir_all(&path).map_err(|e| RefError::IoPath { path, source: e })?;
        }
        Ok(())
    }

    fn read_raw_ref(&self, name: &BStr) -> Result<Option<RawRef>, RefError> {
        let packed = PackedRefs::load(&self.git_dir)?;
        self.read_raw_with(&packed, name)
    }

    fn commit(&self, tx: &mut RefTransaction, identity: &Signature) -> Result<(), RefError> {
        transaction::commit_transaction(self, tx, identity)
    }

    fn initial_commit(
        &self,
        tx: &mut RefTransaction,
        _identity: &Signature,
    ) -> Result<(), RefError> {
        transaction::initial_commit(self, tx)
    }

    fn for_each_ref(
        &self,
        base: &BStr,
        trim: usize,
        flags: IterFlags,
        f: &mut EachRefFn<'_>,
    ) -> Result<i32, RefError> {
        let base: &BStr = if base.is_empty() {
            b"refs/".as_bstr()
        } else {
            base
        };
        let packed = PackedRefs::load(&self.git_dir)?;

        // Merge loose names (which shadow) with packed names.
        let mut names = loose::enumerate_loose_refs(&self.git_dir, base)?;
        for pr in packed.refs() {
            if pr.name.starts_with(base.as_bytes()) {
                names.push(pr.name.clone());
            }
        }
        names.sort();
        names.dedup();

        for name in names {
            let resolved = resolve_raw(
                |n: &BStr| self.read_raw_with(&packed, n),
                name.as_bstr(),
                ResolveFlags::empty(),
            );
            let (oid, ref_flags) = match resolved {
                Ok(res) if !res.oid.is_null() && !res.flags.contains(RefFlags::ISBROKEN) => {
                    (res.oid, res.flags)
                }
                Ok(res) => (res.oid, res.flags | RefFlags::ISBROKEN),
                Err(RefError::Broken(_)) | Err(RefError::NotFound(_)) | Err(RefError::TooDeep(_)) => {
                    (ObjectId::NULL, RefFlags::ISBROKEN)
                }
                Err(e) => return Err(e),
            };

            if ref_flags.contains(RefFlags::ISBROKEN)
                && !flags.contains(IterFlags::INCLUDE_BROKEN)
            {
                tracing::warn!("ignoring broken ref {}", name.to_str_lossy());
                continue;
            }

            let shown = name[trim.min(name.len())..].as_bstr();
            let ret = f(shown, &oid, ref_flags);
            if ret != 0 {
                return Ok(ret);
            }
        }
        Ok(0)
    }

    fn verify_refname_available(
        &self,
        name: &BStr,
        extras: &[BString],
        skip: &[BString],
    ) -> Result<(), RefError> {
        let packed = PackedRefs::load(&self.git_dir)?;
        self.verify_available_with(&packed, name, extras, skip)
    }

    fn create_symref(
        &self,
        name: &BStr,
        target: &BStr,
        log: Option<(ObjectId, ObjectId, &str)>,
        identity: &Signature,
    ) -> Result<(), RefError> {
        use std::io::Write;

        let path = loose::loose_ref_path(&self.git_dir, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let mut lock = LockFile::acquire(&path)?;
        lock.write_all(format!("ref: {}\n", target.to_str_lossy()).as_bytes())
            .map_err(|e| RefError::IoPath {
                path: path.clone(),
                source: e,
            })?;
        lock.commit()?;

        if let Some((old_oid, new_oid, msg)) = log {
            transaction::log_ref_write(self, name, old_oid, new_oid, Some(msg), identity)?;
        }
        Ok(())
    }

    fn rename_ref(
        &self,
        old_name: &BStr,
        new_name: &BStr,
        logmsg: Option<&str>,
        identity: &Signature,
    ) -> Result<(), RefError> {
        if old_name == new_name {
            return Ok(());
        }

        match self.read_raw_ref(old_name)? {
            None => return Err(RefError::NotFound(old_name.to_str_lossy().into_owned())),
            Some(RawRef::Symbolic(_)) => {
                return Err(RefError::Generic(format!(
                    "refname {} is a symbolic ref, renaming it is not supported",
                    old_name.to_str_lossy()
                )))
            }
            Some(RawRef::Object(_)) => {}
        }
        let resolved = resolve_raw(
            |n: &BStr| self.read_raw_ref(n),
            old_name,
            ResolveFlags::READING,
        )?;

        let mut packed = PackedRefs::load(&self.git_dir)?;
        self.verify_available_with(
            &packed,
            new_name,
            &[],
            &[BString::from(old_name.as_bytes())],
        )?;

        // Carry the reflog across before touching the refs themselves. The
        // old log is removed first so a rename into its own subtree does not
        // find a file where the new log's directory must go.
        if reflog::reflog_exists(&self.git_dir, old_name) {
            let entries = reflog::read_entries(&self.git_dir, old_name)?;
            reflog::delete_reflog(&self.git_dir, old_name)?;
            reflog::write_entries(&self.git_dir, new_name, &entries)?;
        }

        loose::delete_loose_ref(&self.git_dir, old_name)?;
        if packed.remove(old_name) {
            packed.write(&self.git_dir)?;
        }

        use std::io::Write;
        let path = loose::loose_ref_path(&self.git_dir, new_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let mut lock = LockFile::acquire(&path)?;
        lock.write_all(format!("{}\n", resolved.oid.to_hex()).as_bytes())
            .map_err(|e| RefError::IoPath {
                path: path.clone(),
                source: e,
            })?;
        transaction::log_ref_write(self, new_name, resolved.oid, resolved.oid, logmsg, identity)?;
        lock.commit()?;
        Ok(())
    }

    fn peel_ref(&self, name: &BStr) -> Result<Option<ObjectId>, RefError> {
        let packed = PackedRefs::load(&self.git_dir)?;
        Ok(packed.find(name).and_then(|pr| pr.peeled))
    }

    fn pack_refs(&self, prune: bool) -> Result<(), RefError> {
        let mut packed = PackedRefs::load(&self.git_dir)?;
        let names = loose::enumerate_loose_refs(&self.git_dir, b"refs/".as_bstr())?;
        let mut packed_names = Vec::new();

        for name in names {
            match loose::read_loose_ref(&self.git_dir, name.as_bstr()) {
                Ok(Some(RawRef::Object(oid))) => {
                    packed.upsert(name.clone(), oid, None);
                    packed_names.push(name);
                }
                // Symbolic and broken refs stay loose.
                Ok(_) | Err(RefError::Broken(_)) => {}
                Err(e) => return Err(e),
            }
        }
        packed.write(&self.git_dir)?;

        if prune {
            for name in packed_names {
                loose::delete_loose_ref(&self.git_dir, name.as_bstr())?;
            }
        }
        Ok(())
    }

    fn delete_refs(&self, names: &[BString]) -> Result<(), RefError> {
        let mut packed = PackedRefs::load(&self.git_dir)?;
        let mut packed_changed = false;
        for name in names {
            if packed.remove(name.as_bstr()) {
                packed_changed = true;
            }
        }
        if packed_changed {
            packed.write(&self.git_dir)?;
        }
        for name in names {
            loose::delete_loose_ref(&self.git_dir, name.as_bstr())?;
            reflog::delete_reflog(&self.git_dir, name.as_bstr())?;
        }
        Ok(())
    }

    fn reflog_exists(&self, name: &BStr) -> Result<bool, RefError> {
        Ok(reflog::reflog_exists(&self.git_dir, name))
    }

    fn create_reflog(&self, name: &BStr, force: bool) -> Result<(), RefError> {
        if !force && !self.should_autocreate_reflog(name) {
            return Ok(());
        }
        reflog::create_reflog(&self.git_dir, name)
    }

    fn delete_reflog(&self, name: &BStr) -> Result<(), RefError> {
        reflog::delete_reflog(&self.git_dir, name)
    }

    fn for_each_reflog(&self, f: &mut dyn FnMut(&BStr) -> i32) -> Result<i32, RefError> {
        for name in reflog::enumerate_reflogs(&self.git_dir)? {
            let ret = f(name.as_bstr());
            if ret != 0 {
                return Ok(ret);
            }
        }
        Ok(0)
    }

    fn for_each_reflog_ent(
        &self,
        name: &BStr,
        f: &mut EachReflogEntFn<'_>,
    ) -> Result<i32, RefError> {
        for entry in reflog::read_entries(&self.git_dir, name)? {
            let ret = f(&entry);
            if ret != 0 {
                return Ok(ret);
            }
        }
        Ok(0)
    }

    fn for_each_reflog_ent_reverse(
        &self,
        name: &BStr,
        f: &mut EachReflogEntFn<'_>,
    ) -> Result<i32, RefError> {
        for entry in reflog::read_entries(&self.git_dir, name)?.iter().rev() {
            let ret = f(entry);
            if ret != 0 {
                return Ok(ret);
            }
        }
        Ok(0)
    }

    fn reflog_expire(
        &self,
        name: &BStr,
        flags: ExpireFlags,
        keep: &mut ReflogKeepFn<'_>,
        _identity: &Signature,
    ) -> Result<(), RefError> {
        if !reflog::reflog_exists(&self.git_dir, name) {
            return Ok(());
        }

        let symbolic = matches!(self.read_raw_ref(name)?, Some(RawRef::Symbolic(_)));

        let mut kept: Vec<ReflogEntry> = Vec::new();
        let mut last_kept: Option<ObjectId> = None;
        for mut entry in reflog::read_entries(&self.git_dir, name)? {
            if flags.contains(ExpireFlags::REWRITE) {
                if let Some(prev) = last_kept {
                    entry.old_oid = prev;
                }
            }
            if keep(&entry) {
                last_kept = Some(entry.new_oid);
                kept.push(entry);
            }
        }

        if flags.contains(ExpireFlags::DRY_RUN) {
            return Ok(());
        }

        reflog::write_entries(&self.git_dir, name, &kept)?;

        if flags.contains(ExpireFlags::UPDATE_REF) && !symbolic {
            if let Some(last) = last_kept.filter(|oid| !oid.is_null()) {
                use std::io::Write;
                let path = loose::loose_ref_path(&self.git_dir, name);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
                let mut lock = LockFile::acquire(&path)?;
                lock.write_all(format!("{}\n", last.to_hex()).as_bytes())
                    .map_err(|e| RefError::IoPath {
                        path: path.clone(),
                        source: e,
                    })?;
                lock.commit()?;
            }
        }
        Ok(())
    }
}
