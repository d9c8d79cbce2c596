//! The reference store: backend selection, routing, and the commit
//! pipeline.
//!
//! Normal refs go to the selected backend; per-worktree refs and pseudorefs
//! are always serviced by the files backend. A transaction touching both is
//! split into two sub-transactions and committed primary-first — there is no
//! cross-backend atomicity, only the documented split-transaction warning
//! when the second commit fails after the first succeeded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bstr::{BStr, BString, ByteSlice};
use silt_config::ConfigFile;
use silt_hash::ObjectId;
use silt_utils::date::{Signature, SiltDate};

use crate::backend::{RawRef, RefBackend};
use crate::error::{RefError, RefWarning, SPLIT_TRANSACTION_WARNING};
use crate::files::FilesBackend;
use crate::name::RefKind;
use crate::pseudoref;
use crate::registry::{self, BackendRegistry};
use crate::resolve::{resolve_raw, ResolveFlags, ResolvedRef};
use crate::transaction::{
    check_duplicate_names, RefTransaction, RefUpdate, TxnState, UpdateFlags,
};

/// The result of a successful commit: non-fatal conditions the caller may
/// want to react to.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    pub warnings: Vec<RefWarning>,
}

/// A repository's reference store.
pub struct RefStore {
    git_dir: PathBuf,
    backend: Arc<dyn RefBackend>,
    files: Arc<FilesBackend>,
    backend_name: String,
    identity: Signature,
    pub(crate) warn_ambiguous_refs: bool,
    pub(crate) namespace: Option<String>,
    pub(crate) hide_patterns: Vec<BString>,
}

impl RefStore {
    /// Open the store for a repository directory, selecting the backend
    /// from `extensions.refstorage`.
    pub fn open(git_dir: impl AsRef<Path>) -> Result<Self, RefError> {
        let backend_name = registry::configured_backend_name(git_dir.as_ref())?;
        Self::open_with_backend(git_dir, &backend_name)
    }

    /// Open the store with an explicitly selected backend.
    pub fn open_with_backend(
        git_dir: impl AsRef<Path>,
        backend_name: &str,
    ) -> Result<Self, RefError> {
        let git_dir = git_dir.as_ref().to_path_buf();
        let config = ConfigFile::load(&git_dir.join("config"))?;
        let log_all = config.get_bool("core.logallrefupdates")?.unwrap_or(true);

        let registry = BackendRegistry::builtin();
        let files = Arc::new(FilesBackend::new(&git_dir).with_log_all_ref_updates(log_all));
        let backend: Arc<dyn RefBackend> = if backend_name == "files" {
            files.clone()
        } else {
            registry.open(&git_dir, backend_name, log_all)?
        };

        let mut hide_patterns = Vec::new();
        for value in config.get_all("transfer.hiderefs").into_iter().flatten() {
            let mut pattern = BString::from(value.as_bytes());
            while pattern.last() == Some(&b'/') {
                let new_len = pattern.len() - 1;
                pattern.truncate(new_len);
            }
            hide_patterns.push(pattern);
        }

        Ok(Self {
            git_dir,
            backend,
            files,
            backend_name: backend_name.to_string(),
            identity: Signature {
                name: BString::from("silt"),
                email: BString::from("silt@localhost"),
                date: SiltDate::now(),
            },
            warn_ambiguous_refs: true,
            namespace: None,
            hide_patterns,
        })
    }

    /// Create empty ref storage. Idempotent.
    pub fn init_db(&self) -> Result<(), RefError> {
        self.files.init_db()?;
        if self.split() {
            self.backend.init_db()?;
        }
        Ok(())
    }

    /// Set the identity recorded in reflog entries.
    pub fn set_identity(&mut self, identity: Signature) {
        self.identity = identity;
    }

    /// Enable or disable warnings about ambiguous short names.
    pub fn set_warn_ambiguous_refs(&mut self, on: bool) {
        self.warn_ambiguous_refs = on;
    }

    /// Confine ref iteration to a namespace (`refs/namespaces/<ns>/`).
    pub fn set_namespace(&mut self, namespace: Option<String>) {
        self.namespace = namespace;
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Whether non-normal refs need routing away from the selected backend.
    pub(crate) fn split(&self) -> bool {
        self.backend_name != "files"
    }

    pub(crate) fn backend(&self) -> &dyn RefBackend {
        &*self.backend
    }

    pub(crate) fn files_backend(&self) -> &FilesBackend {
        &self.files
    }

    /// The backend servicing a particular refname.
    pub(crate) fn backend_for(&self, name: &BStr) -> &dyn RefBackend {
        match RefKind::of(name) {
            RefKind::Normal => &*self.backend,
            RefKind::PerWorktree | RefKind::Pseudoref => &*self.files,
        }
    }

    /// Single-hop read, routed by ref kind.
    pub(crate) fn read_raw(&self, name: &BStr) -> Result<Option<RawRef>, RefError> {
        self.backend_for(name).read_raw_ref(name)
    }

    // Reads.

    /// Resolve a refname, following symbolic targets across backends.
    pub fn resolve(&self, name: &BStr, flags: ResolveFlags) -> Result<ResolvedRef, RefError> {
        resolve_raw(|n: &BStr| self.read_raw(n), name, flags)
    }

    /// Resolve to an OID; `Ok(None)` when the ref does not exist.
    pub fn read_ref(&self, name: &BStr) -> Result<Option<ObjectId>, RefError> {
        match self.resolve(name, ResolveFlags::READING) {
            Ok(res) => Ok(Some(res.oid)),
            Err(RefError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn ref_exists(&self, name: &BStr) -> Result<bool, RefError> {
        Ok(self.read_ref(name)?.is_some())
    }

    // Transactions.

    /// Begin an empty transaction.
    pub fn begin_transaction(&self) -> RefTransaction {
        RefTransaction::new()
    }

    /// Commit a transaction through the full pipeline.
    pub fn commit(&self, tx: &mut RefTransaction) -> Result<CommitOutcome, RefError> {
        self.commit_inner(tx, false)
    }

    /// Commit bypassing per-ref existence checks; used only when creating a
    /// fresh repository.
    pub fn initial_commit(&self, tx: &mut RefTransaction) -> Result<CommitOutcome, RefError> {
        self.commit_inner(tx, true)
    }

    fn commit_inner(
        &self,
        tx: &mut RefTransaction,
        initial: bool,
    ) -> Result<CommitOutcome, RefError> {
        assert!(
            tx.state == TxnState::Open,
            "BUG: commit called for transaction that is not open"
        );
        tx.state = TxnState::Prepared;
        let result = self.run_commit(tx, initial);
        tx.state = TxnState::Closed;
        result
    }

    fn run_commit(
        &self,
        tx: &mut RefTransaction,
        initial: bool,
    ) -> Result<CommitOutcome, RefError> {
        // Step 1: dereference symrefs once. The update on the symref itself
        // becomes log-only; a new update on the leaf carries the actual
        // change.
        let mut appended: Vec<RefUpdate> = Vec::new();
        for update in tx.updates.iter_mut() {
            if update.flags.contains(UpdateFlags::NODEREF) {
                continue;
            }
            let raw = match self.read_raw(update.name.as_bstr()) {
                Ok(raw) => raw,
                Err(RefError::Broken(_)) => {
                    update.flags |= UpdateFlags::BROKEN;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !matches!(raw, Some(RawRef::Symbolic(_))) {
                continue;
            }

            let mut rflags = ResolveFlags::empty();
            if matches!(update.old, Some(o) if !o.is_null()) {
                rflags |= ResolveFlags::READING;
            }
            if update.is_deletion() {
                rflags |= ResolveFlags::NO_RECURSE | ResolveFlags::ALLOW_BAD_NAME;
            }

            match self.resolve(update.name.as_bstr(), rflags) {
                Ok(res) => {
                    update.read_oid = Some(res.oid);
                    appended.push(RefUpdate {
                        name: res.name,
                        new: update.new,
                        old: update.old,
                        flags: update.flags | UpdateFlags::NODEREF,
                        message: update.message.clone(),
                        read_oid: None,
                    });
                    update.flags |= UpdateFlags::LOG_ONLY | UpdateFlags::NODEREF;
                    update.old = None;
                }
                Err(_) => {
                    // Reported by the backend at commit time.
                    update.flags |= UpdateFlags::BROKEN;
                }
            }
        }
        tx.updates.append(&mut appended);

        // Step 2: split by kind when the selected backend is not files.
        let mut files_tx: Option<RefTransaction> = None;
        if self.split() {
            let (normal, special): (Vec<_>, Vec<_>) = tx
                .updates
                .drain(..)
                .partition(|u| RefKind::of(u.name.as_bstr()) == RefKind::Normal);
            tx.updates = normal;
            if !special.is_empty() {
                files_tx = Some(RefTransaction::from_updates(special));
            }
        }

        // Step 3: duplicate refnames fail before anything touches storage.
        check_duplicate_names(&tx.updates)?;
        if let Some(ft) = &files_tx {
            check_duplicate_names(&ft.updates)?;
        }

        // Step 4: commit the primary transaction.
        if !tx.updates.is_empty() {
            if initial {
                self.backend.initial_commit(tx, &self.identity)?;
            } else {
                self.backend.commit(tx, &self.identity)?;
            }
        }

        // Step 5: commit the auxiliary files transaction. Failure here is
        // the accepted partial-commit mode, reported as a warning.
        let mut warnings = Vec::new();
        if let Some(mut ft) = files_tx {
            ft.state = TxnState::Prepared;
            let result = if initial {
                self.files.initial_commit(&mut ft, &self.identity)
            } else {
                self.files.commit(&mut ft, &self.identity)
            };
            ft.state = TxnState::Closed;
            if let Err(e) = result {
                tracing::warn!("{}", SPLIT_TRANSACTION_WARNING);
                warnings.push(RefWarning::SplitTransaction {
                    detail: e.to_string(),
                });
            }
        }

        Ok(CommitOutcome { warnings })
    }

    // One-shot conveniences.

    /// Open, stage and commit a single update.
    pub fn update_ref(
        &self,
        message: &str,
        name: impl Into<BString>,
        new: Option<ObjectId>,
        old: Option<ObjectId>,
        flags: UpdateFlags,
    ) -> Result<CommitOutcome, RefError> {
        let mut tx = self.begin_transaction();
        tx.update(name, new, old, flags, Some(message))?;
        self.commit(&mut tx)
    }

    /// Open, stage and commit a single deletion.
    pub fn delete_ref(
        &self,
        name: impl Into<BString>,
        old: Option<ObjectId>,
        flags: UpdateFlags,
    ) -> Result<CommitOutcome, RefError> {
        let mut tx = self.begin_transaction();
        tx.delete(name, old.filter(|o| !o.is_null()), flags, None)?;
        self.commit(&mut tx)
    }

    // Routed backend operations.

    /// Write a symbolic ref. With a log message, the transition is recorded
    /// in `name`'s reflog when the target resolves (the resolution is
    /// routed here: the target may live in a different backend than the
    /// symref).
    pub fn create_symref(
        &self,
        name: &BStr,
        target: &BStr,
        logmsg: Option<&str>,
    ) -> Result<(), RefError> {
        let log = logmsg.and_then(|msg| {
            let old = self
                .resolve(name, ResolveFlags::empty())
                .map(|res| res.oid)
                .unwrap_or(ObjectId::NULL);
            match self.resolve(target, ResolveFlags::READING) {
                Ok(res) => Some((old, res.oid, msg)),
                Err(_) => None,
            }
        });
        self.backend_for(name)
            .create_symref(name, target, log, &self.identity)
    }

    /// Rename a ref, carrying its reflog.
    pub fn rename_ref(
        &self,
        old_name: &BStr,
        new_name: &BStr,
        logmsg: Option<&str>,
    ) -> Result<(), RefError> {
        if RefKind::of(old_name) != RefKind::of(new_name) {
            return Err(RefError::Generic(format!(
                "cannot rename '{}' to '{}' across ref kinds",
                old_name.to_str_lossy(),
                new_name.to_str_lossy()
            )));
        }
        self.backend_for(old_name)
            .rename_ref(old_name, new_name, logmsg, &self.identity)
    }

    /// The peeled value of a (tag) ref, when the backend has one on record.
    pub fn peel_ref(&self, name: &BStr) -> Result<Option<ObjectId>, RefError> {
        self.backend_for(name).peel_ref(name)
    }

    /// Fold loose refs into the packed catalog.
    pub fn pack_refs(&self, prune: bool) -> Result<(), RefError> {
        self.backend.pack_refs(prune)
    }

    /// Delete several refs, best effort, routed by kind.
    pub fn delete_refs(&self, names: &[BString]) -> Result<(), RefError> {
        if !self.split() {
            return self.backend.delete_refs(names);
        }
        let (normal, special): (Vec<_>, Vec<_>) = names
            .iter()
            .cloned()
            .partition(|n| RefKind::of(n.as_bstr()) == RefKind::Normal);
        if !normal.is_empty() {
            self.backend.delete_refs(&normal)?;
        }
        if !special.is_empty() {
            self.files.delete_refs(&special)?;
        }
        Ok(())
    }

    // Reflog access, routed by kind.

    pub fn reflog_exists(&self, name: &BStr) -> Result<bool, RefError> {
        self.backend_for(name).reflog_exists(name)
    }

    pub fn create_reflog(&self, name: &BStr, force: bool) -> Result<(), RefError> {
        self.backend_for(name).create_reflog(name, force)
    }

    pub fn delete_reflog(&self, name: &BStr) -> Result<(), RefError> {
        self.backend_for(name).delete_reflog(name)
    }

    /// Invoke `f` for every ref that has a reflog. With a split store the
    /// files backend contributes the per-worktree logs (HEAD included).
    pub fn for_each_reflog(&self, f: &mut dyn FnMut(&BStr) -> i32) -> Result<i32, RefError> {
        if self.split() {
            let ret = self.files.for_each_reflog(f)?;
            if ret != 0 {
                return Ok(ret);
            }
        }
        self.backend.for_each_reflog(f)
    }

    pub fn for_each_reflog_ent(
        &self,
        name: &BStr,
        f: &mut (dyn FnMut(&crate::reflog::ReflogEntry) -> i32 + '_),
    ) -> Result<i32, RefError> {
        self.backend_for(name).for_each_reflog_ent(name, f)
    }

    pub fn for_each_reflog_ent_reverse(
        &self,
        name: &BStr,
        f: &mut (dyn FnMut(&crate::reflog::ReflogEntry) -> i32 + '_),
    ) -> Result<i32, RefError> {
        self.backend_for(name).for_each_reflog_ent_reverse(name, f)
    }

    pub fn reflog_expire(
        &self,
        name: &BStr,
        flags: crate::reflog::ExpireFlags,
        keep: &mut (dyn FnMut(&crate::reflog::ReflogEntry) -> bool + '_),
    ) -> Result<(), RefError> {
        self.backend_for(name)
            .reflog_expire(name, flags, keep, &self.identity)
    }

    // Pseudorefs.

    pub fn read_pseudoref(&self, name: &BStr) -> Result<Option<ObjectId>, RefError> {
        self.require_pseudoref(name)?;
        pseudoref::read_pseudoref(&self.git_dir, name)
    }

    pub fn write_pseudoref(
        &self,
        name: &BStr,
        oid: ObjectId,
        old: Option<ObjectId>,
    ) -> Result<(), RefError> {
        self.require_pseudoref(name)?;
        pseudoref::write_pseudoref(&self.git_dir, name, oid, old)
    }

    pub fn delete_pseudoref(
        &self,
        name: &BStr,
        old: Option<ObjectId>,
    ) -> Result<(), RefError> {
        self.require_pseudoref(name)?;
        pseudoref::delete_pseudoref(&self.git_dir, name, old)
    }

    fn require_pseudoref(&self, name: &BStr) -> Result<(), RefError> {
        if RefKind::of(name) != RefKind::Pseudoref {
            return Err(RefError::BadName(format!(
                "'{}' is not a pseudoref",
                name.to_str_lossy()
            )));
        }
        Ok(())
    }

    // Submodules.

    /// Resolve a ref inside a submodule's own store, enforcing that the
    /// submodule uses the same backend as this repository.
    pub fn resolve_gitlink_ref(
        &self,
        submodule_git_dir: impl AsRef<Path>,
        name: &BStr,
    ) -> Result<ObjectId, RefError> {
        let submodule_git_dir = submodule_git_dir.as_ref();
        registry::validate_submodule_backend(&self.backend_name, submodule_git_dir)?;
        let sub = RefStore::open(submodule_git_dir)?;
        Ok(sub.resolve(name, ResolveFlags::READING)?.oid)
    }
}
