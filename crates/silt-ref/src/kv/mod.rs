//! The key-value ref store over an embedded ordered database.
//!
//! Everything lives in one ordered table:
//!
//! - ref: key `<refname>\0`, value `<40hex>\0` or `ref: <target>\0`;
//! - reflog header: key `logs/<refname>\0` + 8 zero bytes, empty value —
//!   its existence is the "reflog exists" signal;
//! - reflog entry: key `logs/<refname>\0` + 8-byte big-endian nanosecond
//!   timestamp, value = encoded record + trailing NUL.
//!
//! Sorting by key therefore yields refs in name order and reflog entries in
//! chronological order. The store has one writer at a time; readers get
//! snapshot isolation from the engine's MVCC.

mod slot;

use std::path::Path;
use std::sync::{Arc, Mutex};

use bstr::{BStr, BString, ByteSlice};
use redb::{Database, ReadableTable, Table};
use silt_hash::ObjectId;
use silt_utils::date::{Signature, SiltDate};

use crate::backend::{EachRefFn, EachReflogEntFn, IterFlags, RawRef, RefBackend, ReflogKeepFn};
use crate::error::RefError;
use crate::reflog::{ExpireFlags, ReflogEntry};
use crate::resolve::{resolve_raw, RefFlags, ResolveFlags};
use crate::transaction::{
    check_duplicate_names, sorted_update_order, RefTransaction, RefUpdate, UpdateFlags,
};

use self::slot::{TxnSlot, REFS_TABLE};

/// Backend over the `redb` embedded key-value store.
pub struct RedbBackend {
    #[allow(dead_code)]
    pub(crate) db: Arc<Database>,
    slot: TxnSlot,
    log_all_ref_updates: bool,
    /// Monotonic floor for reflog timestamps; entries written within one
    /// nanosecond still get distinct keys.
    last_log_ns: Mutex<u64>,
}

impl RedbBackend {
    /// Open (or create) the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RefError> {
        let db = Arc::new(Database::create(path).map_err(redb::Error::from)?);
        let backend = Self {
            slot: TxnSlot::new(db.clone()),
            db,
            log_all_ref_updates: true,
            last_log_ns: Mutex::new(0),
        };
        backend.init_db()?;
        Ok(backend)
    }

    /// Override `core.logAllRefUpdates`.
    pub fn with_log_all_ref_updates(mut self, on: bool) -> Self {
        self.log_all_ref_updates = on;
        self
    }

    /// Record that a downstream process may have written the store; the
    /// next read refreshes its snapshot.
    pub fn note_external_commands(&self) {
        self.slot.note_external_commands();
    }

    fn should_autocreate_reflog(&self, name: &BStr) -> bool {
        self.log_all_ref_updates
            && (name == "HEAD"
                || name.starts_with(b"refs/heads/")
                || name.starts_with(b"refs/remotes/")
                || name.starts_with(b"refs/notes/"))
    }

    fn next_log_timestamp(&self) -> u64 {
        let mut last = self.last_log_ns.lock().expect("timestamp floor poisoned");
        let now = SiltDate::now_nanos().max(*last + 1);
        *last = now;
        now
    }

    fn apply_update(
        &self,
        table: &mut Table<'_, &'static [u8], &'static [u8]>,
        update: &mut RefUpdate,
        names: &[BString],
        identity: &Signature,
    ) -> Result<(), RefError> {
        let name_owned = update.name.clone();
        let name = name_owned.as_bstr();

        if update.flags.contains(UpdateFlags::BROKEN) {
            return Err(RefError::Generic(format!(
                "cannot lock ref '{}': reference is broken",
                name.to_str_lossy()
            )));
        }

        let raw_self = table_get(table, &ref_key(name))?;
        let exists = raw_self.is_some();
        let is_symref_here = raw_self
            .as_deref()
            .map_or(false, |v| v.starts_with(b"ref:"));

        let mut rflags = ResolveFlags::ALLOW_BAD_NAME;
        if matches!(update.old, Some(o) if !o.is_null()) {
            rflags |= ResolveFlags::READING;
        }
        let resolved = resolve_raw(
            |n: &BStr| match table_get(table, &ref_key(n))? {
                Some(v) => parse_ref_value(n, &v).map(Some),
                None => Ok(None),
            },
            name,
            rflags,
        );
        let current = match resolved {
            Ok(res) if res.oid.is_null() => None,
            Ok(res) => Some(res.oid),
            Err(RefError::NotFound(_)) => {
                return Err(RefError::CasMismatch {
                    name: name.to_str_lossy().into_owned(),
                    expected: update.old.unwrap_or(ObjectId::NULL),
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
        if update.read_oid.is_none() {
            update.read_oid = current;
        }

        if !exists
            && !update.is_deletion()
            && !update.flags.contains(UpdateFlags::LOG_ONLY)
        {
            verify_available_in(table, name, &[], names)?;
        }

        let old_oid = update.read_oid.unwrap_or(ObjectId::NULL);

        if update.flags.contains(UpdateFlags::LOG_ONLY) {
            if let Some(new) = update.new {
                self.log_ref_write(table, name, old_oid, new, update.message.as_deref(), identity)?;
            }
        } else if update.is_deletion() {
            let removed = table
                .remove(ref_key(name).as_slice())
                .map_err(redb::Error::from)?
                .is_some();
            if !removed && matches!(update.old, Some(o) if !o.is_null()) {
                return Err(RefError::NotFound(name.to_str_lossy().into_owned()));
            }
            delete_reflog_in(table, name)?;
        } else if let Some(new) = update.new {
            let overwriting_symref =
                is_symref_here && update.flags.contains(UpdateFlags::NODEREF);
            if current == Some(new) && !overwriting_symref {
                // Already at the desired value; nothing to write or log.
                return Ok(());
            }
            table
                .insert(ref_key(name).as_slice(), object_value(new).as_slice())
                .map_err(redb::Error::from)?;
            self.log_ref_write(table, name, old_oid, new, update.message.as_deref(), identity)?;
        }
        Ok(())
    }

    fn log_ref_write(
        &self,
        table: &mut Table<'_, &'static [u8], &'static [u8]>,
        name: &BStr,
        old_oid: ObjectId,
        new_oid: ObjectId,
        message: Option<&str>,
        identity: &Signature,
    ) -> Result<(), RefError> {
        let header = log_header_key(name);
        if table_get(table, &header)?.is_none() {
            if !self.should_autocreate_reflog(name) {
                return Ok(());
            }
            table
                .insert(header.as_slice(), b"".as_slice())
                .map_err(redb::Error::from)?;
        }

        let entry = ReflogEntry::new(old_oid, new_oid, identity.clone(), message);
        let mut value: Vec<u8> = entry.to_bytes().into();
        value.push(0);
        table
            .insert(
                log_entry_key(name, self.next_log_timestamp()).as_slice(),
                value.as_slice(),
            )
            .map_err(redb::Error::from)?;
        Ok(())
    }
}

// Key and value encoding.

fn ref_key(name: &BStr) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 1);
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key
}

fn log_prefix(name: &BStr) -> Vec<u8> {
    let mut key = Vec::with_capacity(name.len() + 6);
    key.extend_from_slice(b"logs/");
    key.extend_from_slice(name.as_bytes());
    key.push(0);
    key
}

fn log_header_key(name: &BStr) -> Vec<u8> {
    let mut key = log_prefix(name);
    key.extend_from_slice(&[0u8; 8]);
    key
}

fn log_entry_key(name: &BStr, nanos: u64) -> Vec<u8> {
    let mut key = log_prefix(name);
    key.extend_from_slice(&nanos.to_be_bytes());
    key
}

fn object_value(oid: ObjectId) -> Vec<u8> {
    let mut value = oid.to_hex().into_bytes();
    value.push(0);
    value
}

fn symref_value(target: &BStr) -> Vec<u8> {
    let mut value = Vec::with_capacity(target.len() + 6);
    value.extend_from_slice(b"ref: ");
    value.extend_from_slice(target.as_bytes());
    value.push(0);
    value
}

fn parse_ref_value(name: &BStr, value: &[u8]) -> Result<RawRef, RefError> {
    let value = match value.last() {
        Some(0) => &value[..value.len() - 1],
        _ => value,
    };
    if let Some(rest) = value.strip_prefix(b"ref:") {
        let target = rest.trim_start_with(|c| c == ' ').trim_end();
        if target.is_empty() {
            return Err(RefError::Broken(name.to_str_lossy().into_owned()));
        }
        return Ok(RawRef::Symbolic(BString::from(target)));
    }
    ObjectId::from_hex(value.trim_end())
        .map(RawRef::Object)
        .map_err(|_| RefError::Broken(name.to_str_lossy().into_owned()))
}

// Table access helpers, generic over read-only and write tables.

fn table_get<T>(table: &T, key: &[u8]) -> Result<Option<Vec<u8>>, RefError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    Ok(table
        .get(key)
        .map_err(redb::Error::from)?
        .map(|guard| guard.value().to_vec()))
}

fn scan_prefix<T>(table: &T, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, RefError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut out = Vec::new();
    for item in table.range::<&[u8]>(prefix..).map_err(redb::Error::from)? {
        let (key, value) = item.map_err(redb::Error::from)?;
        if !key.value().starts_with(prefix) {
            break;
        }
        out.push((key.value().to_vec(), value.value().to_vec()));
    }
    Ok(out)
}

/// Name-availability walk: any key extending `name/` conflicts, and any
/// parent prefix of `name` present as a ref conflicts. Skip-list names are
/// ignored in both walks.
fn verify_available_in<T>(
    table: &T,
    name: &BStr,
    extras: &[BString],
    skip: &[BString],
) -> Result<(), RefError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let skipped = |candidate: &BStr| skip.iter().any(|s| s.as_bstr() == candidate);
    let conflict = |conflict: &BStr| {
        Err(RefError::NameConflict {
            name: name.to_str_lossy().into_owned(),
            conflict: conflict.to_str_lossy().into_owned(),
        })
    };

    let mut ext_prefix = name.as_bytes().to_vec();
    ext_prefix.push(b'/');
    for (key, _) in scan_prefix(table, &ext_prefix)? {
        let sub = key[..key.len() - 1].as_bstr();
        if !skipped(sub) {
            return conflict(sub);
        }
    }
    for extra in extras {
        if extra.starts_with(&ext_prefix) && !skipped(extra.as_bstr()) {
            return conflict(extra.as_bstr());
        }
    }

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
        if table_get(table, &ref_key(prefix))?.is_some() {
            return conflict(prefix);
        }
    }
    Ok(())
}

fn delete_reflog_in(
    table: &mut Table<'_, &'static [u8], &'static [u8]>,
    name: &BStr,
) -> Result<(), RefError> {
    let keys: Vec<Vec<u8>> = scan_prefix(table, &log_prefix(name))?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    for key in keys {
        table
            .remove(key.as_slice())
            .map_err(redb::Error::from)?;
    }
    Ok(())
}

/// Split a reflog key into its 8-byte timestamp suffix. The all-zero
/// timestamp is the header.
fn log_key_timestamp(key: &[u8]) -> [u8; 8] {
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&key[key.len() - 8..]);
    ts
}

impl RefBackend for RedbBackend {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn init_db(&self) -> Result<(), RefError> {
        let guard = self.slot.begin_write()?;
        guard
            .txn()
            .open_table(REFS_TABLE)
            .map_err(redb::Error::from)?;
        guard.commit()
    }

    fn read_raw_ref(&self, name: &BStr) -> Result<Option<RawRef>, RefError> {
        self.slot.with_read(|table| {
            match table_get(table, &ref_key(name))? {
                Some(value) => parse_ref_value(name, &value).map(Some),
                None => Ok(None),
            }
        })
    }

    fn commit(&self, tx: &mut RefTransaction, identity: &Signature) -> Result<(), RefError> {
        if tx.is_empty() {
            return Ok(());
        }
        let names = check_duplicate_names(&tx.updates)?;
        let order = sorted_update_order(&tx.updates);

        let guard = self.slot.begin_write()?;
        {
            let mut table = guard
                .txn()
                .open_table(REFS_TABLE)
                .map_err(redb::Error::from)?;
            for &i in &order {
                self.apply_update(&mut table, &mut tx.updates[i], &names, identity)?;
            }
        }
        guard.commit()
    }

    fn initial_commit(
        &self,
        tx: &mut RefTransaction,
        _identity: &Signature,
    ) -> Result<(), RefError> {
        check_duplicate_names(&tx.updates)?;
        let guard = self.slot.begin_write()?;
        {
            let mut table = guard
                .txn()
                .open_table(REFS_TABLE)
                .map_err(redb::Error::from)?;
            for update in &tx.updates {
                let name = update.name.as_bstr();
                match update.new {
                    Some(new) if !new.is_null() => {
                        table
                            .insert(ref_key(name).as_slice(), object_value(new).as_slice())
                            .map_err(redb::Error::from)?;
                    }
                    _ => {
                        return Err(RefError::Generic(format!(
                            "initial transaction may only create refs, not '{}'",
                            name.to_str_lossy()
                        )))
                    }
                }
            }
        }
        guard.commit()
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

        // Resolve everything inside one snapshot, then run the callbacks
        // without holding the slot (they may reenter the backend).
        let resolved: Vec<(BString, ObjectId, RefFlags)> = self.slot.with_read(|table| {
            let mut out = Vec::new();
            for (key, value) in scan_prefix(table, base.as_bytes())? {
                let name = BString::from(&key[..key.len() - 1]);
                let outcome = parse_ref_value(name.as_bstr(), &value).and_then(|raw| match raw {
                    RawRef::Object(oid) => Ok((oid, RefFlags::empty())),
                    RawRef::Symbolic(_) => resolve_raw(
                        |n: &BStr| match table_get(table, &ref_key(n))? {
                            Some(v) => parse_ref_value(n, &v).map(Some),
                            None => Ok(None),
                        },
                        name.as_bstr(),
                        ResolveFlags::empty(),
                    )
                    .map(|res| (res.oid, res.flags)),
                });
                match outcome {
                    Ok((oid, rf)) if !oid.is_null() && !rf.contains(RefFlags::ISBROKEN) => {
                        out.push((name, oid, rf))
                    }
                    Ok((oid, rf)) => out.push((name, oid, rf | RefFlags::ISBROKEN)),
                    Err(RefError::Broken(_))
                    | Err(RefError::NotFound(_))
                    | Err(RefError::TooDeep(_)) => {
                        out.push((name, ObjectId::NULL, RefFlags::ISBROKEN))
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(out)
        })?;

        for (name, oid, ref_flags) in resolved {
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
        self.slot
            .with_read(|table| verify_available_in(table, name, extras, skip))
    }

    fn create_symref(
        &self,
        name: &BStr,
        target: &BStr,
        log: Option<(ObjectId, ObjectId, &str)>,
        identity: &Signature,
    ) -> Result<(), RefError> {
        let guard = self.slot.begin_write()?;
        {
            let mut table = guard
                .txn()
                .open_table(REFS_TABLE)
                .map_err(redb::Error::from)?;
            table
                .insert(ref_key(name).as_slice(), symref_value(target).as_slice())
                .map_err(redb::Error::from)?;
            if let Some((old_oid, new_oid, msg)) = log {
                self.log_ref_write(&mut table, name, old_oid, new_oid, Some(msg), identity)?;
            }
        }
        guard.commit()
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
        let oid = match self.read_raw_ref(old_name)? {
            None => return Err(RefError::NotFound(old_name.to_str_lossy().into_owned())),
            Some(RawRef::Symbolic(_)) => {
                return Err(RefError::Generic(format!(
                    "refname {} is a symbolic ref, renaming it is not supported",
                    old_name.to_str_lossy()
                )))
            }
            Some(RawRef::Object(oid)) => oid,
        };

        let guard = self.slot.begin_write()?;
        {
            let mut table = guard
                .txn()
                .open_table(REFS_TABLE)
                .map_err(redb::Error::from)?;
            verify_available_in(
                &table,
                new_name,
                &[],
                &[BString::from(old_name.as_bytes())],
            )?;

            // Re-key each reflog entry under the new name, preserving the
            // original timestamp bytes.
            let old_log = scan_prefix(&table, &log_prefix(old_name))?;
            if !old_log.is_empty() {
                table
                    .insert(log_header_key(new_name).as_slice(), b"".as_slice())
                    .map_err(redb::Error::from)?;
                for (key, value) in &old_log {
                    let ts = log_key_timestamp(key);
                    if ts == [0u8; 8] {
                        continue;
                    }
                    let mut new_key = log_prefix(new_name);
                    new_key.extend_from_slice(&ts);
                    table
                        .insert(new_key.as_slice(), value.as_slice())
                        .map_err(redb::Error::from)?;
                }
                for (key, _) in &old_log {
                    table
                        .remove(key.as_slice())
                        .map_err(redb::Error::from)?;
                }
            }

            table
                .remove(ref_key(old_name).as_slice())
                .map_err(redb::Error::from)?;
            table
                .insert(ref_key(new_name).as_slice(), object_value(oid).as_slice())
                .map_err(redb::Error::from)?;
            self.log_ref_write(&mut table, new_name, oid, oid, logmsg, identity)?;
        }
        guard.commit()
    }

    fn peel_ref(&self, _name: &BStr) -> Result<Option<ObjectId>, RefError> {
        // No peeled values on record; peeling is the object layer's business.
        Ok(None)
    }

    fn pack_refs(&self, _prune: bool) -> Result<(), RefError> {
        // This concept does not exist in this backend.
        Ok(())
    }

    fn delete_refs(&self, names: &[BString]) -> Result<(), RefError> {
        let guard = self.slot.begin_write()?;
        {
            let mut table = guard
                .txn()
                .open_table(REFS_TABLE)
                .map_err(redb::Error::from)?;
            for name in names {
                table
                    .remove(ref_key(name.as_bstr()).as_slice())
                    .map_err(redb::Error::from)?;
                delete_reflog_in(&mut table, name.as_bstr())?;
            }
        }
        guard.commit()
    }

    fn reflog_exists(&self, name: &BStr) -> Result<bool, RefError> {
        self.slot
            .with_read(|table| Ok(!scan_prefix(table, &log_prefix(name))?.is_empty()))
    }

    fn create_reflog(&self, name: &BStr, force: bool) -> Result<(), RefError> {
        if !force && !self.should_autocreate_reflog(name) {
            return Ok(());
        }
        let guard = self.slot.begin_write()?;
        {
            let mut table = guard
                .txn()
                .open_table(REFS_TABLE)
                .map_err(redb::Error::from)?;
            table
                .insert(log_header_key(name).as_slice(), b"".as_slice())
                .map_err(redb::Error::from)?;
        }
        guard.commit()
    }

    fn delete_reflog(&self, name: &BStr) -> Result<(), RefError> {
        let guard = self.slot.begin_write()?;
        {
            let mut table = guard
                .txn()
                .open_table(REFS_TABLE)
                .map_err(redb::Error::from)?;
            delete_reflog_in(&mut table, name)?;
        }
        guard.commit()
    }

    fn for_each_reflog(&self, f: &mut dyn FnMut(&BStr) -> i32) -> Result<i32, RefError> {
        let names: Vec<BString> = self.slot.with_read(|table| {
            let mut out = Vec::new();
            for (key, _) in scan_prefix(table, b"logs/")? {
                if log_key_timestamp(&key) == [0u8; 8] {
                    out.push(BString::from(&key[5..key.len() - 9]));
                }
            }
            Ok(out)
        })?;
        for name in names {
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
        for entry in self.read_log_entries(name)? {
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
        for entry in self.read_log_entries(name)?.iter().rev() {
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
        if flags.contains(ExpireFlags::DRY_RUN) {
            for entry in self.read_log_entries(name)? {
                keep(&entry);
            }
            return Ok(());
        }

        let symbolic = matches!(self.read_raw_ref(name)?, Some(RawRef::Symbolic(_)));
        let mut last_kept: Option<ObjectId> = None;

        let guard = self.slot.begin_write()?;
        {
            let mut table = guard
                .txn()
                .open_table(REFS_TABLE)
                .map_err(redb::Error::from)?;
            let items = scan_prefix(&table, &log_prefix(name))?;
            for (key, value) in items {
                if log_key_timestamp(&key) == [0u8; 8] {
                    continue;
                }
                let stripped = match value.last() {
                    Some(0) => &value[..value.len() - 1],
                    _ => value.as_slice(),
                };
                let mut entry = ReflogEntry::parse(stripped.as_bstr())?;
                if flags.contains(ExpireFlags::REWRITE) {
                    if let Some(prev) = last_kept {
                        entry.old_oid = prev;
                    }
                }
                if keep(&entry) {
                    last_kept = Some(entry.new_oid);
                    if flags.contains(ExpireFlags::REWRITE) {
                        let mut rewritten: Vec<u8> = entry.to_bytes().into();
                        rewritten.push(0);
                        table
                            .insert(key.as_slice(), rewritten.as_slice())
                            .map_err(redb::Error::from)?;
                    }
                } else {
                    table
                        .remove(key.as_slice())
                        .map_err(redb::Error::from)?;
                }
            }

            if flags.contains(ExpireFlags::UPDATE_REF) && !symbolic {
                if let Some(last) = last_kept.filter(|oid| !oid.is_null()) {
                    table
                        .insert(ref_key(name).as_slice(), object_value(last).as_slice())
                        .map_err(redb::Error::from)?;
                }
            }
        }
        guard.commit()
    }
}

impl RedbBackend {
    fn read_log_entries(&self, name: &BStr) -> Result<Vec<ReflogEntry>, RefError> {
        self.slot.with_read(|table| {
            let mut entries = Vec::new();
            for (key, value) in scan_prefix(table, &log_prefix(name))? {
                if log_key_timestamp(&key) == [0u8; 8] {
                    continue;
                }
                let stripped = match value.last() {
                    Some(0) => &value[..value.len() - 1],
                    _ => value.as_slice(),
                };
                entries.push(ReflogEntry::parse(stripped.as_bstr())?);
            }
            Ok(entries)
        })
    }
}
