//! The key-value store's transaction slot.
//!
//! The underlying store forbids concurrent transactions from one process, so
//! "the current transaction" lives in one slot per backend instance rather
//! than being created ad hoc:
//!
//! - nested reads reuse the cached read snapshot;
//! - beginning a write aborts the cached read snapshot and reopens
//!   read-write;
//! - when another process may have written the store (tracked by a
//!   monotonically increasing command counter), the next read forces a
//!   restart to refresh the snapshot;
//! - beginning a read-write transaction while one is open is a programmer
//!   error, not an input error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use redb::{Database, ReadOnlyTable, ReadTransaction, TableDefinition, WriteTransaction};

use crate::error::RefError;

/// The single table holding refs, reflog headers and reflog entries.
pub(crate) const REFS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("refs");

struct ReadSlot {
    txn: Option<ReadTransaction>,
    seen_commands: u64,
}

pub(crate) struct TxnSlot {
    db: Arc<Database>,
    read: Mutex<ReadSlot>,
    write_active: AtomicBool,
    commands_run: AtomicU64,
}

impl TxnSlot {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            read: Mutex::new(ReadSlot {
                txn: None,
                seen_commands: 0,
            }),
            write_active: AtomicBool::new(false),
            commands_run: AtomicU64::new(0),
        }
    }

    /// Run `f` against the current read snapshot, opening or refreshing it
    /// as required. The slot's lock is held for the duration, so `f` must
    /// not call back into the slot.
    pub(crate) fn with_read<R>(
        &self,
        f: impl FnOnce(&ReadOnlyTable<&'static [u8], &'static [u8]>) -> Result<R, RefError>,
    ) -> Result<R, RefError> {
        let mut slot = self.read.lock().expect("transaction slot poisoned");

        let commands = self.commands_run.load(Ordering::Acquire);
        if slot.txn.is_some() && slot.seen_commands != commands {
            // A downstream process may have written the store; the old
            // snapshot must not be reused.
            slot.txn = None;
        }
        if slot.txn.is_none() {
            slot.txn = Some(self.db.begin_read().map_err(redb::Error::from)?);
            slot.seen_commands = commands;
        }

        let table = slot
            .txn
            .as_ref()
            .expect("read transaction just opened")
            .open_table(REFS_TABLE)
            .map_err(redb::Error::from)?;
        f(&table)
    }

    /// Open the read-write transaction, upgrading from (and invalidating)
    /// any cached read snapshot.
    ///
    /// # Panics
    ///
    /// Panics if a read-write transaction is already open on this slot.
    pub(crate) fn begin_write(&self) -> Result<WriteGuard<'_>, RefError> {
        if self.write_active.swap(true, Ordering::AcqRel) {
            panic!("BUG: read-write transaction started during another read-write transaction");
        }
        self.read.lock().expect("transaction slot poisoned").txn = None;

        match self.db.begin_write() {
            Ok(txn) => Ok(WriteGuard {
                slot: self,
                txn: Some(txn),
            }),
            Err(e) => {
                self.write_active.store(false, Ordering::Release);
                Err(redb::Error::from(e).into())
            }
        }
    }

    /// Record that a downstream process has run and may have written the
    /// store. The next read restarts its snapshot.
    pub(crate) fn note_external_commands(&self) {
        self.commands_run.fetch_add(1, Ordering::AcqRel);
    }
}

/// RAII wrapper for the slot's write transaction: abort on drop, release the
/// slot either way.
pub(crate) struct WriteGuard<'a> {
    slot: &'a TxnSlot,
    txn: Option<WriteTransaction>,
}

impl WriteGuard<'_> {
    pub(crate) fn txn(&self) -> &WriteTransaction {
        self.txn.as_ref().expect("write transaction taken")
    }

    pub(crate) fn commit(mut self) -> Result<(), RefError> {
        let txn = self.txn.take().expect("write transaction taken");
        txn.commit().map_err(redb::Error::from)?;
        Ok(())
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            let _ = txn.abort();
        }
        self.slot.write_active.store(false, Ordering::Release);
    }
}
