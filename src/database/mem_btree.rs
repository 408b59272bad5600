use crate::database::{Insert, Session, Store, Transaction};
use anyhow::{Result, bail};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// In-memory table store with row-level write locks.
///
/// An insert takes a write lock on its key; if another live transaction
/// already holds it the insert reports [`Insert::Conflict`] instead of waiting,
/// so lock waits can never form a cycle. Writes stay buffered in the
/// transaction until commit applies them in one step.
#[derive(Default)]
pub struct MemBTree {
    tables: Mutex<HashMap<String, Arc<MemTable>>>,
    next_txn: AtomicU64,
    open_sessions: AtomicU64,
}

#[derive(Default)]
struct MemTable {
    rows: RwLock<BTreeMap<i64, Vec<u8>>>,
    /// key -> id of the transaction holding the write lock
    locks: Mutex<HashMap<i64, u64>>,
}

impl MemBTree {
    /// Sessions opened and not yet closed or dropped.
    pub fn open_sessions(&self) -> u64 {
        self.open_sessions.load(Ordering::Acquire)
    }

    fn table(&self, name: &str) -> Arc<MemTable> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_owned())
            .or_default()
            .clone()
    }

    #[cfg(test)]
    pub fn keys(&self, table: &str) -> Vec<i64> {
        self.table(table)
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    #[cfg(test)]
    pub fn value(&self, table: &str, key: i64) -> Option<Vec<u8>> {
        self.table(table)
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }
}

impl Store for MemBTree {
    fn name(&self) -> &'static str {
        "mem-btree"
    }

    fn open_session(&self, table: &str) -> Result<Box<dyn Session + '_>> {
        let table = self.table(table);
        self.open_sessions.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemSession { store: self, table }))
    }

    fn row_count(&self, table: &str) -> Result<u64> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tables.get(table).map_or(0, |t| {
            t.rows.read().unwrap_or_else(|e| e.into_inner()).len() as u64
        }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        let open = self.open_sessions();
        if open != 0 {
            bail!("{open} session(s) still open at close");
        }
        Ok(())
    }
}

struct MemSession<'a> {
    store: &'a MemBTree,
    table: Arc<MemTable>,
}

impl Session for MemSession<'_> {
    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>> {
        let id = self.store.next_txn.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemTxn {
            table: &self.table,
            id,
            writes: Vec::new(),
            prepared: false,
        }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Drop for MemSession<'_> {
    fn drop(&mut self) {
        self.store.open_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

struct MemTxn<'a> {
    table: &'a MemTable,
    id: u64,
    /// Every buffered key is also locked by this transaction.
    writes: Vec<(i64, Vec<u8>)>,
    prepared: bool,
}

impl MemTxn<'_> {
    fn release_locks(&mut self) {
        if self.writes.is_empty() {
            return;
        }
        let mut locks = self.table.locks.lock().unwrap_or_else(|e| e.into_inner());
        for (key, _) in self.writes.drain(..) {
            if locks.get(&key) == Some(&self.id) {
                locks.remove(&key);
            }
        }
    }
}

impl Transaction for MemTxn<'_> {
    fn insert(&mut self, key: i64, value: &[u8]) -> Result<Insert> {
        if self.prepared {
            bail!("txn {}: insert after prepare", self.id);
        }
        let mut locks = self.table.locks.lock().unwrap_or_else(|e| e.into_inner());
        match locks.entry(key) {
            Entry::Occupied(e) if *e.get() == self.id => {
                bail!("duplicate key {key} within txn {}", self.id)
            }
            Entry::Occupied(_) => Ok(Insert::Conflict),
            Entry::Vacant(e) => {
                if self
                    .table
                    .rows
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .contains_key(&key)
                {
                    bail!("duplicate key {key}");
                }
                e.insert(self.id);
                self.writes.push((key, value.to_vec()));
                Ok(Insert::Inserted)
            }
        }
    }

    fn prepare(&mut self, _id: u64) -> Result<()> {
        if self.prepared {
            bail!("txn {} already prepared", self.id);
        }
        self.prepared = true;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        {
            let mut rows = self.table.rows.write().unwrap_or_else(|e| e.into_inner());
            for (key, value) in &mut self.writes {
                rows.insert(*key, std::mem::take(value));
            }
        }
        // Row locks stay held until the rows are visible.
        self.release_locks();
        Ok(())
    }

    fn abort(mut self: Box<Self>) -> Result<()> {
        self.release_locks();
        Ok(())
    }
}

impl Drop for MemTxn<'_> {
    fn drop(&mut self) {
        self.release_locks();
    }
}
