use crate::database::{Insert, Session, Store, Transaction, key_bytes};
use anyhow::{Result, bail};
use std::collections::HashSet;
use tempfile::TempDir;

/// sled has no interactive transactions here: inserts are buffered in a
/// `sled::Batch` and applied atomically on commit.
pub struct Sled {
    db: sled::Db,
    _f: TempDir,
}

impl Sled {
    pub fn new() -> Result<Self> {
        let f = TempDir::new()?;
        let db = sled::open(f.path())?;
        Ok(Sled { db, _f: f })
    }
}

impl Store for Sled {
    fn name(&self) -> &'static str {
        "sled"
    }

    fn open_session(&self, table: &str) -> Result<Box<dyn Session + '_>> {
        Ok(Box::new(SledSession {
            tree: self.db.open_tree(table)?,
        }))
    }

    fn row_count(&self, table: &str) -> Result<u64> {
        Ok(self.db.open_tree(table)?.len() as u64)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

struct SledSession {
    tree: sled::Tree,
}

impl Session for SledSession {
    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(SledTxn {
            tree: &self.tree,
            batch: sled::Batch::default(),
            keys: HashSet::new(),
        }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}

struct SledTxn<'a> {
    tree: &'a sled::Tree,
    batch: sled::Batch,
    keys: HashSet<i64>,
}

impl Transaction for SledTxn<'_> {
    fn insert(&mut self, key: i64, value: &[u8]) -> Result<Insert> {
        let k = key_bytes(key);
        if !self.keys.insert(key) || self.tree.contains_key(k)? {
            bail!("duplicate key {key}");
        }
        self.batch.insert(&k[..], value);
        Ok(Insert::Inserted)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let SledTxn { tree, batch, .. } = *self;
        tree.apply_batch(batch)?;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
