mod mem_btree;
mod redb;
mod sled;

pub use crate::database::mem_btree::MemBTree;
use crate::database::redb::Redb;
use crate::database::sled::Sled;
use anyhow::Result;
use clap::ValueEnum;

/// Result of a single insert inside a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Insert {
    Inserted,
    /// Another live transaction holds a write lock on the row.
    Conflict,
}

/// Shared store environment. Sessions are created concurrently from every worker.
pub trait Store: Send + Sync {
    fn name(&self) -> &'static str;
    fn open_session(&self, table: &str) -> Result<Box<dyn Session + '_>>;
    /// Number of committed rows in `table`; used for verification outside the timed region.
    fn row_count(&self, table: &str) -> Result<u64>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// A connection owned by exactly one worker. Dropping it releases it.
pub trait Session: Send {
    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// Dropping a transaction that was neither committed nor aborted rolls it back.
pub trait Transaction {
    fn insert(&mut self, key: i64, value: &[u8]) -> Result<Insert>;

    /// First phase of a two-phase commit. Engines without one accept it as a no-op.
    fn prepare(&mut self, _id: u64) -> Result<()> {
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()>;
    fn abort(self: Box<Self>) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
// Update database::open when adding new variation
pub enum StoreKind {
    MemBtree,
    Redb,
    Sled,
}

pub fn open(kind: StoreKind) -> Result<Box<dyn Store>> {
    match kind {
        StoreKind::MemBtree => Ok(Box::new(MemBTree::default())),
        StoreKind::Redb => Ok(Box::new(Redb::new()?)),
        StoreKind::Sled => Ok(Box::new(Sled::new()?)),
    }
}

/// Order-preserving big-endian encoding of a signed key.
pub(crate) fn key_bytes(key: i64) -> [u8; 8] {
    ((key as u64) ^ (1 << 63)).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bytes_preserve_order() {
        let keys = [i64::MIN, -1, 0, 1, 255, 256, i64::MAX];
        for w in keys.windows(2) {
            assert!(key_bytes(w[0]) < key_bytes(w[1]), "{} vs {}", w[0], w[1]);
        }
    }

    #[test]
    fn every_backend_commits_and_counts() -> Result<()> {
        for kind in [StoreKind::MemBtree, StoreKind::Redb, StoreKind::Sled] {
            let store = open(kind)?;
            {
                let mut session = store.open_session("t")?;
                let mut tx = session.begin()?;
                for key in 0..10 {
                    assert_eq!(tx.insert(key, b"v")?, Insert::Inserted);
                }
                tx.prepare(1)?;
                tx.commit()?;

                let mut tx = session.begin()?;
                tx.insert(10, b"v")?;
                tx.abort()?;

                let mut tx = session.begin()?;
                tx.insert(11, b"v")?;
                drop(tx);
                session.close()?;
            }
            assert_eq!(store.row_count("t")?, 10, "{}", store.name());
            store.close()?;
        }
        Ok(())
    }

    #[test]
    fn every_backend_rejects_duplicate_keys() -> Result<()> {
        for kind in [StoreKind::MemBtree, StoreKind::Redb, StoreKind::Sled] {
            let store = open(kind)?;
            let mut session = store.open_session("t")?;
            let mut tx = session.begin()?;
            tx.insert(7, b"v")?;
            tx.commit()?;

            let mut tx = session.begin()?;
            assert!(tx.insert(7, b"w").is_err(), "{}", store.name());
        }
        Ok(())
    }
}
