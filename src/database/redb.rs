use crate::database::{Insert, Session, Store, Transaction};
use anyhow::{Result, bail};
use redb::{
    Database, ReadableDatabase, ReadableTableMetadata, TableDefinition, TableError,
    WriteTransaction,
};
use tempfile::NamedTempFile;

fn table(name: &str) -> TableDefinition<'_, i64, &'static [u8]> {
    TableDefinition::new(name)
}

/// redb serializes write transactions, so inserts never conflict; writers
/// queue inside `begin_write` instead.
pub struct Redb {
    _f: NamedTempFile,
    db: Database,
}

impl Redb {
    pub fn new() -> Result<Self> {
        let f = NamedTempFile::new()?;
        let db = Database::create(f.path())?;
        Ok(Redb { _f: f, db })
    }
}

impl Store for Redb {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn open_session(&self, name: &str) -> Result<Box<dyn Session + '_>> {
        let tx = self.db.begin_write()?;
        {
            let _ = tx.open_table(table(name))?;
        }
        tx.commit()?;
        Ok(Box::new(RedbSession {
            db: &self.db,
            table: name.to_owned(),
        }))
    }

    fn row_count(&self, name: &str) -> Result<u64> {
        let tx = self.db.begin_read()?;
        match tx.open_table(table(name)) {
            Ok(t) => Ok(t.len()?),
            Err(TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct RedbSession<'a> {
    db: &'a Database,
    table: String,
}

impl Session for RedbSession<'_> {
    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(RedbTxn {
            tx: self.db.begin_write()?,
            table: &self.table,
        }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Dropping the inner `WriteTransaction` aborts it.
struct RedbTxn<'a> {
    tx: WriteTransaction,
    table: &'a str,
}

impl Transaction for RedbTxn<'_> {
    fn insert(&mut self, key: i64, value: &[u8]) -> Result<Insert> {
        let mut t = self.tx.open_table(table(self.table))?;
        if t.insert(key, value)?.is_some() {
            bail!("duplicate key {key}");
        }
        Ok(Insert::Inserted)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn abort(self: Box<Self>) -> Result<()> {
        self.tx.abort()?;
        Ok(())
    }
}
