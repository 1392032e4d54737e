//! Transaction control on the calling thread's connection.

use rusqlite::ffi;

use crate::database::{Database, Query};
use crate::error::{LiteError, Result};

static BEGIN: Query = Query::new("begin transaction");
static COMMIT: Query = Query::new("commit transaction");
static ROLLBACK: Query = Query::new("rollback transaction");

impl Database {
    /// Start a transaction on this thread's connection.
    pub fn begin_transaction(&'static self) -> Result<()> {
        self.control(&BEGIN, "begin")
    }

    pub fn commit(&'static self) -> Result<()> {
        self.control(&COMMIT, "commit")
    }

    pub fn rollback(&'static self) -> Result<()> {
        self.control(&ROLLBACK, "rollback")
    }

    /// Start a transaction that rolls back unless committed.
    pub fn transaction(&'static self) -> Result<Transaction> {
        self.begin_transaction()?;
        Ok(Transaction {
            db: self,
            finished: false,
        })
    }

    fn control(&'static self, query: &'static Query, action: &'static str) -> Result<()> {
        let code = self.execute(query, &())?;
        if code != ffi::SQLITE_DONE {
            tracing::warn!(target: "litekit", code, action, "transaction control failed");
            return Err(LiteError::Engine { code });
        }
        tracing::trace!(target: "litekit", action, "transaction");
        Ok(())
    }
}

/// Scope guard for a transaction on the calling thread.
///
/// Dropping the guard without calling [`commit`](Self::commit) rolls the
/// transaction back.
#[must_use = "dropping a transaction rolls it back"]
#[derive(Debug)]
pub struct Transaction {
    db: &'static Database,
    finished: bool,
}

impl Transaction {
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.db.commit()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.db.rollback()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.db.rollback() {
                tracing::warn!(target: "litekit", error = %e, "rollback on drop failed");
            }
        }
    }
}
