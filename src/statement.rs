//! Prepared statement ownership and per-query caching.
//!
//! This module provides:
//! - `Statement`: owning handle to a native prepared statement
//! - `StatementCache`: idle statements for one query text on one thread

use std::ffi::CStr;
use std::os::raw::{c_int, c_uint};
use std::ptr::{self, NonNull};

use rusqlite::ffi;
use smallvec::SmallVec;

use crate::error::{LiteError, Result};

// ============================================================================
// Statement
// ============================================================================

/// A native prepared statement. Finalized on drop.
///
/// Not `Send`: the statement belongs to the connection of the thread that
/// prepared it.
#[derive(Debug)]
pub(crate) struct Statement {
    raw: NonNull<ffi::sqlite3_stmt>,
}

impl Statement {
    /// Prepare `sql` against `db` with the persistent planning hint.
    ///
    /// The byte count handed to the engine includes the trailing NUL.
    pub(crate) fn prepare(db: NonNull<ffi::sqlite3>, sql: &CStr) -> Result<Self> {
        let bytes = sql.to_bytes_with_nul();
        let len = c_int::try_from(bytes.len()).map_err(|_| LiteError::Engine {
            code: ffi::SQLITE_TOOBIG,
        })?;

        let mut raw = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_prepare_v3(
                db.as_ptr(),
                sql.as_ptr(),
                len,
                ffi::SQLITE_PREPARE_PERSISTENT as c_uint,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            // prepare_v3 leaves the output null on failure, but finalize(NULL)
            // is a no-op either way.
            unsafe { ffi::sqlite3_finalize(raw) };
            tracing::debug!(target: "litekit", code = rc, sql = ?sql, "prepare failed");
            return Err(LiteError::Engine { code: rc });
        }

        // Whitespace-only or comment-only text prepares to NULL.
        let raw = NonNull::new(raw).ok_or(LiteError::Engine {
            code: ffi::SQLITE_MISUSE,
        })?;
        tracing::debug!(target: "litekit", sql = ?sql, "prepared statement");
        Ok(Self { raw })
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut ffi::sqlite3_stmt {
        self.raw.as_ptr()
    }

    #[inline]
    pub(crate) fn raw(&self) -> NonNull<ffi::sqlite3_stmt> {
        self.raw
    }

    /// Execute one step and return the engine's result code.
    pub(crate) fn step(&mut self) -> c_int {
        unsafe { ffi::sqlite3_step(self.as_ptr()) }
    }

    pub(crate) fn column_count(&self) -> usize {
        unsafe { ffi::sqlite3_column_count(self.as_ptr()) as usize }
    }

    /// Clear parameter bindings and rewind to the un-stepped state.
    pub(crate) fn clear_and_reset(&mut self) {
        unsafe {
            ffi::sqlite3_clear_bindings(self.as_ptr());
            ffi::sqlite3_reset(self.as_ptr());
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        unsafe { ffi::sqlite3_finalize(self.as_ptr()) };
    }
}

// ============================================================================
// Statement Cache
// ============================================================================

/// Idle prepared statements for one query text on one thread's connection.
///
/// A distinguished single slot serves the common one-cursor-at-a-time case;
/// additional statements go to an overflow list. There is no upper bound:
/// the cache grows to the peak number of concurrent cursors for the query.
///
/// The cache does not own the connection handle. It must be dropped before
/// the connection, which the owning registry slot guarantees.
pub(crate) struct StatementCache {
    db: NonNull<ffi::sqlite3>,
    first_free: Option<Statement>,
    other_free: SmallVec<[Statement; 4]>,
}

impl StatementCache {
    pub(crate) fn new(db: NonNull<ffi::sqlite3>) -> Self {
        Self {
            db,
            first_free: None,
            other_free: SmallVec::new(),
        }
    }

    /// Take an idle statement, or prepare a new one from `sql`.
    ///
    /// The flag is `true` when the statement was freshly prepared.
    pub(crate) fn checkout(&mut self, sql: &CStr) -> Result<(Statement, bool)> {
        if let Some(stmt) = self.first_free.take() {
            return Ok((stmt, false));
        }
        if let Some(stmt) = self.other_free.pop() {
            return Ok((stmt, false));
        }
        Statement::prepare(self.db, sql).map(|stmt| (stmt, true))
    }

    /// Return a statement for later reuse.
    pub(crate) fn checkin(&mut self, stmt: Statement) {
        if self.first_free.is_none() {
            self.first_free = Some(stmt);
        } else {
            self.other_free.push(stmt);
        }
    }

    /// Number of idle statements.
    pub(crate) fn idle(&self) -> usize {
        usize::from(self.first_free.is_some()) + self.other_free.len()
    }
}
