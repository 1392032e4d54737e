//! Row-by-row access to one query execution.

use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::os::raw::c_int;

use rusqlite::ffi;

use crate::bind::Binder;
use crate::database::{self, CacheKey};
use crate::error::{LiteError, Result};
use crate::extract::{Fields, FromRow, Outputs};
use crate::statement::Statement;

/// One in-flight execution of a query.
///
/// The statement runs its first step when the cursor is created, so
/// statements that return no rows take effect even if the cursor is never
/// advanced. Each advance then yields one row until the engine reports
/// anything other than `SQLITE_ROW`; from that point every advance reports
/// "no row" without touching the statement.
///
/// `'a` borrows the bound parameters: text and blobs are bound without
/// copying and must outlive every step.
///
/// Dropping the cursor clears the bindings, resets the statement and returns
/// it to the cache it came from.
pub struct Cursor<'a> {
    stmt: ManuallyDrop<Statement>,
    key: CacheKey,
    code: c_int,
    fresh: bool,
    _params: PhantomData<&'a ()>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(stmt: Statement, key: CacheKey) -> Self {
        Self {
            stmt: ManuallyDrop::new(stmt),
            key,
            code: ffi::SQLITE_OK,
            fresh: false,
            _params: PhantomData,
        }
    }

    pub(crate) fn binder(&self) -> Binder<'a> {
        Binder::parameters(self.stmt.raw())
    }

    /// Run the first step. The next advance consumes its result.
    pub(crate) fn start(&mut self) {
        self.step();
        self.fresh = true;
    }

    /// Engine result code of the most recent step.
    pub fn result_code(&self) -> c_int {
        self.code
    }

    /// Number of columns the statement produces.
    pub fn column_count(&self) -> usize {
        self.stmt.column_count()
    }

    /// Advance to the next row and store its columns into `outputs`.
    ///
    /// `outputs` is a tuple of `&mut T` slots (or [`Null`](crate::Null) to
    /// skip a column). Returns `false` once the rows are exhausted or the
    /// statement failed; see [`result_code`](Self::result_code).
    ///
    /// Every column is read before any slot is written, so on error the
    /// slots keep their previous values.
    pub fn next<'r, O: Outputs<'r>>(&'r mut self, outputs: O) -> Result<bool> {
        if !self.advance(O::COLUMNS)? {
            return Ok(false);
        }
        // SAFETY: the row stays current while `self` is borrowed for 'r.
        let mut fields = unsafe { Fields::row(self.stmt.raw()) };
        outputs.fill(&mut fields)?;
        Ok(true)
    }

    /// Advance to the next row and return it as a tuple.
    pub fn fetch<'r, T: FromRow<'r>>(&'r mut self) -> Result<Option<T>> {
        if !self.advance(T::COLUMNS)? {
            return Ok(None);
        }
        // SAFETY: the row stays current while `self` is borrowed for 'r.
        let mut fields = unsafe { Fields::row(self.stmt.raw()) };
        T::from_row(&mut fields).map(Some)
    }

    /// Drain the remaining rows into owned tuples.
    pub fn collect<T>(mut self) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r>,
    {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch::<T>()? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn advance(&mut self, requested: usize) -> Result<bool> {
        let available = self.column_count();
        if requested > available {
            return Err(LiteError::ColumnMismatch {
                requested,
                available,
            });
        }

        if self.fresh {
            self.fresh = false;
        } else if self.code == ffi::SQLITE_ROW {
            self.step();
        }
        Ok(self.code == ffi::SQLITE_ROW)
    }

    fn step(&mut self) {
        self.code = self.stmt.step();
        if self.code != ffi::SQLITE_ROW && self.code != ffi::SQLITE_DONE {
            tracing::debug!(target: "litekit", code = self.code, "step failed");
        }
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        // SAFETY: `stmt` is never touched again after this.
        let mut stmt = unsafe { ManuallyDrop::take(&mut self.stmt) };
        stmt.clear_and_reset();
        database::checkin(self.key, stmt);
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("key", &self.key)
            .field("code", &self.code)
            .field("fresh", &self.fresh)
            .finish()
    }
}
