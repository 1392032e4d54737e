//! Native connection handle.

use std::ffi::CStr;
use std::os::raw::{c_int, c_void};
use std::ptr::{self, NonNull};

use rusqlite::ffi;

use crate::config;
use crate::error::{LiteError, Result};
use crate::function;

// Compiled into the bundled engine but missing from the generated bindings.
extern "C" {
    pub(crate) fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// Called with every newly opened connection, e.g. to apply session pragmas.
///
/// The hook receives a non-owning `rusqlite` view of the handle; the raw
/// handle is available through `rusqlite::Connection::handle`.
pub type PostConnectionHook =
    Box<dyn Fn(&rusqlite::Connection) -> rusqlite::Result<()> + Send + Sync + 'static>;

/// One open engine handle, owned by exactly one thread.
///
/// Dropping the connection requests a deferred close: statements that are
/// still alive keep the engine state valid until they are finalized.
#[derive(Debug)]
pub(crate) struct Connection {
    handle: NonNull<ffi::sqlite3>,
}

/// Busy handler: yield and ask the engine to retry, without limit.
unsafe extern "C" fn yield_and_retry(_: *mut c_void, _attempts: c_int) -> c_int {
    std::thread::yield_now();
    1
}

impl Connection {
    /// Open a SQLite database.
    ///
    /// Supports:
    /// - `:memory:` for an in-memory database (private to the connection)
    /// - File path or `file:` URI for a disk-based database
    pub(crate) fn open(path: &CStr, hook: Option<&PostConnectionHook>) -> Result<Self> {
        config::ensure_configured();

        let mut raw = ptr::null_mut();
        let flags = ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_URI;
        let rc = unsafe { ffi::sqlite3_open_v2(path.as_ptr(), &mut raw, flags, ptr::null()) };
        if rc != ffi::SQLITE_OK {
            // The engine may hand back a handle even on failure; release it.
            unsafe { sqlite3_close_v2(raw) };
            tracing::warn!(target: "litekit", code = rc, path = ?path, "open failed");
            return Err(LiteError::Engine { code: rc });
        }
        let handle = NonNull::new(raw).ok_or(LiteError::Engine {
            code: ffi::SQLITE_NOMEM,
        })?;
        // From here on, early returns close the handle through Drop.
        let conn = Self { handle };

        unsafe { ffi::sqlite3_busy_handler(raw, Some(yield_and_retry), ptr::null_mut()) };

        function::install_all(handle)?;

        if let Some(hook) = hook {
            let view = unsafe { rusqlite::Connection::from_handle(raw) }?;
            hook(&view)?;
        }

        tracing::debug!(target: "litekit", path = ?path, "opened connection");
        Ok(conn)
    }

    #[inline]
    pub(crate) fn handle(&self) -> NonNull<ffi::sqlite3> {
        self.handle
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let rc = unsafe { sqlite3_close_v2(self.handle.as_ptr()) };
        if rc != ffi::SQLITE_OK {
            tracing::warn!(target: "litekit", code = rc, "close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_open_memory() {
        let path = CString::new(":memory:").unwrap();
        let conn = Connection::open(&path, None).unwrap();
        assert!(config::is_configured());
        let autocommit = unsafe { ffi::sqlite3_get_autocommit(conn.handle().as_ptr()) };
        assert_ne!(autocommit, 0);
    }

    #[test]
    fn test_open_failure_carries_code() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing").join("nested.db");
        let path = CString::new(missing.to_str().unwrap()).unwrap();
        let err = Connection::open(&path, None).unwrap_err();
        assert_eq!(err.code(), Some(ffi::SQLITE_CANTOPEN));
    }

    #[test]
    fn test_hook_sees_new_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let hook: PostConnectionHook = Box::new(move |conn: &rusqlite::Connection| {
            seen.fetch_add(1, Ordering::SeqCst);
            conn.execute_batch("PRAGMA user_version = 7;")
        });

        let path = CString::new(":memory:").unwrap();
        let conn = Connection::open(&path, Some(&hook)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let view = unsafe { rusqlite::Connection::from_handle(conn.handle().as_ptr()) }.unwrap();
        let version: i64 = view
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 7);
    }

    #[test]
    fn test_close_is_deferred_until_statements_finalize() {
        let path = CString::new(":memory:").unwrap();
        let conn = Connection::open(&path, None).unwrap();
        let sql = CString::new("select 7").unwrap();
        let mut stmt = crate::statement::Statement::prepare(conn.handle(), &sql).unwrap();

        drop(conn);
        assert_eq!(stmt.step(), ffi::SQLITE_ROW);
        let value = unsafe { ffi::sqlite3_column_int64(stmt.as_ptr(), 0) };
        assert_eq!(value, 7);
    }

    #[test]
    fn test_hook_failure_fails_open() {
        let hook: PostConnectionHook = Box::new(|conn: &rusqlite::Connection| conn.execute_batch("not sql at all"));
        let path = CString::new(":memory:").unwrap();
        let err = Connection::open(&path, Some(&hook)).unwrap_err();
        assert!(matches!(err, LiteError::Sqlite(_)));
    }
}
