//! Logical databases, queries and the per-thread resource registry.
//!
//! A [`Database`] names one database file; a [`Query`] names one query text.
//! Both are meant to live in `static`s. Every thread keeps its own connection
//! per database and its own statement cache per (database, query), created on
//! first use and torn down when the thread exits.

use std::cell::RefCell;
use std::fmt;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use once_cell::sync::OnceCell;
use rusqlite::ffi;

use crate::bind::Params;
use crate::connection::{Connection, PostConnectionHook};
use crate::cursor::Cursor;
use crate::error::{LiteError, Result};
use crate::identity::{Identity, Slot};
use crate::statement::{Statement, StatementCache};

static NEXT_DATABASE: AtomicUsize = AtomicUsize::new(0);
static NEXT_QUERY: AtomicUsize = AtomicUsize::new(0);

// ============================================================================
// Thread-local registry
// ============================================================================

/// Identifies the cache a statement was checked out from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheKey {
    database: usize,
    query: usize,
}

struct ConnectionSlot {
    // Declared before `connection` so the caches (and every idle statement)
    // are dropped before the connection is closed.
    caches: Vec<Option<StatementCache>>,
    connection: Connection,
}

impl ConnectionSlot {
    fn cache(&mut self, query: usize) -> &mut StatementCache {
        if self.caches.len() <= query {
            self.caches.resize_with(query + 1, || None);
        }
        let handle = self.connection.handle();
        self.caches[query].get_or_insert_with(|| StatementCache::new(handle))
    }
}

#[derive(Default)]
struct Registry {
    connections: Vec<Option<ConnectionSlot>>,
}

impl Registry {
    fn slot(&mut self, database: usize) -> Option<&mut ConnectionSlot> {
        self.connections.get_mut(database)?.as_mut()
    }

    fn is_open(&self, database: usize) -> bool {
        matches!(self.connections.get(database), Some(Some(_)))
    }

    fn insert(&mut self, database: usize, connection: Connection) {
        if self.connections.len() <= database {
            self.connections.resize_with(database + 1, || None);
        }
        self.connections[database] = Some(ConnectionSlot {
            caches: Vec::new(),
            connection,
        });
    }

    fn existing_cache(&mut self, key: CacheKey) -> Option<&mut StatementCache> {
        self.slot(key.database)?.caches.get_mut(key.query)?.as_mut()
    }
}

thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry::default());
}

/// Return a statement to the cache identified by `key` on this thread.
///
/// If the thread's registry is already being torn down, the statement is
/// finalized instead.
pub(crate) fn checkin(key: CacheKey, stmt: Statement) {
    let _ = REGISTRY.try_with(move |registry| {
        let Ok(mut registry) = registry.try_borrow_mut() else {
            return;
        };
        if let Some(cache) = registry.existing_cache(key) {
            tracing::trace!(target: "litekit", ?key, "checkin");
            cache.checkin(stmt);
        }
    });
}

// ============================================================================
// Query
// ============================================================================

/// One query text, resolved once and prepared at most once per thread and
/// database while statements are recycled.
///
/// ```
/// use litekit::Query;
///
/// static SELECT_USER: Query = Query::new("select name from users where id = ?1");
/// ```
///
/// Queries are keyed by their slot, so they must be statics. A local query
/// would take a new slot on every use and never share a statement:
///
/// ```compile_fail
/// use litekit::{Database, Query};
///
/// static DB: Database = Database::new(":memory:");
///
/// let local = Query::new("select 1");
/// DB.execute(&local, &())?;
/// # Ok::<_, litekit::LiteError>(())
/// ```
pub struct Query {
    text: Identity,
    slot: Slot,
}

impl Query {
    pub const fn new(text: &'static str) -> Self {
        Self {
            text: Identity::literal(text),
            slot: Slot::new(),
        }
    }

    /// A query whose text is produced on first use.
    pub const fn from_fn(producer: fn() -> String) -> Self {
        Self {
            text: Identity::producer(producer),
            slot: Slot::new(),
        }
    }

    fn slot(&self) -> usize {
        self.slot.get(&NEXT_QUERY)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Query").field(&self.text).finish()
    }
}

// ============================================================================
// Database
// ============================================================================

/// A logical database: one path, one connection per thread.
///
/// Like [`Query`], a database is used through `&'static` references only.
///
/// ```no_run
/// use litekit::{Database, Query};
///
/// static DB: Database = Database::new("app.db");
/// static CREATE: Query = Query::new("create table if not exists kv (k, v)");
///
/// DB.execute(&CREATE, &())?;
/// # Ok::<_, litekit::LiteError>(())
/// ```
pub struct Database {
    name: Identity,
    slot: Slot,
    hook: OnceCell<PostConnectionHook>,
    prepared: AtomicU64,
}

impl Database {
    pub const fn new(path: &'static str) -> Self {
        Self {
            name: Identity::literal(path),
            slot: Slot::new(),
            hook: OnceCell::new(),
            prepared: AtomicU64::new(0),
        }
    }

    /// A database whose path is produced on first use.
    pub const fn from_fn(producer: fn() -> String) -> Self {
        Self {
            name: Identity::producer(producer),
            slot: Slot::new(),
            hook: OnceCell::new(),
            prepared: AtomicU64::new(0),
        }
    }

    /// Install the hook run on every new connection to this database.
    ///
    /// Must be called before the database is first used concurrently; the
    /// hook can be set only once.
    pub fn set_post_connection_hook<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&rusqlite::Connection) -> rusqlite::Result<()> + Send + Sync + 'static,
    {
        self.hook
            .set(Box::new(hook))
            .map_err(|_| LiteError::HookAlreadySet)
    }

    /// Bind `params` to `query` and start executing it.
    ///
    /// The statement comes from this thread's cache for `query` or is
    /// prepared on the spot. The returned cursor has already performed its
    /// first step.
    pub fn query<'a, P>(&'static self, query: &'static Query, params: &'a P) -> Result<Cursor<'a>>
    where
        P: Params + ?Sized,
    {
        let key = CacheKey {
            database: self.slot(),
            query: query.slot(),
        };
        self.connect(key.database)?;
        let stmt = self.checkout(key, query)?;

        // A failed bind drops the cursor, which recycles the statement.
        let mut cursor = Cursor::new(stmt, key);
        params.bind_all(&mut cursor.binder())?;
        cursor.start();
        Ok(cursor)
    }

    /// Run `query` for its effect and return the engine code of its first step.
    pub fn execute<P>(&'static self, query: &'static Query, params: &P) -> Result<c_int>
    where
        P: Params + ?Sized,
    {
        let cursor = self.query(query, params)?;
        Ok(cursor.result_code())
    }

    /// Statements prepared from scratch for this database, across all threads.
    pub fn statements_prepared(&self) -> u64 {
        self.prepared.load(Ordering::Relaxed)
    }

    /// Idle statements cached for `query` on the calling thread.
    pub fn idle_statements(&'static self, query: &'static Query) -> usize {
        let key = CacheKey {
            database: self.slot(),
            query: query.slot(),
        };
        REGISTRY.with(|registry| {
            registry
                .borrow_mut()
                .existing_cache(key)
                .map_or(0, |cache| cache.idle())
        })
    }

    /// Whether the calling thread has an open connection to this database.
    pub fn is_connected(&'static self) -> bool {
        let database = self.slot();
        REGISTRY.with(|registry| registry.borrow().is_open(database))
    }

    fn slot(&self) -> usize {
        self.slot.get(&NEXT_DATABASE)
    }

    /// Open this thread's connection if it does not exist yet.
    ///
    /// The connection is opened outside the registry borrow so the
    /// post-connection hook may run arbitrary code.
    fn connect(&self, database: usize) -> Result<()> {
        if REGISTRY.with(|registry| registry.borrow().is_open(database)) {
            return Ok(());
        }
        let path = self.name.resolve()?;
        let connection = Connection::open(path, self.hook.get())?;
        REGISTRY.with(|registry| registry.borrow_mut().insert(database, connection));
        Ok(())
    }

    fn checkout(&self, key: CacheKey, query: &Query) -> Result<Statement> {
        let sql = query.text.resolve()?;
        let (stmt, fresh) = REGISTRY.with(|registry| {
            let mut registry = registry.borrow_mut();
            let slot = registry.slot(key.database).ok_or(LiteError::Engine {
                code: ffi::SQLITE_MISUSE,
            })?;
            slot.cache(key.query).checkout(sql)
        })?;
        if fresh {
            self.prepared.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(target: "litekit", ?key, fresh, "checkout");
        Ok(stmt)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("hook", &self.hook.get().is_some())
            .field("prepared", &self.statements_prepared())
            .finish()
    }
}
