//! Litekit - thread-local SQLite connections with cached prepared statements.
//!
//! Declare databases and queries as statics; each thread lazily opens its own
//! connection per database and keeps a pool of reusable prepared statements
//! per query.
//!
//! ```no_run
//! use litekit::{Database, Query};
//!
//! static DB: Database = Database::new("users.db");
//! static CREATE: Query = Query::new("create table if not exists users (id integer, name text)");
//! static INSERT: Query = Query::new("insert into users values (?1, ?2)");
//! static SELECT: Query = Query::new("select id, name from users");
//!
//! DB.execute(&CREATE, &())?;
//! DB.execute(&INSERT, &(1, "ada"))?;
//!
//! let mut rows = DB.query(&SELECT, &())?;
//! while let Some((id, name)) = rows.fetch::<(i64, String)>()? {
//!     println!("{id}: {name}");
//! }
//! # Ok::<_, litekit::LiteError>(())
//! ```

mod bind;
mod config;
mod connection;
pub mod convert;
mod cursor;
mod database;
mod error;
mod extract;
mod function;
mod identity;
mod statement;
mod transaction;
mod types;

#[cfg(test)]
mod tests;

pub use rusqlite::ffi;

pub use bind::{Bind, Binder, Params};
pub use config::{configure, is_configured, EngineConfig, LogCallback, ThreadingMode};
pub use connection::PostConnectionHook;
pub use convert::{Deserialize, Json, Serialize};
pub use cursor::Cursor;
pub use database::{Database, Query};
pub use error::{LiteError, Result};
pub use extract::{Extract, Fields, FromRow, Output, Outputs};
pub use function::{create_function, ScalarFunction};
pub use transaction::Transaction;
pub use types::{Blob, BlobView, Null, Value};
