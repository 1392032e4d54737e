//! Error types for litekit.
//!
//! Setup failures (open, prepare, bind) surface here. Step failures do not:
//! they stay on the cursor as a result code.

use std::ffi::NulError;
use std::os::raw::c_int;

use rusqlite::ffi;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiteError {
    /// The engine rejected an open, prepare or bind call.
    #[error("SQLite error ({code}): {}", describe(.code))]
    Engine { code: c_int },

    #[error("requested {requested} columns but the row has {available}")]
    ColumnMismatch { requested: usize, available: usize },

    #[error("column {column} is not valid UTF-8")]
    Utf8 {
        column: usize,
        #[source]
        source: std::str::Utf8Error,
    },

    /// An integer did not fit the target type. `index` is the 0-based
    /// column or 1-based parameter position.
    #[error("value {value} at position {index} does not fit the target integer type")]
    OutOfRange { index: usize, value: i128 },

    #[error("Type conversion error: {0}")]
    Conversion(String),

    #[error("JSON conversion error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("post-connection hook failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("name contains an interior NUL byte: {0}")]
    Nul(#[from] NulError),

    #[error("engine configuration has already been applied")]
    AlreadyConfigured,

    #[error("post-connection hook is already set")]
    HookAlreadySet,
}

impl LiteError {
    /// The native result code, if this error came from the engine.
    pub fn code(&self) -> Option<c_int> {
        match self {
            LiteError::Engine { code } => Some(*code),
            _ => None,
        }
    }
}

fn describe(code: &c_int) -> &'static str {
    ffi::code_to_str(*code)
}

pub type Result<T> = std::result::Result<T, LiteError>;

/// Map a native result code to `Ok(())` or an engine error.
pub(crate) fn check(code: c_int) -> Result<()> {
    if code == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(LiteError::Engine { code })
    }
}
