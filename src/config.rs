//! One-time, process-wide engine configuration.
//!
//! SQLite only accepts `sqlite3_config` before it is initialized, so the
//! configuration is applied under a global lock right before the first
//! connection of the process is opened, and never again.

use std::os::raw::c_int;

use parking_lot::Mutex;
use rusqlite::ffi;

use crate::error::{LiteError, Result};

/// Callback receiving messages from the engine's error log.
pub type LogCallback = fn(c_int, &str);

/// Threading mode requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadingMode {
    SingleThread,
    /// Each connection is used by one thread at a time. This matches the
    /// thread-local connection model and is the default.
    #[default]
    MultiThread,
    Serialized,
}

impl ThreadingMode {
    fn config_option(self) -> c_int {
        match self {
            ThreadingMode::SingleThread => ffi::SQLITE_CONFIG_SINGLETHREAD,
            ThreadingMode::MultiThread => ffi::SQLITE_CONFIG_MULTITHREAD,
            ThreadingMode::Serialized => ffi::SQLITE_CONFIG_SERIALIZED,
        }
    }
}

/// Engine configuration.
#[derive(Clone, Copy)]
pub struct EngineConfig {
    /// Threading mode passed to `sqlite3_config`
    pub threading: ThreadingMode,
    /// Sink for the engine error log (`None` disables it)
    pub error_log: Option<LogCallback>,
}

impl EngineConfig {
    pub const fn new() -> Self {
        Self {
            threading: ThreadingMode::MultiThread,
            error_log: Some(log_to_tracing),
        }
    }

    pub fn threading(mut self, mode: ThreadingMode) -> Self {
        self.threading = mode;
        self
    }

    pub fn error_log(mut self, callback: Option<LogCallback>) -> Self {
        self.error_log = callback;
        self
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("threading", &self.threading)
            .field("error_log", &self.error_log.is_some())
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct GuardState {
    config: EngineConfig,
    applied: bool,
}

static GUARD: Mutex<GuardState> = Mutex::new(GuardState {
    config: EngineConfig::new(),
    applied: false,
});

/// Default error log sink.
fn log_to_tracing(code: c_int, message: &str) {
    tracing::warn!(target: "litekit::engine", code, "{message}");
}

/// Replace the configuration applied before the first connection.
///
/// Fails with [`LiteError::AlreadyConfigured`] once any connection has been
/// opened in this process.
pub fn configure(config: EngineConfig) -> Result<()> {
    let mut guard = GUARD.lock();
    if guard.applied {
        return Err(LiteError::AlreadyConfigured);
    }
    guard.config = config;
    Ok(())
}

/// Whether the engine configuration has been applied.
pub fn is_configured() -> bool {
    GUARD.lock().applied
}

/// Apply the engine configuration if no thread has done so yet.
///
/// The engine calls are best-effort: SQLite refuses them once it has been
/// initialized by someone else, which is logged and otherwise ignored.
pub(crate) fn ensure_configured() {
    let mut guard = GUARD.lock();
    if guard.applied {
        return;
    }

    let config = guard.config;
    let rc = unsafe { ffi::sqlite3_config(config.threading.config_option()) };
    if rc != ffi::SQLITE_OK {
        tracing::debug!(target: "litekit", code = rc, mode = ?config.threading, "threading mode not applied");
    }

    if let Err(e) = unsafe { rusqlite::trace::config_log(config.error_log) } {
        tracing::debug!(target: "litekit", error = %e, "error log sink not installed");
    }

    guard.applied = true;
    tracing::debug!(target: "litekit", mode = ?config.threading, "engine configured");
}
