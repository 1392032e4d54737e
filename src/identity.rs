//! Lazily resolved, memoized names.
//!
//! Database paths and query texts are declared in `static`s either as string
//! literals or as producer functions. The producer runs at most once per
//! process; the resolved text is kept NUL-terminated so it can be handed to
//! the engine without copying.

use std::ffi::{CStr, CString};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::OnceCell;

use crate::error::Result;

enum Source {
    Literal(&'static str),
    Producer(fn() -> String),
}

/// A name that is resolved once, on first use.
pub(crate) struct Identity {
    source: Source,
    resolved: OnceCell<CString>,
}

impl Identity {
    pub(crate) const fn literal(text: &'static str) -> Self {
        Self {
            source: Source::Literal(text),
            resolved: OnceCell::new(),
        }
    }

    pub(crate) const fn producer(f: fn() -> String) -> Self {
        Self {
            source: Source::Producer(f),
            resolved: OnceCell::new(),
        }
    }

    /// Resolve the name, invoking the producer on the first call only.
    pub(crate) fn resolve(&self) -> Result<&CStr> {
        let text = self.resolved.get_or_try_init(|| {
            let text = match &self.source {
                Source::Literal(text) => (*text).to_owned(),
                Source::Producer(f) => f(),
            };
            CString::new(text)
        })?;
        Ok(text.as_c_str())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source, self.resolved.get()) {
            (_, Some(text)) => write!(f, "{:?}", text),
            (Source::Literal(text), None) => write!(f, "{:?}", text),
            (Source::Producer(_), None) => f.write_str("<unresolved>"),
        }
    }
}

/// Dense per-kind slot numbers, used to index thread-local storage.
pub(crate) struct Slot {
    index: OnceCell<usize>,
}

impl Slot {
    pub(crate) const fn new() -> Self {
        Self {
            index: OnceCell::new(),
        }
    }

    pub(crate) fn get(&self, counter: &AtomicUsize) -> usize {
        *self
            .index
            .get_or_init(|| counter.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn produce() -> String {
        CALLS.fetch_add(1, Ordering::SeqCst);
        "produced.db".to_string()
    }

    #[test]
    fn test_literal_resolves_with_terminator() {
        let id = Identity::literal("select 1");
        let text = id.resolve().unwrap();
        assert_eq!(text.to_bytes(), b"select 1");
        assert_eq!(text.to_bytes_with_nul().len(), "select 1".len() + 1);
    }

    #[test]
    fn test_producer_runs_once() {
        static ID: Identity = Identity::producer(produce);
        assert_eq!(ID.resolve().unwrap().to_bytes(), b"produced.db");
        assert_eq!(ID.resolve().unwrap().to_bytes(), b"produced.db");
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        let id = Identity::literal("select\0 1");
        assert!(id.resolve().is_err());
    }

    #[test]
    fn test_slots_are_stable_and_distinct() {
        let counter = AtomicUsize::new(0);
        let a = Slot::new();
        let b = Slot::new();
        let first = a.get(&counter);
        assert_eq!(a.get(&counter), first);
        assert_ne!(b.get(&counter), first);
    }
}
