//! Explicit replacement for the source's global verbosity/counter register
//! and cancellation flag (`spec.md` §5, §9 design note "Global verbosity +
//! counters").
//!
//! A [`Context`] is threaded into [`crate::factory::create`],
//! [`crate::encoding::Encoding::evaluate`], and the table-façade `select`
//! boundary. It default-constructs to a quiet, non-cancelled context when
//! the caller has none to pass.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{IbisError, Result};

/// Shared, cheaply-cloneable query context.
///
/// Cloning a `Context` shares the same cancellation flag and counters, so
/// cancelling one handle cancels every clone — this is what lets a calling
/// thread request cancellation of a query that a worker thread is
/// currently evaluating.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    verbosity: AtomicU64,
    cancelled: AtomicBool,
    bitvectors_materialized: AtomicU64,
    bitvectors_combined: AtomicU64,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbosity(verbosity: u64) -> Self {
        let ctx = Self::new();
        ctx.inner.verbosity.store(verbosity, Ordering::Relaxed);
        ctx
    }

    pub fn verbosity(&self) -> u64 {
        self.inner.verbosity.load(Ordering::Relaxed)
    }

    pub fn set_verbosity(&self, v: u64) {
        self.inner.verbosity.store(v, Ordering::Relaxed);
    }

    /// Requests cancellation of any in-flight evaluation sharing this
    /// context. Timeouts are implemented by a caller-owned timer calling
    /// this from another thread.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Checked between any two bitvector combinations and at the start of
    /// each residual-scan loop, per `spec.md` §5 Cancellation.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(IbisError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn note_materialized(&self, n: u64) {
        self.inner
            .bitvectors_materialized
            .fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn note_combined(&self, n: u64) {
        self.inner.bitvectors_combined.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bitvectors_materialized(&self) -> u64 {
        self.inner.bitvectors_materialized.load(Ordering::Relaxed)
    }

    pub fn bitvectors_combined(&self) -> u64 {
        self.inner.bitvectors_combined.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_across_clones() {
        let ctx = Context::new();
        let clone = ctx.clone();
        assert!(ctx.check_cancelled().is_ok());
        clone.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(IbisError::Cancelled)));
    }

    #[test]
    fn counters_accumulate() {
        let ctx = Context::new();
        ctx.note_materialized(3);
        ctx.note_materialized(2);
        assert_eq!(ctx.bitvectors_materialized(), 5);
    }
}
