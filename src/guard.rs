use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-flight guard for aggregation runs.
///
/// Guarantees that at most one run is in flight at any time.
/// A second trigger arriving while a run is active is rejected
/// immediately (HTTP 409), never queued.
///
/// DESIGN:
/// - Admission is a single compare-and-set on an atomic flag, so
///   concurrent callers can never both be granted.
/// - Release is tied to dropping the permit, so it happens on every
///   exit path of a run, including panics unwinding the run task.
#[derive(Debug, Default)]
pub struct RunGuard {
    active: AtomicBool,
}

impl RunGuard {
    pub fn new() -> Self {
        Self { active: AtomicBool::new(false) }
    }

    /// Attempts to admit a new run. Non-blocking.
    ///
    /// Returns a permit if no run is active, `None` otherwise.
    /// The flag clears when the permit is dropped.
    pub fn try_acquire(self: &Arc<Self>) -> Option<RunPermit> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit { guard: Arc::clone(self) })
    }

    /// Whether a run currently holds the permit.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Proof of admission for one run. Dropping it releases the guard.
#[derive(Debug)]
pub struct RunPermit {
    guard: Arc<RunGuard>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}
