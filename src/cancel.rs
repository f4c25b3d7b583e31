//! Cooperative cancellation shared between a supervisor and its worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cloneable flag that workers poll between blocking steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices, returning early (with `false`)
    /// if cancellation is requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }
}

/// Enforces "at most one active" for a kind of activity.
///
/// Acquiring returns a guard; the slot frees itself when the guard drops.
#[derive(Debug, Clone)]
pub struct ActivationSlot {
    name: &'static str,
    active: Arc<AtomicBool>,
}

impl ActivationSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Claim the slot, or `None` if another holder is active.
    pub fn try_acquire(&self) -> Option<ActivationGuard> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ActivationGuard {
                active: self.active.clone(),
            })
    }
}

/// Held while an activity runs.
#[derive(Debug)]
pub struct ActivationGuard {
    active: Arc<AtomicBool>,
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
