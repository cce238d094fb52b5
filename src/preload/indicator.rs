//! Loading indicator bookkeeping.
//!
//! Every component that starts a load calls [`LoadingTracker::show`] and
//! later [`LoadingTracker::hide`]. The visual indicator is active while the
//! count is above zero. When a readiness signal races ahead of that
//! bookkeeping, [`LoadingTracker::force_hide`] clears everything.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::state::{StateStore, StateUpdate};

/// Visual loading indicator (spinner, overlay, ...).
pub trait LoadingIndicator: Send + Sync {
    fn set_active(&self, active: bool);
}

/// Indicator for headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndicator;

impl LoadingIndicator for NoIndicator {
    fn set_active(&self, _active: bool) {}
}

struct TrackerInner {
    count: Mutex<usize>,
    indicator: Arc<dyn LoadingIndicator>,
    store: StateStore,
}

/// Reference-counted loading indicator. Clones share the count.
#[derive(Clone)]
pub struct LoadingTracker {
    inner: Arc<TrackerInner>,
}

impl std::fmt::Debug for LoadingTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingTracker")
            .field("count", &*self.inner.count.lock())
            .finish()
    }
}

impl LoadingTracker {
    pub fn new(store: StateStore, indicator: Arc<dyn LoadingIndicator>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                count: Mutex::new(0),
                indicator,
                store,
            }),
        }
    }

    /// Increment the count and activate the indicator.
    pub fn show(&self) {
        *self.inner.count.lock() += 1;
        self.inner.indicator.set_active(true);
        self.inner
            .store
            .update(StateUpdate::new().is_preloading(true));
    }

    /// Decrement the count (never below zero); deactivate at zero.
    pub fn hide(&self) {
        let remaining = {
            let mut count = self.inner.count.lock();
            *count = count.saturating_sub(1);
            *count
        };
        if remaining == 0 {
            self.inner.indicator.set_active(false);
            self.inner
                .store
                .update(StateUpdate::new().is_preloading(false));
        }
    }

    /// Zero the count and deactivate the indicator unconditionally.
    pub fn force_hide(&self) {
        *self.inner.count.lock() = 0;
        self.inner.indicator.set_active(false);
        self.inner
            .store
            .update(StateUpdate::new().is_preloading(false));
        tracing::debug!("Force-hidden loading indicator");
    }

    pub fn active_count(&self) -> usize {
        *self.inner.count.lock()
    }
}
