//! Round-robin target selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use tierform_health::Target;

/// Picks the next target from whatever set is healthy at request time.
/// Lock-free; the healthy set may change between calls.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when there is nothing to pick from.
    pub fn pick<'a>(&self, targets: &'a [Target]) -> Option<&'a Target> {
        if targets.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % targets.len();
        targets.get(idx)
    }

    /// Selections made so far.
    pub fn selections(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}
