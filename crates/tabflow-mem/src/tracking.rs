//! High-water mark tracking for allocators.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PeakTracker {
    peak_bytes: AtomicUsize,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new "used bytes" value; the peak only moves up.
    pub fn record_used(&self, used_bytes: usize) {
        let prev = self.peak_bytes.fetch_max(used_bytes, Ordering::AcqRel);
        #[cfg(feature = "tracing")]
        if used_bytes > prev {
            tracing::trace!(peak = used_bytes, "new allocator peak");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = prev;
    }

    pub fn peak(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }
}
