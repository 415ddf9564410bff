//! RAII reservation against an allocator.
//!
//! Buffers hold one of these for their lifetime. Dropping it returns the
//! bytes to the allocator (and its ancestors), also on unwind.

use std::sync::Arc;

use crate::allocator::AllocatorInner;
use crate::error::Result;

/// Accounts for a number of bytes; dropping it returns them.
pub struct Reservation {
    inner: Arc<AllocatorInner>,
    bytes: usize,
    tag: &'static str,
}

impl Reservation {
    pub(crate) fn new(inner: Arc<AllocatorInner>, bytes: usize, tag: &'static str) -> Self {
        Self { inner, bytes, tag }
    }

    /// Number of bytes currently accounted for by this reservation.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Debug tag for tracing.
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Resize to `new_bytes`. Shrinking always succeeds; growing charges the
    /// difference and fails with `ResourceExhausted` (leaving the reservation
    /// unchanged) when a limit would be exceeded.
    pub fn try_resize(&mut self, new_bytes: usize) -> Result<()> {
        if new_bytes == self.bytes {
            return Ok(());
        }

        if new_bytes < self.bytes {
            let delta = self.bytes - new_bytes;
            self.inner.release(delta);
            self.bytes = new_bytes;
        } else {
            let delta = new_bytes - self.bytes;
            self.inner.try_acquire(delta)?;
            self.bytes = new_bytes;
        }
        Ok(())
    }

    /// Grow by `delta` bytes.
    pub fn grow(&mut self, delta: usize) -> Result<()> {
        self.try_resize(self.bytes.saturating_add(delta))
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            // NOTE: do not log here to keep drop path fast.
            self.bytes = 0;
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("bytes", &self.bytes)
            .field("tag", &self.tag)
            .finish()
    }
}
