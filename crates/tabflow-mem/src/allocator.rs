//! Per-query allocator: a byte counter with an optional hard limit.
//!
//! Every buffer the engine builds is charged here before it grows. Child
//! allocators keep their own counter (and optional limit) and roll every
//! charge up into all of their ancestors, so the query-level allocator always
//! sees the total.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::guard::Reservation;
use crate::tracking::PeakTracker;

/// Shared inner state for one allocator in the tree.
pub(crate) struct AllocatorInner {
    name: String,
    limit: Option<usize>,
    used: AtomicUsize,
    peak: PeakTracker,
    parent: Option<Arc<AllocatorInner>>,
}

impl AllocatorInner {
    fn new(name: String, limit: Option<usize>, parent: Option<Arc<AllocatorInner>>) -> Self {
        Self {
            name,
            limit,
            used: AtomicUsize::new(0),
            peak: PeakTracker::new(),
            parent,
        }
    }

    /// Charge `bytes` here and on every ancestor, or nowhere.
    pub(crate) fn try_acquire(&self, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        let next = loop {
            let cur = self.used.load(Ordering::Relaxed);
            let next = cur.checked_add(bytes).ok_or_else(|| Error::Overflow {
                allocator: self.name.clone(),
            })?;
            if let Some(limit) = self.limit {
                if next > limit {
                    return Err(Error::ResourceExhausted {
                        allocator: self.name.clone(),
                        requested: bytes,
                        limit,
                        used: cur,
                    });
                }
            }
            if self
                .used
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break next;
            }
        };

        if let Some(parent) = &self.parent {
            if let Err(e) = parent.try_acquire(bytes) {
                self.used.fetch_sub(bytes, Ordering::AcqRel);
                return Err(e);
            }
        }

        self.peak.record_used(next);
        Ok(())
    }

    /// Return `bytes` here and on every ancestor.
    ///
    /// Freeing more than is allocated means the accounting is corrupt; there
    /// is no way to continue with a trustworthy limit, so this panics.
    pub(crate) fn release(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let res = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |cur| {
                cur.checked_sub(bytes)
            });
        if let Err(cur) = res {
            panic!(
                "allocator '{}' accounting corrupted: freeing {} bytes with only {} allocated",
                self.name, bytes, cur
            );
        }
        if let Some(parent) = &self.parent {
            parent.release(bytes);
        }
    }

    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }
}

/// Cloneable handle to an allocator. Clones share the same counter.
#[derive(Clone)]
pub struct Allocator {
    inner: Arc<AllocatorInner>,
}

impl Allocator {
    /// Root allocator with an optional limit in bytes.
    pub fn new(limit: Option<usize>) -> Self {
        Self::named("query", limit)
    }

    pub fn named(name: impl Into<String>, limit: Option<usize>) -> Self {
        Self {
            inner: Arc::new(AllocatorInner::new(name.into(), limit, None)),
        }
    }

    pub fn with_limit(limit: usize) -> Self {
        Self::new(Some(limit))
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Child allocator without a limit of its own; it is still bounded by
    /// every ancestor.
    pub fn child(&self, name: impl Into<String>) -> Allocator {
        self.child_with_limit(name, None)
    }

    pub fn child_with_limit(&self, name: impl Into<String>, limit: Option<usize>) -> Allocator {
        Allocator {
            inner: Arc::new(AllocatorInner::new(
                name.into(),
                limit,
                Some(Arc::clone(&self.inner)),
            )),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Account `bytes` of new allocation. Fails with `ResourceExhausted`
    /// when any limit on the path to the root would be exceeded; callers
    /// treat that as fatal to the query.
    pub fn alloc(&self, bytes: usize) -> Result<()> {
        self.inner.try_acquire(bytes)
    }

    /// Return `bytes` previously charged with `alloc`.
    pub fn free(&self, bytes: usize) {
        self.inner.release(bytes);
    }

    /// Charge `bytes` and get an RAII handle that frees them on drop.
    pub fn reserve(&self, bytes: usize, tag: &'static str) -> Result<Reservation> {
        self.inner.try_acquire(bytes)?;
        Ok(Reservation::new(Arc::clone(&self.inner), bytes, tag))
    }

    /// Bytes currently charged to this allocator (including its children).
    pub fn used(&self) -> usize {
        self.inner.used()
    }

    pub fn limit(&self) -> Option<usize> {
        self.inner.limit
    }

    /// High-water mark of `used()`.
    pub fn peak(&self) -> usize {
        self.inner.peak.peak()
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("name", &self.inner.name)
            .field("limit", &self.inner.limit)
            .field("used", &self.used())
            .finish()
    }
}
