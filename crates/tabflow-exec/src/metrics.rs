//! Query counters.
//!
//! Plain atomics updated on the hot path; folded into `QueryStatistics`
//! when the query drains. Per-node counters are only logged.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct QueryMetrics {
    tables_emitted: AtomicU64,
    rows_emitted: AtomicU64,
}

impl QueryMetrics {
    /// A table was handed to a result stream.
    pub fn record_result(&self, rows: usize) {
        self.tables_emitted.fetch_add(1, Ordering::Relaxed);
        self.rows_emitted.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn tables_emitted(&self) -> u64 {
        self.tables_emitted.load(Ordering::Relaxed)
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted.load(Ordering::Relaxed)
    }
}

/// Per-node tallies, owned by the node's task.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeMetrics {
    pub tables_in: u64,
    pub rows_in: u64,
    pub finishes_in: u64,
    pub messages_out: u64,
    /// Tables dropped unread while the query was aborting.
    pub dropped: u64,
}

impl NodeMetrics {
    pub fn emit(&self, node: &str) {
        tracing::debug!(
            node,
            tables_in = self.tables_in,
            rows_in = self.rows_in,
            finishes_in = self.finishes_in,
            messages_out = self.messages_out,
            dropped = self.dropped,
            "node drained"
        );
    }
}
