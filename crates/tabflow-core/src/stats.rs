//! Per-query execution statistics.
//!
//! Filled in by the exec crate when a query drains; the plan hash lets two
//! runs of the same plan be matched up in logs.

use serde::{Deserialize, Serialize};

use crate::hash::PlanHash;
use crate::id::QueryId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStatistics {
    pub query_id: QueryId,

    /// Stable hash of the physical plan that was executed.
    pub plan_hash: PlanHash,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,

    /// High-water mark of the query allocator.
    pub peak_memory_bytes: usize,

    /// Tables and rows handed to result streams.
    pub tables_emitted: u64,
    pub rows_emitted: u64,
}

impl QueryStatistics {
    pub fn new(query_id: QueryId, plan_hash: PlanHash, started_ms: u64) -> Self {
        Self {
            query_id,
            plan_hash,
            engine_version: crate::VERSION.to_string(),
            started_ms,
            finished_ms: started_ms,
            peak_memory_bytes: 0,
            tables_emitted: 0,
            rows_emitted: 0,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }
}
