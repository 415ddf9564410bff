//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-query memory limit (bytes). `None` means unlimited accounting.
    pub mem_limit_bytes: Option<usize>,

    /// Worker threads driving one query. Bounded pool; nodes share it.
    pub max_parallel_tasks: usize,

    /// Capacity (messages) of each node's inbox; a full inbox blocks the
    /// producer, which is the only backpressure point.
    pub queue_capacity: usize,

    /// Default rows per table produced by sources.
    pub batch_rows: usize,

    /// How long query teardown may wait for workers after cancellation.
    pub cancel_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mem_limit_bytes: Some(512 * 1024 * 1024), // 512 MiB default
            max_parallel_tasks: 4,
            queue_capacity: 16,
            batch_rows: 1024,
            cancel_grace_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TABFLOW_MEM_LIMIT_BYTES`: memory limit in bytes (`0` = unlimited)
    /// - `TABFLOW_MAX_PARALLEL_TASKS`: worker threads per query
    /// - `TABFLOW_QUEUE_CAPACITY`: per-node inbox capacity
    /// - `TABFLOW_BATCH_ROWS`: rows per source table
    /// - `TABFLOW_CANCEL_GRACE_MS`: teardown grace period
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("TABFLOW_MEM_LIMIT_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.mem_limit_bytes = if v == 0 { None } else { Some(v) };
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_MAX_PARALLEL_TASKS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_parallel_tasks = v;
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_QUEUE_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.queue_capacity = v;
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_BATCH_ROWS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.batch_rows = v;
            }
        }

        if let Ok(s) = std::env::var("TABFLOW_CANCEL_GRACE_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.cancel_grace_ms = v;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_tasks == 0 {
            return Err(Error::Config("max_parallel_tasks must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.batch_rows == 0 {
            return Err(Error::Config("batch_rows must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_mem_limit(mut self, bytes: usize) -> Self {
        self.mem_limit_bytes = Some(bytes);
        self
    }

    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.max_parallel_tasks = workers;
        self
    }

    pub fn with_queue_capacity(mut self, cap: usize) -> Self {
        self.queue_capacity = cap;
        self
    }
}
