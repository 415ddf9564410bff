//! Handles returned to the caller of a running query.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tabflow_core::error::CancelReason;
use tabflow_core::id::QueryId;
use tabflow_core::stats::QueryStatistics;
use tabflow_mem::Allocator;
use tabflow_table::Table;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dispatcher::Shared;
use crate::error::{ExecError, Result};

/// One-shot outcome slot filled by the supervisor when every task exits.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    outcome: Mutex<Option<Result<QueryStatistics>>>,
    ready: Condvar,
}

impl Completion {
    pub(crate) fn complete(&self, outcome: Result<QueryStatistics>) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    fn is_done(&self) -> bool {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn wait(&self) -> Result<QueryStatistics> {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            slot = self.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns false if `timeout` elapsed first.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        let (slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |s| s.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.is_some()
    }
}

/// Ordered stream of tables delivered to one named result.
///
/// Ends when the producing node exhausts, or early once the query has
/// failed: tables still queued at that point are released, not returned.
///
/// The stream holds at most `queue_capacity` tables; past that the producing
/// node waits for the caller. Results fed by one multicast producer must
/// therefore be read concurrently (or dropped), not one after another.
/// The blocking `Iterator` impl must not be driven from inside an async
/// runtime; use [`Tables::next_table`] there.
#[derive(Debug)]
pub struct Tables {
    name: String,
    rx: mpsc::Receiver<Table>,
    shared: Arc<Shared>,
    stopped: bool,
}

impl Tables {
    pub(crate) fn new(name: String, rx: mpsc::Receiver<Table>, shared: Arc<Shared>) -> Self {
        Self {
            name,
            rx,
            shared,
            stopped: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn next_table(&mut self) -> Option<Table> {
        if self.stopped {
            return None;
        }
        let item = self.rx.recv().await;
        self.accept(item)
    }

    fn accept(&mut self, item: Option<Table>) -> Option<Table> {
        if self.shared.is_aborted() {
            self.stop();
            return None;
        }
        if item.is_none() {
            self.stopped = true;
        }
        item
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.rx.close();
        let mut dropped = 0usize;
        while let Ok(table) = self.rx.try_recv() {
            drop(table);
            dropped += 1;
        }
        debug!(result = %self.name, dropped, "result stream stopped; query failed");
    }
}

impl Iterator for Tables {
    type Item = Table;

    fn next(&mut self) -> Option<Table> {
        if self.stopped {
            return None;
        }
        let item = self.rx.blocking_recv();
        self.accept(item)
    }
}

/// A named result of a query.
#[derive(Debug)]
pub struct QueryResult {
    name: String,
    tables: Tables,
}

impl QueryResult {
    pub(crate) fn new(name: String, tables: Tables) -> Self {
        Self { name, tables }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(self) -> Tables {
        self.tables
    }
}

/// A running query.
///
/// Dropping the handle cancels the query if it has not completed and waits
/// up to the configured grace period for its workers to drain.
pub struct Query {
    id: QueryId,
    shared: Arc<Shared>,
    completion: Arc<Completion>,
    results: Vec<QueryResult>,
    allocator: Allocator,
    runtime: Option<Runtime>,
    grace: Duration,
}

impl Query {
    pub(crate) fn new(
        id: QueryId,
        shared: Arc<Shared>,
        completion: Arc<Completion>,
        results: Vec<QueryResult>,
        allocator: Allocator,
        runtime: Runtime,
        grace: Duration,
    ) -> Self {
        Self {
            id,
            shared,
            completion,
            results,
            allocator,
            runtime: Some(runtime),
            grace,
        }
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Named results in plan order. Each result is handed out once; later
    /// calls return an empty list.
    pub fn take_results(&mut self) -> Vec<QueryResult> {
        std::mem::take(&mut self.results)
    }

    /// Request cancellation. No effect once the query has completed.
    pub fn cancel(&self) {
        self.shared.abort(ExecError::Canceled(CancelReason::Canceled));
    }

    /// The terminal error, if the query has failed so far.
    pub fn err(&self) -> Option<ExecError> {
        self.shared.error()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Block until every worker has exited. Results that are neither read
    /// nor dropped hold the query back once their queues fill.
    pub fn wait(&self) -> Result<QueryStatistics> {
        self.completion.wait()
    }

    /// The query's root allocator; its usage returns to zero once all
    /// tables have been released.
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("done", &self.is_done())
            .field("pending_results", &self.results.len())
            .finish()
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.results.clear();
        if !self.completion.is_done() {
            self.cancel();
            if !self.completion.wait_timeout(self.grace) {
                warn!(query = %self.id, grace_ms = self.grace.as_millis() as u64, "workers still draining after grace period");
            }
        }
        if let Some(rt) = self.runtime.take() {
            rt.shutdown_background();
        }
    }
}
