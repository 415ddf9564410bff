//! Dispatcher: runs a graph on a per-query worker pool.
//!
//! Each operator node is one tokio task that owns its operator and a bounded
//! inbox shared by all of its input edges, so at most one call into an
//! operator is in flight and a full inbox blocks the producer. Result sinks
//! are bounded the same way: a node feeding a result waits for the caller to
//! read, so results of one multicast producer must be drained concurrently.
//!
//! Failure handling is first-error-wins: the first fatal error is recorded
//! and the query token canceled. From then on nodes drop tables unread but
//! still finish every key they have seen, carrying the terminal error, keep
//! draining their inbox until every input is exhausted, finish the output
//! keys they left open, and exit.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tabflow_core::config::EngineConfig;
use tabflow_core::error::CancelReason;
use tabflow_core::group_key::GroupKey;
use tabflow_core::id::{NodeId, QueryId};
use tabflow_core::stats::QueryStatistics;
use tabflow_mem::Allocator;
use tabflow_operators::{
    Emitter, Message, OpError, Operator, Port, Source, SourceContext, SourceEvent,
    Transformation,
};
use tabflow_table::Table;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::context::{CancelToken, QueryContext};
use crate::error::{ExecError, Result};
use crate::graph::{Graph, GraphNode, NodeRole};
use crate::metrics::{NodeMetrics, QueryMetrics};
use crate::protocol::{KeyState, KeyTracker};
use crate::query::{Completion, Query, QueryResult, Tables};

pub(crate) enum Payload {
    Message(Message),
    /// The producer on this port is done.
    Eof,
}

pub(crate) struct Envelope {
    port: Port,
    payload: Payload,
}

#[derive(Debug, Default)]
struct Terminal {
    error: Option<ExecError>,
    done: bool,
}

/// State shared by every task of one query.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    terminal: Mutex<Terminal>,
    aborted: CancelToken,
    pub(crate) metrics: QueryMetrics,
}

impl Shared {
    fn terminal(&self) -> std::sync::MutexGuard<'_, Terminal> {
        self.terminal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `err` as the terminal error unless one is already set, then
    /// cancel the query. Ignored once the query has completed.
    pub(crate) fn abort(&self, err: ExecError) {
        let mut t = self.terminal();
        if t.done {
            debug!(error = %err, "query already complete; abort ignored");
            return;
        }
        if let Some(first) = t.error.as_ref() {
            debug!(error = %err, first = %first, "discarding error; query already aborting");
            return;
        }
        if err.is_internal() {
            error!(error = %err, "query aborting on internal fault");
        } else {
            debug!(error = %err, "query aborting");
        }
        t.error = Some(err);
        drop(t);
        self.aborted.cancel();
    }

    pub(crate) fn error(&self) -> Option<ExecError> {
        self.terminal().error.clone()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.is_canceled()
    }

    fn op_error(&self) -> Option<OpError> {
        self.error().map(|e| e.to_op_error())
    }

    /// Seal the outcome. Aborts after this point are ignored, so the error
    /// returned here is the one `error()` reports from now on.
    fn mark_done(&self) -> Option<ExecError> {
        let mut t = self.terminal();
        t.done = true;
        t.error.clone()
    }
}

enum Target {
    Node {
        node: NodeId,
        port: Port,
        tx: mpsc::Sender<Envelope>,
    },
    Result {
        name: String,
        tx: mpsc::Sender<Table>,
    },
}

impl Target {
    async fn send_table(&self, table: Table, shared: &Shared) {
        match self {
            Target::Node { node, port, tx } => {
                let env = Envelope {
                    port: *port,
                    payload: Payload::Message(Message::Process(table)),
                };
                if tx.send(env).await.is_err() {
                    debug!(consumer = %node, "consumer gone; table dropped");
                }
            }
            Target::Result { name, tx } => {
                let rows = table.num_rows();
                // A failed query stops its result streams, so a caller that
                // is not reading must not keep the producer parked.
                tokio::select! {
                    sent = tx.send(table) => match sent {
                        Ok(()) => shared.metrics.record_result(rows),
                        Err(_) => trace!(result = %name, "result stream dropped; table discarded"),
                    },
                    _ = shared.aborted.canceled() => {
                        trace!(result = %name, "query aborted; table discarded");
                    }
                }
            }
        }
    }

    async fn send_finish(&self, key: &GroupKey, err: &Option<OpError>) {
        // Result streams only carry tables.
        if let Target::Node { node, port, tx } = self {
            let env = Envelope {
                port: *port,
                payload: Payload::Message(Message::Finish {
                    key: key.clone(),
                    err: err.clone(),
                }),
            };
            if tx.send(env).await.is_err() {
                debug!(consumer = %node, "consumer gone; finish dropped");
            }
        }
    }

    async fn send_eof(&self) {
        if let Target::Node { port, tx, .. } = self {
            let _ = tx
                .send(Envelope {
                    port: *port,
                    payload: Payload::Eof,
                })
                .await;
        }
    }
}

/// A node's multicast set plus the protocol check on what it emits.
struct Outputs {
    node: NodeId,
    targets: Vec<Target>,
    keys: KeyTracker,
    shared: Arc<Shared>,
    sent: u64,
}

impl Outputs {
    fn new(node: NodeId, targets: Vec<Target>, shared: Arc<Shared>) -> Self {
        Self {
            node,
            targets,
            keys: KeyTracker::default(),
            shared,
            sent: 0,
        }
    }

    async fn deliver(&mut self, msg: Message) -> Result<()> {
        let checked = match &msg {
            Message::Process(t) => self.keys.on_process(t.key()),
            Message::Finish { key, .. } => self
                .keys
                .begin_finish(key)
                .map(|()| self.keys.end_finish(key)),
        };
        checked.map_err(|message| ExecError::Internal {
            node: self.node,
            message: format!("operator output: {message}"),
        })?;
        self.sent += 1;

        match msg {
            Message::Process(table) => {
                trace!(node = %self.node, key = %table.key(), rows = table.num_rows(), "emit table");
                let Some((last, rest)) = self.targets.split_last() else {
                    return Ok(());
                };
                for target in rest {
                    let fork = table.fork().map_err(|e| ExecError::Internal {
                        node: self.node,
                        message: format!("multicast: {e}"),
                    })?;
                    target.send_table(fork, &self.shared).await;
                }
                last.send_table(table, &self.shared).await;
            }
            Message::Finish { key, err } => {
                trace!(node = %self.node, key = %key, failed = err.is_some(), "emit finish");
                for target in &self.targets {
                    target.send_finish(&key, &err).await;
                }
            }
        }
        Ok(())
    }

    /// Finish every output key still open (with the terminal error, if any)
    /// and signal end of stream to every consumer.
    async fn close(&mut self) {
        let err = self.shared.op_error();
        for key in self.keys.open_keys() {
            let msg = Message::Finish {
                key,
                err: err.clone(),
            };
            if let Err(e) = self.deliver(msg).await {
                self.shared.abort(e);
            }
        }
        for target in &self.targets {
            target.send_eof().await;
        }
        self.targets.clear();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one operator call, turning errors and panics into `ExecError`.
fn guarded<T>(
    node: NodeId,
    name: &'static str,
    what: &'static str,
    f: impl FnOnce() -> std::result::Result<T, OpError>,
) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res.map_err(|e| ExecError::from_op(node, e)),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(%node, operator = name, during = what, "operator panicked: {msg}");
            Err(ExecError::Internal {
                node,
                message: format!("{name} panicked in {what}: {msg}"),
            })
        }
    }
}

struct NodeTask {
    id: NodeId,
    name: &'static str,
    op: Box<dyn Transformation>,
    inbox: mpsc::Receiver<Envelope>,
    num_inputs: usize,
    emitter: Emitter,
    outputs: Outputs,
    shared: Arc<Shared>,
    metrics: NodeMetrics,
}

impl NodeTask {
    async fn run(mut self) {
        debug!(node = %self.id, operator = self.name, inputs = self.num_inputs, "node started");
        let mut inputs: Vec<KeyTracker> = (0..self.num_inputs).map(|_| KeyTracker::default()).collect();
        let mut exhausted = vec![false; self.num_inputs];
        let mut remaining = self.num_inputs;

        while remaining > 0 {
            let Some(env) = self.inbox.recv().await else {
                debug!(node = %self.id, "all producers gone");
                break;
            };
            let port = env.port;
            if port >= self.num_inputs || exhausted[port] {
                self.fault(format!("message on closed or unknown port {port}"));
                continue;
            }
            match env.payload {
                Payload::Eof => {
                    exhausted[port] = true;
                    remaining -= 1;
                    let left = inputs[port].open_keys();
                    if !left.is_empty() {
                        debug!(node = %self.id, port, keys = left.len(), "input exhausted with open keys");
                        let err = self.shared.op_error();
                        for key in left {
                            self.finish_input(&mut inputs[port], port, key, err.clone())
                                .await;
                        }
                    }
                }
                Payload::Message(Message::Process(mut table)) => {
                    self.metrics.tables_in += 1;
                    self.metrics.rows_in += table.num_rows() as u64;
                    if self.shared.is_aborted() {
                        self.metrics.dropped += 1;
                        table.release();
                        continue;
                    }
                    if let Err(m) = inputs[port].on_process(table.key()) {
                        self.fault(m);
                        continue;
                    }
                    let res = self.call("process", |op, out| op.process(port, table, out));
                    self.after_call(res).await;
                }
                Payload::Message(Message::Finish { key, err }) => {
                    self.metrics.finishes_in += 1;
                    if self.shared.is_aborted() {
                        // Only keys this node has seen tables for are owed a finish.
                        if inputs[port].state(&key) != Some(KeyState::Open) {
                            continue;
                        }
                        let err = err.or_else(|| self.shared.op_error());
                        self.finish_input(&mut inputs[port], port, key, err).await;
                        continue;
                    }
                    self.finish_input(&mut inputs[port], port, key, err).await;
                }
            }
        }

        if !self.shared.is_aborted() {
            let res = self.call("close", |op, out| op.close(out));
            self.after_call(res).await;
        }
        self.outputs.close().await;
        self.metrics.messages_out = self.outputs.sent;
        self.metrics.emit(self.name);
    }

    async fn finish_input(
        &mut self,
        tracker: &mut KeyTracker,
        port: Port,
        key: GroupKey,
        err: Option<OpError>,
    ) {
        if let Err(m) = tracker.begin_finish(&key) {
            self.fault(m);
            return;
        }
        let res = self.call("finish", |op, out| op.finish(port, &key, err.as_ref(), out));
        tracker.end_finish(&key);
        self.after_call(res).await;
    }

    fn call(
        &mut self,
        what: &'static str,
        f: impl FnOnce(&mut dyn Transformation, &mut Emitter) -> std::result::Result<(), OpError>,
    ) -> Result<()> {
        let op = self.op.as_mut();
        let out = &mut self.emitter;
        guarded(self.id, self.name, what, || f(op, out))
    }

    async fn after_call(&mut self, res: Result<()>) {
        let msgs: Vec<Message> = self.emitter.drain().collect();
        if let Err(e) = res {
            self.shared.abort(e);
        }
        for msg in msgs {
            // While aborting, tables are dropped but finishes still flow so
            // downstream state is released.
            if self.shared.is_aborted() && matches!(msg, Message::Process(_)) {
                continue;
            }
            if let Err(e) = self.outputs.deliver(msg).await {
                self.shared.abort(e);
            }
        }
    }

    fn fault(&self, message: String) {
        error!(node = %self.id, operator = self.name, "protocol violation: {message}");
        self.shared.abort(ExecError::Internal {
            node: self.id,
            message,
        });
    }
}

struct SourceTask {
    id: NodeId,
    name: &'static str,
    source: Box<dyn Source>,
    ctx: SourceContext,
    outputs: Outputs,
    shared: Arc<Shared>,
}

impl SourceTask {
    async fn run(self) {
        let SourceTask {
            id,
            name,
            mut source,
            mut ctx,
            mut outputs,
            shared,
        } = self;
        debug!(node = %id, operator = name, "source started");

        loop {
            // Cancellation is polled between events.
            if shared.is_aborted() {
                debug!(node = %id, "source stopping; query aborted");
                break;
            }
            let event = guarded(id, name, "next", || source.next(&mut ctx));
            let msg = match event {
                Ok(Some(SourceEvent::Table(t))) => Message::Process(t),
                Ok(Some(SourceEvent::Finish(key))) => Message::Finish { key, err: None },
                Ok(None) => {
                    debug!(node = %id, "source exhausted");
                    break;
                }
                Err(e) => {
                    shared.abort(e);
                    break;
                }
            };
            if let Err(e) = outputs.deliver(msg).await {
                shared.abort(e);
                break;
            }
            tokio::task::yield_now().await;
        }

        drop(source);
        outputs.close().await;
        trace!(node = %id, sent = outputs.sent, "source done");
    }
}

async fn watch(shared: Arc<Shared>, caller: CancelToken, timeout: Option<Duration>) {
    let deadline = async move {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = shared.aborted.canceled() => {}
        _ = caller.canceled() => {
            let reason = caller.reason().unwrap_or(CancelReason::Canceled);
            shared.abort(ExecError::Canceled(reason));
        }
        _ = deadline => {
            shared.abort(ExecError::Canceled(CancelReason::DeadlineExceeded));
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Spawn every node of `graph` and return the running query.
pub(crate) fn launch(
    cfg: &EngineConfig,
    ctx: QueryContext,
    graph: Graph,
    alloc: Allocator,
) -> Result<Query> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.max_parallel_tasks.max(1))
        .thread_name("tabflow-worker")
        .enable_time()
        .build()
        .map_err(|e| ExecError::Internal {
            node: NodeId::new(0),
            message: format!("cannot start worker pool: {e}"),
        })?;

    let query_id = QueryId::new();
    let shared = Arc::new(Shared::default());
    let started_ms = now_ms();
    let Graph {
        nodes,
        edges,
        plan_hash,
    } = graph;
    let n = nodes.len();

    let mut inbox_tx: Vec<Option<mpsc::Sender<Envelope>>> = vec![None; n];
    let mut inbox_rx: Vec<Option<mpsc::Receiver<Envelope>>> = (0..n).map(|_| None).collect();
    let mut result_tx: Vec<Option<mpsc::Sender<Table>>> = vec![None; n];
    let mut results = Vec::new();
    for (i, node) in nodes.iter().enumerate() {
        match &node.role {
            NodeRole::Transform => {
                let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
                inbox_tx[i] = Some(tx);
                inbox_rx[i] = Some(rx);
            }
            NodeRole::Yield(name) => {
                let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
                result_tx[i] = Some(tx);
                results.push(QueryResult::new(
                    name.clone(),
                    Tables::new(name.clone(), rx, Arc::clone(&shared)),
                ));
            }
            NodeRole::Source => {}
        }
    }

    let mut targets: Vec<Vec<Target>> = Vec::with_capacity(n);
    for node in &nodes {
        let mut ts = Vec::with_capacity(node.outputs.len());
        for &e in &node.outputs {
            let edge = edges[e];
            let consumer = &nodes[edge.to];
            let target = match (&inbox_tx[edge.to], &result_tx[edge.to], &consumer.role) {
                (Some(tx), _, _) => Target::Node {
                    node: consumer.id,
                    port: edge.port,
                    tx: tx.clone(),
                },
                (_, Some(tx), NodeRole::Yield(name)) => Target::Result {
                    name: name.clone(),
                    tx: tx.clone(),
                },
                _ => {
                    return Err(ExecError::Internal {
                        node: consumer.id,
                        message: "edge into a node without an inbox".into(),
                    })
                }
            };
            ts.push(target);
        }
        targets.push(ts);
    }
    // Only producers hold senders now; channels close when they exit.
    drop(inbox_tx);
    drop(result_tx);

    let mut handles: Vec<(NodeId, JoinHandle<()>)> = Vec::new();
    for ((i, node), ts) in nodes.into_iter().enumerate().zip(targets) {
        let GraphNode {
            id,
            kind,
            inputs,
            operator,
            ..
        } = node;
        let outputs = Outputs::new(id, ts, Arc::clone(&shared));
        let node_alloc = alloc.child(format!("{kind}-{}", id.get()));
        match operator {
            Some(Operator::Source(source)) => {
                let task = SourceTask {
                    id,
                    name: source.name(),
                    source,
                    ctx: SourceContext::new(node_alloc, cfg.batch_rows),
                    outputs,
                    shared: Arc::clone(&shared),
                };
                handles.push((id, runtime.spawn(task.run())));
            }
            Some(Operator::Transform(op)) => {
                let Some(inbox) = inbox_rx[i].take() else {
                    return Err(ExecError::Internal {
                        node: id,
                        message: "transformation without an inbox".into(),
                    });
                };
                let task = NodeTask {
                    id,
                    name: op.name(),
                    op,
                    inbox,
                    num_inputs: inputs.len(),
                    emitter: Emitter::new(node_alloc),
                    outputs,
                    shared: Arc::clone(&shared),
                    metrics: NodeMetrics::default(),
                };
                handles.push((id, runtime.spawn(task.run())));
            }
            None => {}
        }
    }
    debug!(query = %query_id, tasks = handles.len(), "query started");

    let completion = Arc::new(Completion::default());
    {
        let shared = Arc::clone(&shared);
        let completion = Arc::clone(&completion);
        let alloc = alloc.clone();
        let caller = ctx.cancel_token().clone();
        let timeout = ctx.timeout();
        runtime.spawn(async move {
            let watcher = tokio::spawn(watch(Arc::clone(&shared), caller, timeout));
            for (id, handle) in handles {
                if let Err(e) = handle.await {
                    error!(node = %id, "node task failed: {e}");
                    shared.abort(ExecError::Internal {
                        node: id,
                        message: format!("task failed: {e}"),
                    });
                }
            }
            watcher.abort();
            let terminal = shared.mark_done();

            let mut stats = QueryStatistics::new(query_id, plan_hash, started_ms);
            stats.finished_ms = now_ms();
            stats.peak_memory_bytes = alloc.peak();
            stats.tables_emitted = shared.metrics.tables_emitted();
            stats.rows_emitted = shared.metrics.rows_emitted();
            let outcome = match terminal {
                Some(e) => Err(e),
                None => Ok(stats),
            };
            debug!(query = %query_id, ok = outcome.is_ok(), "query drained");
            completion.complete(outcome);
        });
    }

    Ok(Query::new(
        query_id,
        shared,
        completion,
        results,
        alloc,
        runtime,
        Duration::from_millis(cfg.cancel_grace_ms),
    ))
}
