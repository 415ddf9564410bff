//! Engine: compile a physical plan and start it on the dispatcher.
//!
//! The engine itself holds no per-query state. Every query gets its own
//! graph, allocator and worker pool, so several queries may run side by
//! side from one engine.

use std::sync::Arc;

use tabflow_core::config::EngineConfig;
use tabflow_core::dag::PhysicalPlan;
use tabflow_mem::Allocator;
use tabflow_operators::{BuildContext, DatasetProvider, MemoryStore, Registry};
use tracing::debug;

use crate::context::QueryContext;
use crate::dispatcher;
use crate::error::Result;
use crate::graph::{Graph, GraphBuilder};
use crate::query::Query;

/// Engine owns the configuration, the operator registry, and the dataset
/// provider sources read from.
#[derive(Clone)]
pub struct Engine {
    cfg: EngineConfig,
    registry: Arc<Registry>,
    datasets: Arc<dyn DatasetProvider>,
}

impl Engine {
    /// Engine with the builtin operators and an empty in-memory store.
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            registry: Arc::new(Registry::with_builtins()),
            datasets: Arc::new(MemoryStore::new()),
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_datasets(mut self, datasets: Arc<dyn DatasetProvider>) -> Self {
        self.datasets = datasets;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Validate `plan` and instantiate one operator per node.
    pub fn build(&self, plan: &PhysicalPlan) -> Result<Graph> {
        self.cfg.validate()?;
        let ctx = BuildContext::new(Arc::clone(&self.datasets), self.cfg.batch_rows);
        GraphBuilder::new(&self.registry, ctx).build(plan)
    }

    /// Start `graph` and return immediately. `alloc` becomes the query's
    /// root allocator.
    pub fn start(&self, ctx: QueryContext, graph: Graph, alloc: Allocator) -> Result<Query> {
        debug!(
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            workers = self.cfg.max_parallel_tasks,
            "starting query"
        );
        dispatcher::launch(&self.cfg, ctx, graph, alloc)
    }

    /// Build and start `plan` with a fresh allocator limited to
    /// `mem_limit_bytes` and a default context.
    pub fn execute(&self, plan: &PhysicalPlan) -> Result<Query> {
        let graph = self.build(plan)?;
        let alloc = Allocator::new(self.cfg.mem_limit_bytes);
        self.start(QueryContext::default(), graph, alloc)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cfg", &self.cfg)
            .field("kinds", &self.registry.kinds().collect::<Vec<_>>())
            .finish()
    }
}
