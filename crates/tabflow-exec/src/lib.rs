#![forbid(unsafe_code)]
//! tabflow-exec: graph builder, dispatcher, and query handles.
//!
//! `Engine::build` turns a `PhysicalPlan` into a `Graph` of operator
//! instances; `Engine::start` runs it on a per-query worker pool and hands
//! back a `Query` whose named results stream tables as they are produced.

pub mod context;
mod dispatcher;
pub mod engine;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod protocol;
pub mod query;

pub use context::{CancelToken, QueryContext};
pub use engine::Engine;
pub use error::{ErrorKind, ExecError, Result};
pub use graph::{Edge, Graph, GraphBuilder, GraphNode, NodeRole};
pub use query::{Query, QueryResult, Tables};
