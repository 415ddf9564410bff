#![forbid(unsafe_code)]
//! tabflow: a dataflow engine for grouped tables.
//!
//! A physical plan is compiled into a graph of operator instances, one per
//! plan node, and run on a bounded worker pool. Tables flow between nodes in
//! bounded queues; every buffer is charged to the query's allocator; each
//! named result is a stream of tables the caller reads while the query runs.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use tabflow::prelude::*;
//!
//! let schema = ColumnSchema::new(vec![
//!     ColumnMeta::new("host", ColumnType::String),
//!     ColumnMeta::new("_value", ColumnType::Float),
//! ]);
//! let store = MemoryStore::new().with_dataset(
//!     "cpu",
//!     Dataset::new(schema)
//!         .with_key_columns(["host"])
//!         .with_rows(vec![vec![Value::from("a"), Value::from(0.5)]]),
//! );
//! let engine = Engine::new(EngineConfig::default()).with_datasets(Arc::new(store));
//! let plan = PhysicalPlan::new(vec![
//!     PlanNode::new(1, "from", json!({ "dataset": "cpu" })),
//!     PlanNode::new(2, "aggregate", json!({ "fn": "mean" })).after(&[1]),
//! ]);
//! let mut query = engine.execute(&plan)?;
//! for result in query.take_results() {
//!     for mut table in result.tables() {
//!         println!("{}", TableFormatter::new().format(&mut table)?);
//!     }
//! }
//! query.wait()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use tabflow_core;
pub use tabflow_exec;
pub use tabflow_mem;
pub use tabflow_operators;
pub use tabflow_table;

pub use tabflow_exec::{Engine, ExecError, Query, QueryContext, QueryResult, Tables};

pub mod prelude {
    pub use tabflow_core::config::EngineConfig;
    pub use tabflow_core::dag::{PhysicalPlan, PlanNode};
    pub use tabflow_core::error::CancelReason;
    pub use tabflow_core::group_key::GroupKey;
    pub use tabflow_core::id::{NodeId, QueryId};
    pub use tabflow_core::schema::{ColumnMeta, ColumnSchema, ColumnType};
    pub use tabflow_core::stats::QueryStatistics;
    pub use tabflow_core::types::Value;
    pub use tabflow_exec::{
        CancelToken, Engine, ErrorKind, ExecError, Graph, Query, QueryContext, QueryResult,
        Tables,
    };
    pub use tabflow_mem::Allocator;
    pub use tabflow_operators::{
        BuildContext, Dataset, DatasetProvider, Emitter, MemoryStore, OpError, Operator, Port,
        Registry, RowReader, Source, SourceContext, SourceEvent, Transformation,
    };
    pub use tabflow_table::{Table, TableBuilder, TableFormatter, TableView};
}
