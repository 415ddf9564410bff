//! Convenient re-exports for downstream crates.

pub use crate::config::EngineConfig;
pub use crate::dag::{PhysicalPlan, PlanNode, DEFAULT_RESULT_NAME, YIELD_KIND};
pub use crate::error::{CancelReason, Error, Result};
pub use crate::group_key::GroupKey;
pub use crate::id::{NodeId, QueryId};
pub use crate::schema::{ColumnMeta, ColumnSchema, ColumnType};
pub use crate::stats::QueryStatistics;
pub use crate::types::Value;
