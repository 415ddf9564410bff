#![forbid(unsafe_code)]
//! tabflow-core: shared data model for the tabflow execution engine.
//!
//! Everything here is plain data: column schemas, scalar values, group keys,
//! the physical plan DAG handed over by the (external) compiler, and the
//! engine configuration. No async, no allocator, no I/O.

pub mod config;
pub mod dag;
pub mod error;
pub mod group_key;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod schema;
pub mod stats;
pub mod types;

/// Engine version string recorded in query statistics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
