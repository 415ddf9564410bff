//! Operator contracts.
//!
//! The dispatcher drives two kinds of operators:
//! - a [`Source`] is pulled for events until it is exhausted;
//! - a [`Transformation`] is pushed one message at a time from its input
//!   ports and emits into an [`Emitter`].
//!
//! Invariants every implementation relies on:
//! - At most one call into a given operator runs at a time.
//! - For each (port, key), all `process` calls happen before the single
//!   `finish` call for that key on that port.
//! - `close` runs once, after every input port is exhausted.

use tabflow_core::error::{CancelReason, Error as CoreError};
use tabflow_core::group_key::GroupKey;
use tabflow_mem::Allocator;
use tabflow_table::{Table, TableError};

use thiserror::Error;

use crate::message::Emitter;

/// Input edge index on a consumer node, in predecessor order.
pub type Port = usize;

#[derive(Debug, Clone, Error)]
pub enum OpError {
    #[error("planning error: {0}")]
    Plan(String),

    #[error("execution error: {0}")]
    Exec(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error(transparent)]
    Memory(#[from] tabflow_mem::Error),

    #[error("table error: {0}")]
    Table(TableError),

    #[error("{0}")]
    Canceled(CancelReason),
}

impl From<TableError> for OpError {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Memory(m) => OpError::Memory(m),
            other => OpError::Table(other),
        }
    }
}

impl From<CoreError> for OpError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Schema(s) => OpError::Schema(s),
            CoreError::Plan(s) | CoreError::Config(s) => OpError::Plan(s),
            other => OpError::Exec(other.to_string()),
        }
    }
}

/// Streaming operator consuming and producing tables.
pub trait Transformation: Send + 'static {
    /// Human-readable operator name (stable).
    fn name(&self) -> &'static str;

    /// Consume one input table. Keeping data past the call means copying it
    /// into a builder; the table itself is dropped when the call returns.
    fn process(&mut self, port: Port, table: Table, out: &mut Emitter) -> Result<(), OpError>;

    /// No more tables for `key` arrive on `port`. Buffered state for the key
    /// must be flushed and exactly one finish emitted per output key, also
    /// when `err` is set (in which case the error travels downstream).
    fn finish(
        &mut self,
        port: Port,
        key: &GroupKey,
        err: Option<&OpError>,
        out: &mut Emitter,
    ) -> Result<(), OpError>;

    /// Every input port is exhausted.
    fn close(&mut self, _out: &mut Emitter) -> Result<(), OpError> {
        Ok(())
    }
}

pub enum SourceEvent {
    Table(Table),
    /// No more tables for this key.
    Finish(GroupKey),
}

/// Per-call context for sources.
#[derive(Debug, Clone)]
pub struct SourceContext {
    allocator: Allocator,
    batch_rows: usize,
}

impl SourceContext {
    pub fn new(allocator: Allocator, batch_rows: usize) -> Self {
        Self {
            allocator,
            batch_rows: batch_rows.max(1),
        }
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Default table size for sources that do not override it.
    pub fn batch_rows(&self) -> usize {
        self.batch_rows
    }
}

/// Operator without inputs. Returning `Ok(None)` means exhausted; the
/// dispatcher finishes any key the source left open.
pub trait Source: Send + 'static {
    fn name(&self) -> &'static str;

    fn next(&mut self, ctx: &mut SourceContext) -> Result<Option<SourceEvent>, OpError>;
}
