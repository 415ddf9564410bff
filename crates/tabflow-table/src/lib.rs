#![forbid(unsafe_code)]
//! tabflow-table: the columnar batch every pipeline stage passes around.
//!
//! A [`Table`] is an immutable batch of rows sharing one group key. It is
//! produced by a [`TableBuilder`] whose buffers are charged against a query
//! allocator, sealed once, and read exactly once by the next stage.

pub mod buffer;
pub mod builder;
pub mod column;
pub mod error;
pub mod format;
pub mod table;

pub use builder::TableBuilder;
pub use column::ColumnData;
pub use error::{Result, TableError};
pub use format::TableFormatter;
pub use table::{Table, TableView};
