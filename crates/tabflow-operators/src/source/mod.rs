//! Sources backed by an external row store.

pub mod memory;
pub mod reader;

pub use memory::{Dataset, MemoryStore};
pub use reader::{DatasetProvider, ReaderSource, RowReader};
