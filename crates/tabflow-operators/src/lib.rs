#![forbid(unsafe_code)]
//! tabflow-operators: the contracts the dispatcher drives, plus builtins.
//!
//! Design intent:
//! - Operators are synchronous; the exec crate owns threads and channels.
//! - Every output buffer is charged to the allocator handed out through the
//!   `Emitter` / `SourceContext`.
//! - Plan nodes are instantiated through an explicit `Registry`.

pub mod message;
pub mod registry;
pub mod source;
pub mod traits;

pub mod aggregate;
pub mod filter;
pub mod project;
pub mod quantile;
pub mod rename;
pub mod union;

mod copy;

pub use message::{Emitter, Message};
pub use registry::{BuildContext, Constructor, Operator, Registry};
pub use source::{Dataset, DatasetProvider, MemoryStore, ReaderSource, RowReader};
pub use traits::{OpError, Port, Source, SourceContext, SourceEvent, Transformation};
