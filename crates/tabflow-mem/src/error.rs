use thiserror::Error;

/// Result type local to tabflow-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("resource exhausted: allocator '{allocator}' requested {requested} bytes, limit {limit}, used {used}")]
    ResourceExhausted {
        allocator: String,
        requested: usize,
        limit: usize,
        used: usize,
    },

    #[error("allocation size overflow in allocator '{allocator}'")]
    Overflow { allocator: String },
}
