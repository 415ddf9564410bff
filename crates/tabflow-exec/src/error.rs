use tabflow_core::error::{CancelReason, Error as CoreError};
use tabflow_core::id::NodeId;
use tabflow_operators::OpError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The plan could not be turned into a graph.
    #[error("compile error: {0}")]
    Compile(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(tabflow_mem::Error),

    #[error("operator {node} failed: {message}")]
    Operator { node: NodeId, message: String },

    #[error("{0}")]
    Canceled(CancelReason),

    /// Recovered panic or protocol violation inside the engine.
    #[error("internal fault at {node}: {message}")]
    Internal { node: NodeId, message: String },
}

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Compile,
    ResourceExhausted,
    Operator,
    Canceled,
}

impl ExecError {
    /// Internal faults are reported as operator errors; see `is_internal`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::Compile(_) => ErrorKind::Compile,
            ExecError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            ExecError::Operator { .. } | ExecError::Internal { .. } => ErrorKind::Operator,
            ExecError::Canceled(_) => ErrorKind::Canceled,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ExecError::Internal { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ExecError::Canceled(_))
    }

    /// Classify an operator failure at `node`.
    pub fn from_op(node: NodeId, e: OpError) -> Self {
        match e {
            OpError::Memory(m) => ExecError::ResourceExhausted(m),
            OpError::Canceled(r) => ExecError::Canceled(r),
            other => ExecError::Operator {
                node,
                message: other.to_string(),
            },
        }
    }

    /// Form carried downstream in finish signals.
    pub fn to_op_error(&self) -> OpError {
        match self {
            ExecError::ResourceExhausted(m) => OpError::Memory(m.clone()),
            ExecError::Canceled(r) => OpError::Canceled(*r),
            other => OpError::Exec(other.to_string()),
        }
    }
}

impl From<CoreError> for ExecError {
    fn from(e: CoreError) -> Self {
        ExecError::Compile(e.to_string())
    }
}
