use tabflow_core::schema::ColumnType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error(transparent)]
    Memory(#[from] tabflow_mem::Error),

    #[error("table already consumed; tables are single-pass")]
    AlreadyConsumed,

    #[error("table was released")]
    Released,

    #[error("no such column: {0}")]
    NoSuchColumn(String),

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("type mismatch in column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("column '{column}' has {len} values, expected {expected}")]
    RaggedColumns {
        column: String,
        len: usize,
        expected: usize,
    },

    #[error("row has {got} values, table has {expected} columns")]
    RowArity { got: usize, expected: usize },
}
