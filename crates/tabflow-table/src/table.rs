//! Sealed, single-pass tables.
//!
//! A `Table` is a handle onto immutable column data. Reading it consumes the
//! handle: the data is dropped (and its memory returned) as soon as the read
//! closure returns. To hand the same data to several consumers, `fork` the
//! handle first; forks share the underlying buffers and each one can be read
//! exactly once.

use std::fmt;
use std::sync::Arc;

use tabflow_core::group_key::GroupKey;
use tabflow_core::schema::ColumnSchema;
use tabflow_core::types::Value;
use tabflow_mem::Reservation;

use crate::column::ColumnData;
use crate::error::{Result, TableError};

struct TableMeta {
    key: GroupKey,
    schema: ColumnSchema,
    num_rows: usize,
}

struct TableData {
    columns: Vec<ColumnData>,
    // Held for accounting only; dropped together with the columns.
    _reservations: Vec<Reservation>,
}

pub struct Table {
    meta: Arc<TableMeta>,
    data: Option<Arc<TableData>>,
    consumed: bool,
}

impl Table {
    pub(crate) fn from_parts(
        key: GroupKey,
        schema: ColumnSchema,
        num_rows: usize,
        columns: Vec<ColumnData>,
        reservations: Vec<Reservation>,
    ) -> Self {
        Self {
            meta: Arc::new(TableMeta {
                key,
                schema,
                num_rows,
            }),
            data: Some(Arc::new(TableData {
                columns,
                _reservations: reservations,
            })),
            consumed: false,
        }
    }

    pub fn key(&self) -> &GroupKey {
        &self.meta.key
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.meta.schema
    }

    pub fn num_rows(&self) -> usize {
        self.meta.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.meta.num_rows == 0
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub fn is_released(&self) -> bool {
        !self.consumed && self.data.is_none()
    }

    /// Read the table once. The handle's share of the data is dropped when
    /// `f` returns; a second call fails with `AlreadyConsumed`.
    pub fn read<R>(&mut self, f: impl FnOnce(&TableView<'_>) -> R) -> Result<R> {
        if self.consumed {
            return Err(TableError::AlreadyConsumed);
        }
        let data = self.data.take().ok_or(TableError::Released)?;
        self.consumed = true;
        let view = TableView {
            meta: &self.meta,
            columns: &data.columns,
        };
        Ok(f(&view))
    }

    /// Read every row as values. Consumes the table like `read`.
    pub fn to_rows(&mut self) -> Result<Vec<Vec<Value>>> {
        self.read(|view| (0..view.num_rows()).map(|r| view.row(r)).collect())
    }

    /// New independent handle onto the same data.
    pub fn fork(&self) -> Result<Table> {
        if self.consumed {
            return Err(TableError::AlreadyConsumed);
        }
        let data = self.data.as_ref().ok_or(TableError::Released)?;
        Ok(Table {
            meta: Arc::clone(&self.meta),
            data: Some(Arc::clone(data)),
            consumed: false,
        })
    }

    /// Give up this handle's share without reading it. Idempotent.
    pub fn release(&mut self) {
        self.data = None;
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("key", &self.meta.key)
            .field("schema", &self.meta.schema)
            .field("num_rows", &self.meta.num_rows)
            .field("consumed", &self.consumed)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Borrowed view handed to a `Table::read` closure.
pub struct TableView<'a> {
    meta: &'a TableMeta,
    columns: &'a [ColumnData],
}

impl<'a> TableView<'a> {
    pub fn key(&self) -> &'a GroupKey {
        &self.meta.key
    }

    pub fn schema(&self) -> &'a ColumnSchema {
        &self.meta.schema
    }

    pub fn num_rows(&self) -> usize {
        self.meta.num_rows
    }

    pub fn columns(&self) -> &'a [ColumnData] {
        self.columns
    }

    pub fn column(&self, idx: usize) -> Option<&'a ColumnData> {
        self.columns.get(idx)
    }

    pub fn column_by_name(&self, name: &str) -> Result<&'a ColumnData> {
        self.meta
            .schema
            .index_of(name)
            .and_then(|i| self.columns.get(i))
            .ok_or_else(|| TableError::NoSuchColumn(name.to_string()))
    }

    pub fn value(&self, row: usize, col: usize) -> Value {
        self.columns
            .get(col)
            .map_or(Value::Null, |c| c.value(row))
    }

    pub fn row(&self, row: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.value(row)).collect()
    }
}
