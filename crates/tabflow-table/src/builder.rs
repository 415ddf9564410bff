//! Incremental construction of a [`Table`].
//!
//! A builder is owned by one operator at a time. Columns are declared up
//! front (or lazily by name), values are appended column by column or a row
//! at a time, and `seal` checks that every column ended up the same length.

use tabflow_core::group_key::GroupKey;
use tabflow_core::schema::{ColumnMeta, ColumnSchema, ColumnType};
use tabflow_core::types::Value;
use tabflow_mem::Allocator;

use crate::buffer::Buffer;
use crate::error::{Result, TableError};
use crate::table::Table;

#[derive(Debug)]
pub struct TableBuilder {
    key: GroupKey,
    alloc: Allocator,
    columns: Vec<ColumnMeta>,
    buffers: Vec<Buffer>,
}

impl TableBuilder {
    pub fn new(key: GroupKey, alloc: &Allocator) -> Self {
        Self {
            key,
            alloc: alloc.clone(),
            columns: Vec::new(),
            buffers: Vec::new(),
        }
    }

    /// Builder pre-populated with `schema`'s columns.
    pub fn with_schema(key: GroupKey, schema: &ColumnSchema, alloc: &Allocator) -> Result<Self> {
        let mut b = Self::new(key, alloc);
        for col in &schema.columns {
            b.add_column(col.name.clone(), col.ty)?;
        }
        Ok(b)
    }

    /// Build a table from whole rows in one go.
    pub fn from_rows(
        key: GroupKey,
        schema: &ColumnSchema,
        rows: impl IntoIterator<Item = Vec<Value>>,
        alloc: &Allocator,
    ) -> Result<Table> {
        let mut b = Self::with_schema(key, schema, alloc)?;
        for row in rows {
            b.append_row(row)?;
        }
        b.seal()
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Declare a new column; returns its index.
    pub fn add_column(&mut self, name: impl Into<String>, ty: ColumnType) -> Result<usize> {
        let name = name.into();
        if self.column_index(&name).is_some() {
            return Err(TableError::DuplicateColumn(name));
        }
        let buf = Buffer::new(ty, &self.alloc)?;
        self.columns.push(ColumnMeta::new(name, ty));
        self.buffers.push(buf);
        Ok(self.columns.len() - 1)
    }

    /// Declare every key column that is not already present.
    pub fn add_key_columns(&mut self) -> Result<()> {
        let cols: Vec<ColumnMeta> = self.key.cols().to_vec();
        for col in cols {
            if self.column_index(&col.name).is_none() {
                self.add_column(col.name, col.ty)?;
            }
        }
        Ok(())
    }

    /// Number of complete rows (the length of the shortest column).
    pub fn num_rows(&self) -> usize {
        self.buffers.iter().map(Buffer::len).min().unwrap_or(0)
    }

    /// Pre-charge room for `additional` rows in every column.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        for buf in &mut self.buffers {
            buf.reserve(additional)?;
        }
        Ok(())
    }

    pub fn append_value(&mut self, col: usize, value: Value) -> Result<()> {
        let meta = self
            .columns
            .get(col)
            .ok_or_else(|| TableError::NoSuchColumn(format!("#{col}")))?;
        let buf = &mut self.buffers[col];
        match buf.push(value) {
            Ok(()) => Ok(()),
            Err(Ok(rejected)) => Err(TableError::TypeMismatch {
                column: meta.name.clone(),
                expected: meta.ty,
                // push only hands back typed values
                actual: rejected.column_type().unwrap_or(meta.ty),
            }),
            Err(Err(mem)) => Err(TableError::Memory(mem)),
        }
    }

    pub fn append_nil(&mut self, col: usize) -> Result<()> {
        self.append_value(col, Value::Null)
    }

    pub fn append_int(&mut self, col: usize, v: i64) -> Result<()> {
        self.append_value(col, Value::Int(v))
    }

    pub fn append_uint(&mut self, col: usize, v: u64) -> Result<()> {
        self.append_value(col, Value::UInt(v))
    }

    pub fn append_float(&mut self, col: usize, v: f64) -> Result<()> {
        self.append_value(col, Value::Float(v))
    }

    pub fn append_string(&mut self, col: usize, v: impl Into<String>) -> Result<()> {
        self.append_value(col, Value::Str(v.into()))
    }

    pub fn append_bool(&mut self, col: usize, v: bool) -> Result<()> {
        self.append_value(col, Value::Bool(v))
    }

    pub fn append_time(&mut self, col: usize, v: i64) -> Result<()> {
        self.append_value(col, Value::Time(v))
    }

    /// Append one value per column, in column order.
    pub fn append_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowArity {
                got: row.len(),
                expected: self.columns.len(),
            });
        }
        for (i, v) in row.into_iter().enumerate() {
            self.append_value(i, v)?;
        }
        Ok(())
    }

    /// Finalize into an immutable table. Ragged columns are rejected.
    pub fn seal(self) -> Result<Table> {
        let expected = self.buffers.first().map(Buffer::len).unwrap_or(0);
        for (meta, buf) in self.columns.iter().zip(&self.buffers) {
            if buf.len() != expected {
                return Err(TableError::RaggedColumns {
                    column: meta.name.clone(),
                    len: buf.len(),
                    expected,
                });
            }
        }
        let schema = ColumnSchema::new(self.columns);
        let (data, reservations): (Vec<_>, Vec<_>) =
            self.buffers.into_iter().map(Buffer::into_parts).unzip();
        Ok(Table::from_parts(self.key, schema, expected, data, reservations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_key() -> GroupKey {
        GroupKey::new(vec![(
            ColumnMeta::new("host", ColumnType::String),
            Value::from("a"),
        )])
        .unwrap()
    }

    #[test]
    fn seal_rejects_ragged_columns() {
        let alloc = Allocator::unlimited();
        let mut b = TableBuilder::new(GroupKey::empty(), &alloc);
        let t = b.add_column("t", ColumnType::Time).unwrap();
        let v = b.add_column("v", ColumnType::Float).unwrap();
        b.append_time(t, 1).unwrap();
        b.append_time(t, 2).unwrap();
        b.append_float(v, 1.0).unwrap();
        assert_eq!(b.num_rows(), 1);
        let err = b.seal().unwrap_err();
        assert!(matches!(err, TableError::RaggedColumns { len: 1, expected: 2, .. }));
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn type_mismatch_names_the_column() {
        let alloc = Allocator::unlimited();
        let mut b = TableBuilder::new(GroupKey::empty(), &alloc);
        let v = b.add_column("v", ColumnType::Float).unwrap();
        let err = b.append_string(v, "x").unwrap_err();
        assert_eq!(
            err,
            TableError::TypeMismatch {
                column: "v".into(),
                expected: ColumnType::Float,
                actual: ColumnType::String,
            }
        );
        assert!(b.add_column("v", ColumnType::Int).is_err());
    }

    #[test]
    fn key_columns_are_added_once() {
        let alloc = Allocator::unlimited();
        let mut b = TableBuilder::new(host_key(), &alloc);
        b.add_key_columns().unwrap();
        b.add_key_columns().unwrap();
        assert_eq!(b.columns().len(), 1);
        assert_eq!(b.column_index("host"), Some(0));
    }
}
