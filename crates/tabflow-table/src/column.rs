//! Typed, nullable column storage.

use std::mem::size_of;

use tabflow_core::schema::ColumnType;
use tabflow_core::types::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int(Vec<Option<i64>>),
    UInt(Vec<Option<u64>>),
    Float(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Bool(Vec<Option<bool>>),
    Time(Vec<Option<i64>>),
}

impl ColumnData {
    pub fn new(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Int => ColumnData::Int(Vec::new()),
            ColumnType::UInt => ColumnData::UInt(Vec::new()),
            ColumnType::Float => ColumnData::Float(Vec::new()),
            ColumnType::String => ColumnData::String(Vec::new()),
            ColumnType::Bool => ColumnData::Bool(Vec::new()),
            ColumnType::Time => ColumnData::Time(Vec::new()),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Int(_) => ColumnType::Int,
            ColumnData::UInt(_) => ColumnType::UInt,
            ColumnData::Float(_) => ColumnType::Float,
            ColumnData::String(_) => ColumnType::String,
            ColumnData::Bool(_) => ColumnType::Bool,
            ColumnData::Time(_) => ColumnType::Time,
        }
    }

    /// Bytes accounted per slot (value plus validity).
    pub fn slot_size(ty: ColumnType) -> usize {
        match ty {
            ColumnType::Int | ColumnType::Time => size_of::<Option<i64>>(),
            ColumnType::UInt => size_of::<Option<u64>>(),
            ColumnType::Float => size_of::<Option<f64>>(),
            ColumnType::String => size_of::<Option<String>>(),
            ColumnType::Bool => size_of::<Option<bool>>(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) | ColumnData::Time(v) => v.len(),
            ColumnData::UInt(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::String(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn reserve_exact(&mut self, additional: usize) {
        match self {
            ColumnData::Int(v) | ColumnData::Time(v) => v.reserve_exact(additional),
            ColumnData::UInt(v) => v.reserve_exact(additional),
            ColumnData::Float(v) => v.reserve_exact(additional),
            ColumnData::String(v) => v.reserve_exact(additional),
            ColumnData::Bool(v) => v.reserve_exact(additional),
        }
    }

    /// Append a value of the matching type (or null). A mismatched value is
    /// handed back unchanged.
    pub(crate) fn push(&mut self, value: Value) -> Result<(), Value> {
        match (self, value) {
            (ColumnData::Int(v), Value::Int(x)) => v.push(Some(x)),
            (ColumnData::UInt(v), Value::UInt(x)) => v.push(Some(x)),
            (ColumnData::Float(v), Value::Float(x)) => v.push(Some(x)),
            (ColumnData::String(v), Value::Str(x)) => v.push(Some(x)),
            (ColumnData::Bool(v), Value::Bool(x)) => v.push(Some(x)),
            (ColumnData::Time(v), Value::Time(x)) => v.push(Some(x)),
            (col, Value::Null) => col.push_null(),
            (_, other) => return Err(other),
        }
        Ok(())
    }

    fn push_null(&mut self) {
        match self {
            ColumnData::Int(v) | ColumnData::Time(v) => v.push(None),
            ColumnData::UInt(v) => v.push(None),
            ColumnData::Float(v) => v.push(None),
            ColumnData::String(v) => v.push(None),
            ColumnData::Bool(v) => v.push(None),
        }
    }

    /// Row-at-a-time view of one slot. Out-of-range rows read as null.
    pub fn value(&self, row: usize) -> Value {
        match self {
            ColumnData::Int(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Int),
            ColumnData::UInt(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::UInt),
            ColumnData::Float(v) => v
                .get(row)
                .copied()
                .flatten()
                .map_or(Value::Null, Value::Float),
            ColumnData::String(v) => v
                .get(row)
                .and_then(|s| s.clone())
                .map_or(Value::Null, Value::Str),
            ColumnData::Bool(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Bool),
            ColumnData::Time(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Time),
        }
    }

    pub fn as_int(&self) -> Option<&[Option<i64>]> {
        match self {
            ColumnData::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<&[Option<u64>]> {
        match self {
            ColumnData::UInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&[Option<f64>]> {
        match self {
            ColumnData::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&[Option<String>]> {
        match self {
            ColumnData::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[Option<bool>]> {
        match self {
            ColumnData::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&[Option<i64>]> {
        match self {
            ColumnData::Time(v) => Some(v),
            _ => None,
        }
    }
}
