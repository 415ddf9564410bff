//! Nullable scalar values.
//!
//! Columns themselves are stored typed (see `tabflow-table`); `Value` is the
//! row-at-a-time view used by group keys, readers, and builder appends.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::schema::ColumnType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bool(bool),
    /// Nanoseconds since the Unix epoch.
    Time(i64),
}

impl Value {
    /// Column type this value belongs to; `None` for `Null`, which fits any column.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(ColumnType::Int),
            Value::UInt(_) => Some(ColumnType::UInt),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Str(_) => Some(ColumnType::String),
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Time(_) => Some(ColumnType::Time),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view used by aggregates and interpolation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) | Value::Time(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a literal into a value of the given column type.
    pub fn parse_as(ty: ColumnType, literal: &str) -> Option<Value> {
        let lit = literal.trim();
        match ty {
            ColumnType::Int => lit.parse().ok().map(Value::Int),
            ColumnType::UInt => lit.parse().ok().map(Value::UInt),
            ColumnType::Float => lit.parse().ok().map(Value::Float),
            ColumnType::Time => lit.parse().ok().map(Value::Time),
            ColumnType::Bool => lit.parse().ok().map(Value::Bool),
            ColumnType::String => {
                let unquoted = lit
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(lit);
                Some(Value::Str(unquoted.to_string()))
            }
        }
    }

    /// Total order used for keys and sorting.
    ///
    /// Nulls sort first; NaN sorts after every other float; mixed types are
    /// ordered by variant.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Int(x), Int(y)) | (Time(x), Time(y)) => x.cmp(y),
            (UInt(x), UInt(y)) => x.cmp(y),
            (Float(x), Float(y)) => float_cmp(*x, *y),
            (Str(x), Str(y)) => x.cmp(y),
            (Bool(x), Bool(y)) => x.cmp(y),
            _ => variant_order(self).cmp(&variant_order(other)),
        }
    }

    /// Feed a type-tagged byte encoding of this value into a blake3 hasher.
    pub(crate) fn hash_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&[variant_order(self)]);
        match self {
            Value::Null => {}
            Value::Int(v) | Value::Time(v) => {
                hasher.update(&v.to_le_bytes());
            }
            Value::UInt(v) => {
                hasher.update(&v.to_le_bytes());
            }
            Value::Float(v) => {
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Value::Str(s) => {
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Value::Bool(b) => {
                hasher.update(&[*b as u8]);
            }
        }
    }
}

fn float_cmp(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

fn variant_order(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) => 2,
        Value::UInt(_) => 3,
        Value::Float(_) => 4,
        Value::Str(_) => 5,
        Value::Time(_) => 6,
    }
}

// Floats compare by bit pattern here so that `Eq`/`Hash` stay consistent;
// this is what key equality needs (NaN keys group together).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Int(x), Int(y)) | (Time(x), Time(y)) => x == y,
            (UInt(x), UInt(y)) => x == y,
            (Float(x), Float(y)) => x.to_bits() == y.to_bits(),
            (Str(x), Str(y)) => x == y,
            (Bool(x), Bool(y)) => x == y,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        variant_order(self).hash(state);
        match self {
            Value::Null => {}
            Value::Int(v) | Value::Time(v) => v.hash(state),
            Value::UInt(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bool(b) => b.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(v) | Value::Time(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
