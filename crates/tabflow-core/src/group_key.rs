//! Group keys: the (column, value) pairs that identify one series.
//!
//! Pairs are kept sorted by column name, so two keys built from the same
//! pairs in a different order compare equal and hash the same.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::ColumnMeta;
use crate::types::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    cols: Vec<ColumnMeta>,
    values: Vec<Value>,
}

impl GroupKey {
    /// The empty key (a single, ungrouped series).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a key from pairs. Values must match their column type (or be
    /// null) and names must be unique.
    pub fn new(pairs: Vec<(ColumnMeta, Value)>) -> Result<Self> {
        let mut pairs = pairs;
        pairs.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name));
        for w in pairs.windows(2) {
            if w[0].0.name == w[1].0.name {
                return Err(Error::Schema(format!(
                    "duplicate group key column '{}'",
                    w[0].0.name
                )));
            }
        }
        for (col, value) in &pairs {
            if let Some(ty) = value.column_type() {
                if ty != col.ty {
                    return Err(Error::Schema(format!(
                        "group key column '{}' is {} but value is {}",
                        col.name, col.ty, ty
                    )));
                }
            }
        }
        let (cols, values) = pairs.into_iter().unzip();
        Ok(Self { cols, values })
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    pub fn cols(&self) -> &[ColumnMeta] {
        &self.cols
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn has_col(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.cols
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .ok()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index_of(name).map(|i| &self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnMeta, &Value)> {
        self.cols.iter().zip(self.values.iter())
    }

    /// Keep only the pairs whose column satisfies `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&ColumnMeta) -> bool) -> GroupKey {
        let (cols, values) = self
            .iter()
            .filter(|(c, _)| keep(c))
            .map(|(c, v)| (c.clone(), v.clone()))
            .unzip();
        GroupKey { cols, values }
    }

    /// Rename key columns; `rename` returns the new name or `None` to keep it.
    pub fn rename(&self, mut rename: impl FnMut(&str) -> Option<String>) -> Result<GroupKey> {
        let pairs = self
            .iter()
            .map(|(c, v)| {
                let name = rename(&c.name).unwrap_or_else(|| c.name.clone());
                (ColumnMeta::new(name, c.ty), v.clone())
            })
            .collect();
        GroupKey::new(pairs)
    }

    /// Hash that is stable across processes and platforms (blake3 over a
    /// type-tagged encoding), suitable for partitioning and fingerprints.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for (col, value) in self.iter() {
            hasher.update(&(col.name.len() as u64).to_le_bytes());
            hasher.update(col.name.as_bytes());
            value.hash_into(&mut hasher);
        }
        let out = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&out.as_bytes()[0..8]);
        u64::from_le_bytes(head)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (col, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", col.name, value)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn pair(name: &str, v: &str) -> (ColumnMeta, Value) {
        (ColumnMeta::new(name, ColumnType::String), Value::from(v))
    }

    #[test]
    fn construction_order_does_not_matter() {
        let a = GroupKey::new(vec![pair("host", "a"), pair("region", "eu")]).unwrap();
        let b = GroupKey::new(vec![pair("region", "eu"), pair("host", "a")]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.stable_hash(), b.stable_hash());
        assert_eq!(a.to_string(), "{host=a,region=eu}");
    }

    #[test]
    fn stable_hash_separates_values() {
        let a = GroupKey::new(vec![pair("host", "a")]).unwrap();
        let b = GroupKey::new(vec![pair("host", "b")]).unwrap();
        assert_ne!(a.stable_hash(), b.stable_hash());
    }

    #[test]
    fn rejects_duplicate_columns_and_type_mismatch() {
        assert!(GroupKey::new(vec![pair("host", "a"), pair("host", "b")]).is_err());
        let bad = (ColumnMeta::new("n", ColumnType::Int), Value::from("x"));
        assert!(GroupKey::new(vec![bad]).is_err());
    }
}
