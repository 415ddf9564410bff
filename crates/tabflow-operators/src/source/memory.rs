//! In-memory dataset store.

use std::collections::HashMap;
use std::sync::Arc;

use tabflow_core::schema::ColumnSchema;
use tabflow_core::types::Value;

use super::reader::{DatasetProvider, RowReader};
use crate::traits::OpError;

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    schema: ColumnSchema,
    key_columns: Vec<String>,
    sorted_by_key: bool,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(schema: ColumnSchema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    pub fn with_key_columns<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Declare that rows are grouped by key, so the source can finish each
    /// key as soon as the next one starts.
    pub fn sorted_by_key(mut self, sorted: bool) -> Self {
        self.sorted_by_key = sorted;
        self
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    datasets: HashMap<String, Arc<Dataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, dataset: Dataset) -> &mut Self {
        self.datasets.insert(name.into(), Arc::new(dataset));
        self
    }

    pub fn with_dataset(mut self, name: impl Into<String>, dataset: Dataset) -> Self {
        self.insert(name, dataset);
        self
    }
}

impl DatasetProvider for MemoryStore {
    fn open(&self, dataset: &str) -> Result<Box<dyn RowReader>, OpError> {
        let data = self
            .datasets
            .get(dataset)
            .ok_or_else(|| OpError::Exec(format!("unknown dataset '{dataset}'")))?;
        Ok(Box::new(MemoryReader {
            data: Arc::clone(data),
            pos: 0,
        }))
    }
}

struct MemoryReader {
    data: Arc<Dataset>,
    pos: usize,
}

impl RowReader for MemoryReader {
    fn schema(&self) -> &ColumnSchema {
        &self.data.schema
    }

    fn key_columns(&self) -> &[String] {
        &self.data.key_columns
    }

    fn sorted_by_key(&self) -> bool {
        self.data.sorted_by_key
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, OpError> {
        let row = self.data.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use tabflow_core::schema::{ColumnMeta, ColumnType};
    use tabflow_mem::Allocator;

    use super::*;
    use crate::source::ReaderSource;
    use crate::traits::{Source, SourceContext, SourceEvent};

    fn store(sorted: bool) -> Arc<MemoryStore> {
        let schema = ColumnSchema::new(vec![
            ColumnMeta::new("host", ColumnType::String),
            ColumnMeta::new("v", ColumnType::Int),
        ]);
        let last = if sorted { "b" } else { "a" };
        let rows = [("a", 1), ("a", 2), ("a", 3), ("b", 4), (last, 5)]
            .into_iter()
            .map(|(h, v)| vec![Value::from(h), Value::Int(v)]);
        let ds = Dataset::new(schema)
            .with_key_columns(["host"])
            .sorted_by_key(sorted)
            .with_rows(rows);
        Arc::new(MemoryStore::new().with_dataset("cpu", ds))
    }

    /// Events as ("T", key, rows) / ("F", key, 0).
    fn drain(src: &mut ReaderSource, alloc: &Allocator) -> Vec<(&'static str, String, usize)> {
        let mut ctx = SourceContext::new(alloc.clone(), 2);
        let mut out = Vec::new();
        while let Some(ev) = src.next(&mut ctx).unwrap() {
            out.push(match ev {
                SourceEvent::Table(t) => ("T", t.key().to_string(), t.num_rows()),
                SourceEvent::Finish(k) => ("F", k.to_string(), 0),
            });
        }
        out
    }

    #[test]
    fn unsorted_reader_finishes_keys_at_exhaustion() {
        let alloc = Allocator::unlimited();
        let mut src = ReaderSource::new("cpu", store(false), None);
        let events = drain(&mut src, &alloc);
        assert_eq!(
            events,
            vec![
                ("T", "{host=a}".to_string(), 2),
                ("T", "{host=a}".to_string(), 2),
                ("F", "{host=a}".to_string(), 0),
                ("T", "{host=b}".to_string(), 1),
                ("F", "{host=b}".to_string(), 0),
            ]
        );
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn sorted_reader_finishes_on_key_change() {
        let alloc = Allocator::unlimited();
        let mut src = ReaderSource::new("cpu", store(true), Some(10));
        let events = drain(&mut src, &alloc);
        assert_eq!(
            events,
            vec![
                ("T", "{host=a}".to_string(), 3),
                ("F", "{host=a}".to_string(), 0),
                ("T", "{host=b}".to_string(), 2),
                ("F", "{host=b}".to_string(), 0),
            ]
        );
    }

    #[test]
    fn unknown_dataset_is_an_error() {
        let alloc = Allocator::unlimited();
        let mut src = ReaderSource::new("nope", store(false), None);
        let mut ctx = SourceContext::new(alloc, 2);
        assert!(matches!(src.next(&mut ctx), Err(OpError::Exec(_))));
    }
}
