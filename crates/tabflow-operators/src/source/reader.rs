//! Row readers and the source that groups their rows into keyed tables.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::Deserialize;
use tabflow_core::group_key::GroupKey;
use tabflow_core::schema::{ColumnMeta, ColumnSchema};
use tabflow_core::types::Value;
use tabflow_table::TableBuilder;

use crate::registry::{parse_params, BuildContext};
use crate::traits::{OpError, Source, SourceContext, SourceEvent};

/// Row-at-a-time access to one stored dataset.
pub trait RowReader: Send {
    fn schema(&self) -> &ColumnSchema;

    /// Columns whose values form each row's group key.
    fn key_columns(&self) -> &[String];

    /// Whether rows arrive grouped by key (all rows of a key contiguous).
    fn sorted_by_key(&self) -> bool {
        false
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>, OpError>;
}

/// Opens readers by dataset name.
pub trait DatasetProvider: Send + Sync {
    fn open(&self, dataset: &str) -> Result<Box<dyn RowReader>, OpError>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FromParams {
    dataset: String,
    #[serde(default)]
    batch_rows: Option<usize>,
}

struct Open {
    reader: Box<dyn RowReader>,
    schema: ColumnSchema,
    key_cols: Vec<(usize, ColumnMeta)>,
    sorted: bool,
}

/// Reads a dataset and turns it into keyed tables of at most `batch_rows`
/// rows. Keeps at most one open builder per key.
pub struct ReaderSource {
    dataset: String,
    provider: Arc<dyn DatasetProvider>,
    batch_rows: Option<usize>,
    open: Option<Open>,
    // Keys seen but not finished, with their partial table (if any rows).
    building: BTreeMap<GroupKey, Option<TableBuilder>>,
    pending: VecDeque<SourceEvent>,
    exhausted: bool,
}

impl ReaderSource {
    pub fn new(
        dataset: impl Into<String>,
        provider: Arc<dyn DatasetProvider>,
        batch_rows: Option<usize>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            provider,
            batch_rows,
            open: None,
            building: BTreeMap::new(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn from_params(params: &serde_json::Value, ctx: &BuildContext) -> Result<Self, OpError> {
        let p: FromParams = parse_params("from", params)?;
        if p.batch_rows == Some(0) {
            return Err(OpError::Plan("from: batch_rows must be > 0".into()));
        }
        let batch = p.batch_rows.unwrap_or(ctx.batch_rows);
        Ok(Self::new(p.dataset, Arc::clone(&ctx.datasets), Some(batch)))
    }

    fn open_reader(&mut self) -> Result<(), OpError> {
        let reader = self.provider.open(&self.dataset)?;
        let schema = reader.schema().clone();
        let mut key_cols = Vec::with_capacity(reader.key_columns().len());
        for name in reader.key_columns() {
            let idx = schema.index_of(name).ok_or_else(|| {
                OpError::Schema(format!(
                    "dataset '{}': key column '{name}' not in schema",
                    self.dataset
                ))
            })?;
            key_cols.push((idx, schema.columns[idx].clone()));
        }
        tracing::debug!(dataset = %self.dataset, keys = key_cols.len(), "reader opened");
        let sorted = reader.sorted_by_key();
        self.open = Some(Open {
            reader,
            schema,
            key_cols,
            sorted,
        });
        Ok(())
    }

    fn ingest(&mut self, row: Vec<Value>, ctx: &SourceContext) -> Result<(), OpError> {
        let Some(open) = self.open.as_ref() else {
            return Ok(());
        };
        if row.len() != open.schema.len() {
            return Err(OpError::Schema(format!(
                "dataset '{}': row has {} values, schema has {}",
                self.dataset,
                row.len(),
                open.schema.len()
            )));
        }
        let key = GroupKey::new(
            open.key_cols
                .iter()
                .map(|(i, meta)| (meta.clone(), row[*i].clone()))
                .collect(),
        )?;

        // Key-ordered input: a new key means every other open key is done.
        if open.sorted {
            let done: Vec<GroupKey> = self
                .building
                .keys()
                .filter(|k| **k != key)
                .cloned()
                .collect();
            for k in done {
                let b = self.building.remove(&k).flatten();
                close_key(&mut self.pending, k, b)?;
            }
        }

        let batch_rows = self.batch_rows.unwrap_or(ctx.batch_rows());
        let slot = self.building.entry(key.clone()).or_insert(None);
        if slot.is_none() {
            let mut b = TableBuilder::with_schema(key, &open.schema, ctx.allocator())?;
            b.reserve(batch_rows.min(64))?;
            *slot = Some(b);
        }
        let full = match slot.as_mut() {
            Some(b) => {
                b.append_row(row)?;
                b.num_rows() >= batch_rows
            }
            None => false,
        };
        if full {
            if let Some(b) = slot.take() {
                self.pending.push_back(SourceEvent::Table(b.seal()?));
            }
        }
        Ok(())
    }
}

/// Seal whatever is buffered for `key` and queue its finish.
fn close_key(
    pending: &mut VecDeque<SourceEvent>,
    key: GroupKey,
    builder: Option<TableBuilder>,
) -> Result<(), OpError> {
    if let Some(b) = builder {
        if b.num_rows() > 0 {
            pending.push_back(SourceEvent::Table(b.seal()?));
        }
    }
    pending.push_back(SourceEvent::Finish(key));
    Ok(())
}

impl Source for ReaderSource {
    fn name(&self) -> &'static str {
        "from"
    }

    fn next(&mut self, ctx: &mut SourceContext) -> Result<Option<SourceEvent>, OpError> {
        if self.open.is_none() && !self.exhausted {
            self.open_reader()?;
        }
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Ok(Some(ev));
            }
            if self.exhausted {
                match self.building.pop_first() {
                    Some((key, b)) => close_key(&mut self.pending, key, b)?,
                    None => return Ok(None),
                }
                continue;
            }
            let row = match self.open.as_mut() {
                Some(open) => open.reader.next_row()?,
                None => None,
            };
            match row {
                Some(row) => self.ingest(row, ctx)?,
                None => {
                    tracing::debug!(dataset = %self.dataset, "reader exhausted");
                    self.exhausted = true;
                    self.open = None;
                }
            }
        }
    }
}
