//! Projection: `keep` and `drop`.
//!
//! Removing a key column merges series: several input keys can map to the
//! same output key. In that case output finishes are held back until every
//! input is exhausted so each output key is finished once.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use tabflow_core::group_key::GroupKey;
use tabflow_core::schema::ColumnSchema;
use tabflow_table::{Table, TableBuilder};

use crate::copy::copy_rows;
use crate::message::Emitter;
use crate::registry::parse_params;
use crate::traits::{OpError, Port, Transformation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Keep,
    Drop,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectParams {
    columns: Vec<String>,
}

#[derive(Debug)]
pub struct Project {
    mode: Mode,
    columns: BTreeSet<String>,
    // Output keys awaiting their finish, with the first error seen for them.
    deferred: BTreeMap<GroupKey, Option<OpError>>,
}

impl Project {
    pub fn new(mode: Mode, columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            mode,
            columns: columns.into_iter().collect(),
            deferred: BTreeMap::new(),
        }
    }

    pub fn keep_from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: ProjectParams = parse_params("keep", params)?;
        Ok(Self::new(Mode::Keep, p.columns))
    }

    pub fn drop_from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: ProjectParams = parse_params("drop", params)?;
        Ok(Self::new(Mode::Drop, p.columns))
    }

    fn retains(&self, name: &str) -> bool {
        match self.mode {
            Mode::Keep => self.columns.contains(name),
            Mode::Drop => !self.columns.contains(name),
        }
    }

    fn output_key(&self, key: &GroupKey) -> GroupKey {
        key.retain(|c| self.retains(&c.name))
    }
}

impl Transformation for Project {
    fn name(&self) -> &'static str {
        match self.mode {
            Mode::Keep => "keep",
            Mode::Drop => "drop",
        }
    }

    fn process(&mut self, _port: Port, mut table: Table, out: &mut Emitter) -> Result<(), OpError> {
        let key = self.output_key(table.key());
        if key != *table.key() {
            self.deferred.entry(key.clone()).or_insert(None);
        }

        // (source index, meta) of every surviving column, in input order.
        let kept: Vec<(usize, _)> = table
            .schema()
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| self.retains(&c.name))
            .map(|(i, c)| (i, c.clone()))
            .collect();
        let schema = ColumnSchema::new(kept.iter().map(|(_, c)| c.clone()).collect());
        let mapping: Vec<(usize, usize)> = kept
            .iter()
            .enumerate()
            .map(|(dst, (src, _))| (*src, dst))
            .collect();
        let alloc = out.allocator().clone();

        let projected = table.read(|view| -> Result<Table, OpError> {
            let mut b = TableBuilder::with_schema(key, &schema, &alloc)?;
            b.reserve(view.num_rows())?;
            copy_rows(view, &mut b, &mapping, 0..view.num_rows())?;
            Ok(b.seal()?)
        })??;

        out.emit(projected);
        Ok(())
    }

    fn finish(
        &mut self,
        _port: Port,
        key: &GroupKey,
        err: Option<&OpError>,
        out: &mut Emitter,
    ) -> Result<(), OpError> {
        let out_key = self.output_key(key);
        if out_key == *key && !self.deferred.contains_key(&out_key) {
            out.finish(out_key, err.cloned());
            return Ok(());
        }
        let slot = self.deferred.entry(out_key).or_insert(None);
        if slot.is_none() {
            *slot = err.cloned();
        }
        Ok(())
    }

    fn close(&mut self, out: &mut Emitter) -> Result<(), OpError> {
        for (key, err) in std::mem::take(&mut self.deferred) {
            out.finish(key, err);
        }
        Ok(())
    }
}
