//! Rename operator. Renamed key columns are renamed in the group key too.

use std::collections::BTreeMap;

use serde::Deserialize;
use tabflow_core::group_key::GroupKey;
use tabflow_core::schema::{ColumnMeta, ColumnSchema};
use tabflow_table::{Table, TableBuilder};

use crate::copy::copy_rows;
use crate::message::Emitter;
use crate::registry::parse_params;
use crate::traits::{OpError, Port, Transformation};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RenameParams {
    /// old_name -> new_name
    columns: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Rename {
    renames: BTreeMap<String, String>,
}

impl Rename {
    pub fn new(renames: BTreeMap<String, String>) -> Self {
        Self { renames }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: RenameParams = parse_params("rename", params)?;
        if let Some((from, _)) = p.columns.iter().find(|(_, to)| to.is_empty()) {
            return Err(OpError::Plan(format!("rename: empty new name for '{from}'")));
        }
        Ok(Self::new(p.columns))
    }

    fn output_key(&self, key: &GroupKey) -> Result<GroupKey, OpError> {
        Ok(key.rename(|name| self.renames.get(name).cloned())?)
    }

    fn output_schema(&self, schema: &ColumnSchema) -> ColumnSchema {
        ColumnSchema::new(
            schema
                .columns
                .iter()
                .map(|c| {
                    let name = self.renames.get(&c.name).unwrap_or(&c.name);
                    ColumnMeta::new(name.clone(), c.ty)
                })
                .collect(),
        )
    }
}

impl Transformation for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn process(&mut self, _port: Port, mut table: Table, out: &mut Emitter) -> Result<(), OpError> {
        let key = self.output_key(table.key())?;
        let schema = self.output_schema(table.schema());
        let alloc = out.allocator().clone();

        let renamed = table.read(|view| -> Result<Table, OpError> {
            let mut b = TableBuilder::with_schema(key, &schema, &alloc)?;
            b.reserve(view.num_rows())?;
            let mapping: Vec<(usize, usize)> = (0..schema.len()).map(|i| (i, i)).collect();
            copy_rows(view, &mut b, &mapping, 0..view.num_rows())?;
            Ok(b.seal()?)
        })??;

        out.emit(renamed);
        Ok(())
    }

    fn finish(
        &mut self,
        _port: Port,
        key: &GroupKey,
        err: Option<&OpError>,
        out: &mut Emitter,
    ) -> Result<(), OpError> {
        out.finish(self.output_key(key)?, err.cloned());
        Ok(())
    }
}
