//! Union of several inputs. Tables pass through unchanged; a key is finished
//! once, after every input is exhausted.

use std::collections::BTreeMap;

use tabflow_core::group_key::GroupKey;
use tabflow_table::Table;

use crate::message::Emitter;
use crate::traits::{OpError, Port, Transformation};

#[derive(Debug, Default)]
pub struct Union {
    // Every key seen on any port, with the first error reported for it.
    open: BTreeMap<GroupKey, Option<OpError>>,
}

impl Transformation for Union {
    fn name(&self) -> &'static str {
        "union"
    }

    fn process(&mut self, _port: Port, table: Table, out: &mut Emitter) -> Result<(), OpError> {
        if !self.open.contains_key(table.key()) {
            self.open.insert(table.key().clone(), None);
        }
        out.emit(table);
        Ok(())
    }

    fn finish(
        &mut self,
        _port: Port,
        key: &GroupKey,
        err: Option<&OpError>,
        _out: &mut Emitter,
    ) -> Result<(), OpError> {
        let slot = self.open.entry(key.clone()).or_insert(None);
        if slot.is_none() {
            *slot = err.cloned();
        }
        Ok(())
    }

    fn close(&mut self, out: &mut Emitter) -> Result<(), OpError> {
        for (key, err) in std::mem::take(&mut self.open) {
            out.finish(key, err);
        }
        Ok(())
    }
}
