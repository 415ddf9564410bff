//! Per-key aggregates producing one row per key when the key finishes.

use std::collections::HashMap;

use serde::Deserialize;
use tabflow_core::group_key::GroupKey;
use tabflow_core::schema::ColumnType;
use tabflow_core::types::Value;
use tabflow_table::{Table, TableBuilder};

use crate::message::Emitter;
use crate::registry::parse_params;
use crate::traits::{OpError, Port, Transformation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFn {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

impl AggFn {
    fn output_type(self) -> ColumnType {
        match self {
            AggFn::Count => ColumnType::Int,
            _ => ColumnType::Float,
        }
    }
}

fn default_column() -> String {
    "_value".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AggregateParams {
    #[serde(rename = "fn")]
    func: AggFn,
    #[serde(default = "default_column")]
    column: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Acc {
    count: i64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Acc {
    fn add(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    fn result(&self, func: AggFn) -> Value {
        let float = |v: Option<f64>| v.map_or(Value::Null, Value::Float);
        match func {
            AggFn::Count => Value::Int(self.count),
            _ if self.count == 0 => Value::Null,
            AggFn::Sum => Value::Float(self.sum),
            AggFn::Mean => Value::Float(self.sum / self.count as f64),
            AggFn::Min => float(self.min),
            AggFn::Max => float(self.max),
        }
    }
}

#[derive(Debug)]
pub struct Aggregate {
    func: AggFn,
    column: String,
    state: HashMap<GroupKey, Acc>,
}

impl Aggregate {
    pub fn new(func: AggFn, column: impl Into<String>) -> Self {
        Self {
            func,
            column: column.into(),
            state: HashMap::new(),
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: AggregateParams = parse_params("aggregate", params)?;
        Ok(Self::new(p.func, p.column))
    }
}

impl Transformation for Aggregate {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn process(&mut self, _port: Port, mut table: Table, _out: &mut Emitter) -> Result<(), OpError> {
        let key = table.key().clone();
        let column = &self.column;
        let count_only = self.func == AggFn::Count;

        let partial = table.read(|view| -> Result<Acc, OpError> {
            let col = view.column_by_name(column)?;
            let mut acc = Acc::default();
            for r in 0..view.num_rows() {
                let v = col.value(r);
                if v.is_null() {
                    continue;
                }
                match v.as_f64() {
                    Some(x) => acc.add(x),
                    None if count_only => acc.count += 1,
                    None => {
                        return Err(OpError::Exec(format!(
                            "aggregate: column '{column}' is {}, not numeric",
                            col.column_type()
                        )))
                    }
                }
            }
            Ok(acc)
        })??;

        let acc = self.state.entry(key).or_default();
        acc.count += partial.count;
        acc.sum += partial.sum;
        if let Some(m) = partial.min {
            acc.min = Some(acc.min.map_or(m, |cur| cur.min(m)));
        }
        if let Some(m) = partial.max {
            acc.max = Some(acc.max.map_or(m, |cur| cur.max(m)));
        }
        Ok(())
    }

    fn finish(
        &mut self,
        _port: Port,
        key: &GroupKey,
        err: Option<&OpError>,
        out: &mut Emitter,
    ) -> Result<(), OpError> {
        let acc = self.state.remove(key);
        if let (Some(acc), None) = (acc, err) {
            let mut b = TableBuilder::new(key.clone(), out.allocator());
            b.add_key_columns()?;
            let col = b.add_column(self.column.clone(), self.func.output_type())?;
            for (i, v) in key.values().iter().enumerate() {
                b.append_value(i, v.clone())?;
            }
            b.append_value(col, acc.result(self.func))?;
            out.emit(b.seal()?);
        }
        out.finish(key.clone(), err.cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_accumulator_reads_as_null_except_count() {
        let acc = Acc::default();
        assert_eq!(acc.result(AggFn::Count), Value::Int(0));
        assert!(acc.result(AggFn::Mean).is_null());

        let mut acc = Acc::default();
        for v in [3.0, 1.0, 2.0] {
            acc.add(v);
        }
        assert_eq!(acc.result(AggFn::Mean), Value::Float(2.0));
        assert_eq!(acc.result(AggFn::Min), Value::Float(1.0));
        assert_eq!(acc.result(AggFn::Max), Value::Float(3.0));
    }
}
