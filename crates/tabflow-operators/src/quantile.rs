//! Quantile estimation from cumulative histogram buckets.
//!
//! Each input row is one bucket: an upper bound and the cumulative count of
//! observations at or below it. At finish the buckets of a key are sorted by
//! bound and the quantile is linearly interpolated between the two buckets
//! that straddle the target rank.

use std::collections::HashMap;

use serde::Deserialize;
use tabflow_core::group_key::GroupKey;
use tabflow_core::schema::ColumnType;
use tabflow_core::types::Value;
use tabflow_table::{Table, TableBuilder};

use crate::message::Emitter;
use crate::registry::parse_params;
use crate::traits::{OpError, Port, Transformation};

fn default_count_column() -> String {
    "_value".to_string()
}

fn default_upper_bound_column() -> String {
    "le".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuantileParams {
    quantile: f64,
    #[serde(default = "default_count_column")]
    count_column: String,
    #[serde(default = "default_upper_bound_column")]
    upper_bound_column: String,
    #[serde(default = "default_count_column")]
    value_column: String,
    #[serde(default)]
    min_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub count: f64,
}

/// Interpolated value at quantile `q`. `None` when there are no buckets.
pub fn histogram_quantile(
    q: f64,
    mut buckets: Vec<Bucket>,
    min_value: f64,
) -> Result<Option<f64>, OpError> {
    if buckets.is_empty() {
        return Ok(None);
    }
    buckets.sort_by(|a, b| a.upper_bound.total_cmp(&b.upper_bound));
    if buckets.windows(2).any(|w| w[1].count < w[0].count) {
        return Err(OpError::Exec(
            "histogram bucket counts are not monotonically increasing".into(),
        ));
    }

    let last = buckets.len() - 1;
    let rank = q * buckets[last].count;
    let rank_idx = buckets.iter().rposition(|b| rank >= b.count);

    let (lower, upper) = match rank_idx {
        None => (
            Bucket {
                upper_bound: min_value,
                count: 0.0,
            },
            buckets[0],
        ),
        Some(i) if i == last => return Ok(Some(buckets[last].upper_bound)),
        Some(i) => (buckets[i], buckets[i + 1]),
    };

    if rank == lower.count {
        return Ok(Some(lower.upper_bound));
    }
    if lower.upper_bound.is_infinite() {
        return Ok(Some(upper.upper_bound));
    }
    if upper.upper_bound.is_infinite() {
        return Ok(Some(lower.upper_bound));
    }
    let span = upper.upper_bound - lower.upper_bound;
    let frac = (rank - lower.count) / (upper.count - lower.count);
    Ok(Some(lower.upper_bound + span * frac))
}

#[derive(Debug)]
pub struct HistogramQuantile {
    quantile: f64,
    count_column: String,
    upper_bound_column: String,
    value_column: String,
    min_value: f64,
    buckets: HashMap<GroupKey, Vec<Bucket>>,
}

impl HistogramQuantile {
    pub fn new(quantile: f64) -> Result<Self, OpError> {
        if !(0.0..=1.0).contains(&quantile) {
            return Err(OpError::Plan(format!(
                "histogram_quantile: quantile must be in [0, 1], got {quantile}"
            )));
        }
        Ok(Self {
            quantile,
            count_column: default_count_column(),
            upper_bound_column: default_upper_bound_column(),
            value_column: default_count_column(),
            min_value: 0.0,
            buckets: HashMap::new(),
        })
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: QuantileParams = parse_params("histogram_quantile", params)?;
        let mut op = Self::new(p.quantile)?;
        op.count_column = p.count_column;
        op.upper_bound_column = p.upper_bound_column;
        op.value_column = p.value_column;
        op.min_value = p.min_value;
        Ok(op)
    }
}

fn numeric(v: Value, column: &str) -> Result<f64, OpError> {
    v.as_f64().ok_or_else(|| {
        OpError::Exec(format!(
            "histogram_quantile: column '{column}' must hold non-null numbers"
        ))
    })
}

impl Transformation for HistogramQuantile {
    fn name(&self) -> &'static str {
        "histogram_quantile"
    }

    fn process(&mut self, _port: Port, mut table: Table, _out: &mut Emitter) -> Result<(), OpError> {
        let key = table.key().clone();
        let (count_col, bound_col) = (&self.count_column, &self.upper_bound_column);

        let rows = table.read(|view| -> Result<Vec<Bucket>, OpError> {
            let counts = view.column_by_name(count_col)?;
            let bounds = view.column_by_name(bound_col)?;
            (0..view.num_rows())
                .map(|r| {
                    Ok(Bucket {
                        upper_bound: numeric(bounds.value(r), bound_col)?,
                        count: numeric(counts.value(r), count_col)?,
                    })
                })
                .collect()
        })??;

        self.buckets.entry(key).or_default().extend(rows);
        Ok(())
    }

    fn finish(
        &mut self,
        _port: Port,
        key: &GroupKey,
        err: Option<&OpError>,
        out: &mut Emitter,
    ) -> Result<(), OpError> {
        let buckets = self.buckets.remove(key);
        if let (Some(buckets), None) = (buckets, err) {
            let value = histogram_quantile(self.quantile, buckets, self.min_value)?;
            let mut b = TableBuilder::new(key.clone(), out.allocator());
            b.add_key_columns()?;
            let col = b.add_column(self.value_column.clone(), ColumnType::Float)?;
            for (i, v) in key.values().iter().enumerate() {
                b.append_value(i, v.clone())?;
            }
            b.append_value(col, value.map_or(Value::Null, Value::Float))?;
            out.emit(b.seal()?);
        }
        out.finish(key.clone(), err.cloned());
        Ok(())
    }
}
