//! Filter operator with simple predicate evaluation.
//!
//! Supports expressions of the form: "col OP literal" where OP ∈ {==, !=, <, <=, >, >=}

use std::cmp::Ordering;

use serde::Deserialize;
use tabflow_core::group_key::GroupKey;
use tabflow_core::types::Value;
use tabflow_table::{Table, TableBuilder};

use crate::copy::copy_rows;
use crate::message::Emitter;
use crate::registry::parse_params;
use crate::traits::{OpError, Port, Transformation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnEmpty {
    /// Tables left without rows are not emitted.
    #[default]
    Drop,
    /// Tables left without rows are emitted empty.
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: CmpOp,
    pub literal: String,
}

impl Predicate {
    /// Parse a simple predicate like "age > 18" or "name == Alice".
    pub fn parse(expr: &str) -> Result<Self, OpError> {
        // Two-char operators first so "<=" is not read as "<".
        let ops = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
        ];
        for (tok, op) in ops {
            if let Some(pos) = expr.find(tok) {
                let column = expr[..pos].trim().to_string();
                let literal = expr[pos + tok.len()..].trim().to_string();
                if column.is_empty() || literal.is_empty() {
                    break;
                }
                return Ok(Self {
                    column,
                    op,
                    literal,
                });
            }
        }
        Err(OpError::Plan(format!("unparseable predicate: {expr}")))
    }

    /// Null never matches.
    fn eval(&self, value: &Value, literal: &Value) -> bool {
        !value.is_null() && self.op.holds(value.total_cmp(literal))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterParams {
    expr: String,
    #[serde(default)]
    on_empty: OnEmpty,
}

#[derive(Debug)]
pub struct Filter {
    predicate: Predicate,
    on_empty: OnEmpty,
}

impl Filter {
    pub fn new(predicate: Predicate, on_empty: OnEmpty) -> Self {
        Self {
            predicate,
            on_empty,
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: FilterParams = parse_params("filter", params)?;
        Ok(Self::new(Predicate::parse(&p.expr)?, p.on_empty))
    }
}

impl Transformation for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn process(&mut self, _port: Port, mut table: Table, out: &mut Emitter) -> Result<(), OpError> {
        let pred = &self.predicate;
        let schema = table.schema().clone();
        let col_idx = schema
            .index_of(&pred.column)
            .ok_or_else(|| OpError::Exec(format!("column '{}' not found", pred.column)))?;
        let ty = schema.columns[col_idx].ty;
        let literal = Value::parse_as(ty, &pred.literal).ok_or_else(|| {
            OpError::Exec(format!("cannot parse '{}' as {ty}", pred.literal))
        })?;

        let alloc = out.allocator().clone();
        let built = table.read(|view| -> Result<Option<Table>, OpError> {
            let col = view.column_by_name(&pred.column)?;
            let keep: Vec<usize> = (0..view.num_rows())
                .filter(|&r| pred.eval(&col.value(r), &literal))
                .collect();
            if keep.is_empty() && self.on_empty == OnEmpty::Drop {
                return Ok(None);
            }
            let mut b = TableBuilder::with_schema(view.key().clone(), &schema, &alloc)?;
            b.reserve(keep.len())?;
            let mapping: Vec<(usize, usize)> = (0..schema.len()).map(|i| (i, i)).collect();
            copy_rows(view, &mut b, &mapping, keep)?;
            Ok(Some(b.seal()?))
        })??;

        if let Some(t) = built {
            out.emit(t);
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
        out.finish(key.clone(), err.cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_char_operators_first() {
        let p = Predicate::parse("age >= 18").unwrap();
        assert_eq!(p.column, "age");
        assert_eq!(p.op, CmpOp::Ge);
        assert_eq!(p.literal, "18");

        let p = Predicate::parse(r#"name != "x y""#).unwrap();
        assert_eq!(p.op, CmpOp::Ne);
        assert_eq!(p.literal, "\"x y\"");

        assert!(Predicate::parse("no operator").is_err());
        assert!(Predicate::parse("> 3").is_err());
    }

    #[test]
    fn null_never_matches() {
        let p = Predicate::parse("v != 1").unwrap();
        assert!(!p.eval(&Value::Null, &Value::Int(1)));
        assert!(p.eval(&Value::Int(2), &Value::Int(1)));
    }
}
