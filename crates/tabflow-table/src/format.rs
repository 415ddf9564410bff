//! Plain-text rendering of tables, for debugging and test failure output.

use std::fmt::Write;

use crate::error::Result;
use crate::table::Table;

/// Renders one table as a header line with its group key followed by an
/// aligned grid. Reading consumes the table.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableFormatter {
    max_rows: Option<usize>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after `n` rows and note how many were left out.
    pub fn max_rows(mut self, n: usize) -> Self {
        self.max_rows = Some(n);
        self
    }

    pub fn format(&self, table: &mut Table) -> Result<String> {
        let key = table.key().clone();
        let header: Vec<String> = table
            .schema()
            .columns
            .iter()
            .map(|c| format!("{}:{}", c.name, c.ty))
            .collect();
        let limit = self.max_rows;

        let (cells, total) = table.read(|view| {
            let shown = limit.map_or(view.num_rows(), |n| n.min(view.num_rows()));
            let cells: Vec<Vec<String>> = (0..shown)
                .map(|r| view.row(r).iter().map(|v| v.to_string()).collect())
                .collect();
            (cells, view.num_rows())
        })?;

        let mut widths: Vec<usize> = header.iter().map(String::len).collect();
        for row in &cells {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.len());
            }
        }

        let mut out = String::new();
        let _ = writeln!(out, "Table: keys: {key}");
        write_line(&mut out, &header, &widths);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_line(&mut out, &rule, &widths);
        for row in &cells {
            write_line(&mut out, row, &widths);
        }
        if total > cells.len() {
            let _ = writeln!(out, "... {} more rows", total - cells.len());
        }
        Ok(out)
    }
}

fn write_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{c:>w$}"))
        .collect();
    let _ = writeln!(out, "{}", line.join("  ").trim_end());
}

#[cfg(test)]
mod tests {
    use tabflow_core::group_key::GroupKey;
    use tabflow_core::schema::{ColumnMeta, ColumnSchema, ColumnType};
    use tabflow_core::types::Value;
    use tabflow_mem::Allocator;

    use super::*;
    use crate::builder::TableBuilder;

    #[test]
    fn renders_key_header_and_rows() {
        let alloc = Allocator::unlimited();
        let key = GroupKey::new(vec![(
            ColumnMeta::new("host", ColumnType::String),
            Value::from("a"),
        )])
        .unwrap();
        let schema = ColumnSchema::new(vec![
            ColumnMeta::new("host", ColumnType::String),
            ColumnMeta::new("v", ColumnType::Int),
        ]);
        let rows = (0..3).map(|i| vec![Value::from("a"), Value::Int(i * 100)]);
        let mut t = TableBuilder::from_rows(key, &schema, rows, &alloc).unwrap();

        let text = TableFormatter::new().max_rows(2).format(&mut t).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Table: keys: {host=a}");
        assert_eq!(lines[1], "host:string  v:int");
        assert_eq!(lines[3], "          a      0");
        assert_eq!(lines[5], "... 1 more rows");
        assert!(t.is_consumed());
    }
}
