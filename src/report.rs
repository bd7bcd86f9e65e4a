// src/report.rs
use anyhow::{Context, Result};
use arrow::array::Array;
use chrono::Utc;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};
use tracing::info;

use crate::table::Table;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCoverage {
    pub name: String,
    pub non_missing: usize,
    /// 0.0 ..= 100.0; 0.0 for an empty table.
    pub percent: f64,
}

/// Row count, column count, and how complete each column is.
#[derive(Debug, Clone, PartialEq)]
pub struct Coverage {
    pub rows: usize,
    /// Sorted by column name.
    pub columns: Vec<ColumnCoverage>,
}

impl Coverage {
    pub fn of(table: &Table) -> Self {
        let rows = table.num_rows();
        let mut columns: Vec<ColumnCoverage> = table
            .schema
            .fields()
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let nulls: usize = table.batches.iter().map(|b| b.column(i).null_count()).sum();
                let non_missing = rows - nulls;
                let percent = if rows == 0 {
                    0.0
                } else {
                    non_missing as f64 * 100.0 / rows as f64
                };
                ColumnCoverage {
                    name: f.name().clone(),
                    non_missing,
                    percent,
                }
            })
            .collect();
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        Self { rows, columns }
    }

    pub fn render<W: Write>(&self, out: &mut W, title: &str, not_found: &[String]) -> Result<()> {
        let rule = "=".repeat(60);
        writeln!(out, "{}", title)?;
        writeln!(out, "{}", rule)?;
        writeln!(out, "Generated: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(out)?;
        writeln!(out, "Total variables: {}", self.columns.len())?;
        writeln!(out, "Total observations: {}", self.rows)?;
        writeln!(out)?;
        writeln!(out, "ALL VARIABLES:")?;
        writeln!(out, "{}", "-".repeat(30))?;
        for c in &self.columns {
            writeln!(
                out,
                "{:<30} ({} values, {:.1}% complete)",
                c.name, c.non_missing, c.percent
            )?;
        }
        if !not_found.is_empty() {
            writeln!(out)?;
            writeln!(out, "REQUESTED BUT NOT IN DICTIONARY ({}):", not_found.len())?;
            writeln!(out, "{}", "-".repeat(30))?;
            for name in not_found {
                writeln!(out, "{}", name)?;
            }
        }
        Ok(())
    }
}

/// Write the plain-text coverage report for `table` to `path`.
pub fn write_coverage<P: AsRef<Path>>(
    path: P,
    title: &str,
    table: &Table,
    not_found: &[String],
) -> Result<Coverage> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;
    }
    let coverage = Coverage::of(table);
    let file = File::create(path).with_context(|| format!("creating report {:?}", path))?;
    let mut out = BufWriter::new(file);
    coverage.render(&mut out, title, not_found)?;
    out.flush()?;
    info!(path = %path.display(), columns = coverage.columns.len(), "wrote coverage report");
    Ok(coverage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{ArrayRef, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };
    use std::sync::Arc;
    use tempfile::tempdir;

    fn table() -> Table {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ZED", DataType::Int64, true),
            Field::new("ALPHA", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(1), None, Some(3), None])) as ArrayRef,
                Arc::new(StringArray::from(vec![Some("a"), Some("b"), Some("c"), Some("d")]))
                    as ArrayRef,
            ],
        )
        .unwrap();
        Table::from_batch(batch)
    }

    #[test]
    fn counts_and_sorts_columns() {
        let cov = Coverage::of(&table());
        assert_eq!(cov.rows, 4);
        assert_eq!(cov.columns[0].name, "ALPHA");
        assert_eq!(cov.columns[0].non_missing, 4);
        assert_eq!(cov.columns[1].non_missing, 2);
        assert!((cov.columns[1].percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn report_lists_missing_fields() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("out/report.txt");
        write_coverage(&path, "EXTRACTED VARIABLES", &table(), &["P1FOOD".to_string()])?;
        let text = fs::read_to_string(&path)?;
        assert!(text.starts_with("EXTRACTED VARIABLES\n"));
        assert!(text.contains("Total observations: 4"));
        assert!(text.contains("(2 values, 50.0% complete)"));
        assert!(text.contains("REQUESTED BUT NOT IN DICTIONARY (1):\n"));
        assert!(text.trim_end().ends_with("P1FOOD"));
        Ok(())
    }
}
