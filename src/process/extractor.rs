use anyhow::{anyhow, Result};
use arrow::{
    array::{ArrayRef, Float64Builder, Int64Builder, StringBuilder},
    datatypes::SchemaRef,
    record_batch::RecordBatch,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    decode::{decode_field, Value},
    ExtractOptions, ExtractionSummary,
};
use crate::{
    schema::{build_arrow_schema, DeclaredType, FieldSpec},
    table::TableSink,
};

/// One decoded record, index-aligned with the schema's fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRow {
    pub values: Vec<Value>,
}

enum ColumnBuilder {
    Text(StringBuilder),
    Integer(Int64Builder),
    Real(Float64Builder),
}

impl ColumnBuilder {
    fn new(ty: DeclaredType, capacity: usize) -> Self {
        match ty {
            DeclaredType::Text => ColumnBuilder::Text(StringBuilder::with_capacity(capacity, capacity * 8)),
            DeclaredType::Integer => ColumnBuilder::Integer(Int64Builder::with_capacity(capacity)),
            DeclaredType::Real => ColumnBuilder::Real(Float64Builder::with_capacity(capacity)),
        }
    }

    fn append(&mut self, value: &Value) {
        match (self, value) {
            (ColumnBuilder::Text(b), Value::Text(s)) => b.append_value(s),
            (ColumnBuilder::Integer(b), Value::Integer(v)) => b.append_value(*v),
            (ColumnBuilder::Real(b), Value::Real(v)) => b.append_value(*v),
            (ColumnBuilder::Text(b), _) => b.append_null(),
            (ColumnBuilder::Integer(b), _) => b.append_null(),
            (ColumnBuilder::Real(b), _) => b.append_null(),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Text(b) => Arc::new(b.finish()),
            ColumnBuilder::Integer(b) => Arc::new(b.finish()),
            ColumnBuilder::Real(b) => Arc::new(b.finish()),
        }
    }
}

/// Groups physical lines into fixed-size records, decodes every field of
/// each complete record, and hands finished batches to a sink.
pub struct RecordExtractor<S: TableSink> {
    fields: Vec<FieldSpec>,
    options: ExtractOptions,
    schema: SchemaRef,

    /// Line slots reused across records; `filled` of them are current.
    buffer: Vec<Vec<u8>>,
    filled: usize,

    builders: Vec<ColumnBuilder>,
    pending_rows: usize,

    records: u64,
    lines: u64,
    sink: S,
}

impl<S: TableSink> RecordExtractor<S> {
    pub fn new(fields: Vec<FieldSpec>, options: ExtractOptions, sink: S) -> Result<Self> {
        if options.lines_per_record == 0 {
            return Err(anyhow!("lines per record must be positive"));
        }
        if options.batch_rows == 0 {
            return Err(anyhow!("batch size must be positive"));
        }
        if let Some(f) = fields.iter().find(|f| f.record_line > options.lines_per_record) {
            warn!(
                field = %f.name,
                record_line = f.record_line,
                lines_per_record = options.lines_per_record,
                "field lies beyond the record and will always be missing"
            );
        }

        let schema = build_arrow_schema(&fields);
        let builders = Self::fresh_builders(&fields, options.batch_rows);
        Ok(Self {
            buffer: vec![Vec::new(); options.lines_per_record],
            filled: 0,
            builders,
            pending_rows: 0,
            records: 0,
            lines: 0,
            schema,
            fields,
            options,
            sink,
        })
    }

    fn fresh_builders(fields: &[FieldSpec], capacity: usize) -> Vec<ColumnBuilder> {
        fields
            .iter()
            .map(|f| ColumnBuilder::new(f.declared_type, capacity))
            .collect()
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Feed one physical line; the trailing `\n` / `\r\n` is stripped.
    pub fn feed_line(&mut self, line: &[u8]) -> Result<()> {
        let line = strip_eol(line);
        let slot = &mut self.buffer[self.filled];
        slot.clear();
        slot.extend_from_slice(line);
        self.filled += 1;
        self.lines += 1;

        if self.filled == self.options.lines_per_record {
            let row = self.decode_current();
            self.filled = 0;
            self.push_row(&row)?;
        }
        Ok(())
    }

    fn decode_current(&self) -> ExtractedRow {
        let record = &self.buffer[..self.filled];
        ExtractedRow {
            values: self
                .fields
                .iter()
                .map(|f| decode_field(f, record, &self.options.decode))
                .collect(),
        }
    }

    fn push_row(&mut self, row: &ExtractedRow) -> Result<()> {
        for (builder, value) in self.builders.iter_mut().zip(&row.values) {
            builder.append(value);
        }
        self.pending_rows += 1;
        self.records += 1;

        if self.options.progress_every > 0 && self.records % self.options.progress_every as u64 == 0 {
            info!(records = self.records, lines = self.lines, "extracting");
        }
        if self.pending_rows >= self.options.batch_rows {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        let columns: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        let batch = if columns.is_empty() {
            // A schema with no fields still has rows.
            RecordBatch::try_new_with_options(
                self.schema.clone(),
                columns,
                &arrow::record_batch::RecordBatchOptions::new()
                    .with_row_count(Some(self.pending_rows)),
            )?
        } else {
            RecordBatch::try_new(self.schema.clone(), columns)?
        };
        debug!(rows = batch.num_rows(), "flushing batch");
        self.sink.write(&batch)?;
        self.pending_rows = 0;
        Ok(())
    }

    /// Flush the open batch, drop any incomplete trailing record, close the
    /// sink and hand it back.
    pub fn finish(mut self) -> Result<(ExtractionSummary, S)> {
        let dangling = self.filled;
        if dangling > 0 {
            warn!(
                dangling_lines = dangling,
                lines_per_record = self.options.lines_per_record,
                "discarding incomplete trailing record"
            );
        }
        self.flush_batch()?;
        self.sink.close()?;

        let summary = ExtractionSummary {
            records: self.records,
            lines: self.lines,
            dangling_lines: dangling,
        };
        info!(
            records = summary.records,
            lines = summary.lines,
            "extraction finished"
        );
        Ok((summary, self.sink))
    }
}

fn strip_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
