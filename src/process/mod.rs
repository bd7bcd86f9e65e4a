// src/process/mod.rs
pub mod decode;
pub mod extractor;

pub use decode::{decode_field, DecodePolicy, Encoding, SentinelSet, TextBlankPolicy, Value};
pub use extractor::{ExtractedRow, RecordExtractor};

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};
use tracing::instrument;

use crate::{
    error::ExtractError,
    schema::{build_arrow_schema, FieldSpec},
    table::{MemorySink, Table, TableSink},
};

/// Everything the extractor needs besides the fields themselves.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Physical lines that make up one subject's record.
    pub lines_per_record: usize,
    /// Rows per Arrow batch handed to the sink.
    pub batch_rows: usize,
    /// Log progress every N records; 0 disables.
    pub progress_every: usize,
    pub decode: DecodePolicy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            lines_per_record: 1,
            batch_rows: 8192,
            progress_every: 1000,
            decode: DecodePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Complete records decoded into rows.
    pub records: u64,
    /// Physical lines read.
    pub lines: u64,
    /// Lines of an incomplete final record that were discarded.
    pub dangling_lines: usize,
}

/// Stream every line of `reader` through a [`RecordExtractor`].
pub fn extract_reader<R: BufRead, S: TableSink>(
    mut reader: R,
    fields: &[FieldSpec],
    options: &ExtractOptions,
    sink: S,
) -> Result<(ExtractionSummary, S)> {
    let mut extractor = RecordExtractor::new(fields.to_vec(), options.clone(), sink)?;
    let mut line = Vec::with_capacity(4096);
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .context("reading flat data file")?;
        if n == 0 {
            break; // EOF
        }
        extractor.feed_line(&line)?;
    }
    extractor.finish()
}

/// Extract from a flat file on disk. A missing file is fatal before any
/// row is produced.
#[instrument(level = "info", skip(data_path, fields, options, sink), fields(path = %data_path.as_ref().display(), fields = fields.len()))]
pub fn extract_file<P: AsRef<Path>, S: TableSink>(
    data_path: P,
    fields: &[FieldSpec],
    options: &ExtractOptions,
    sink: S,
) -> Result<(ExtractionSummary, S)> {
    let path = data_path.as_ref();
    if !path.is_file() {
        return Err(ExtractError::DataNotFound(path.to_path_buf()).into());
    }
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    extract_reader(BufReader::with_capacity(1 << 20, file), fields, options, sink)
}

/// Extract into an in-memory table.
pub fn extract_to_table<R: BufRead>(
    reader: R,
    fields: &[FieldSpec],
    options: &ExtractOptions,
) -> Result<(ExtractionSummary, Table)> {
    let sink = MemorySink::new(build_arrow_schema(fields));
    let (summary, sink) = extract_reader(reader, fields, options, sink)?;
    Ok((summary, sink.into_table()))
}
