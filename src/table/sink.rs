use anyhow::{anyhow, Context, Result};
use arrow::{csv::WriterBuilder, datatypes::SchemaRef, record_batch::RecordBatch};
use parquet::{
    arrow::ArrowWriter,
    basic::{BrotliLevel, Compression},
    file::properties::WriterProperties,
};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use super::{io::TableFormat, Table};

/// Destination for record batches as they are produced.
pub trait TableSink {
    fn write(&mut self, batch: &RecordBatch) -> Result<()>;
    /// Called once after the last batch.
    fn close(&mut self) -> Result<()>;
}

impl<T: TableSink + ?Sized> TableSink for &mut T {
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        (**self).write(batch)
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Keeps every batch in memory.
#[derive(Debug)]
pub struct MemorySink {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl MemorySink {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    pub fn into_table(self) -> Table {
        Table {
            schema: self.schema,
            batches: self.batches,
        }
    }
}

impl TableSink for MemorySink {
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.batches.push(batch.clone());
        Ok(())
    }
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sends every batch to both sinks.
pub struct Tee<A, B>(pub A, pub B);

impl<A: TableSink, B: TableSink> TableSink for Tee<A, B> {
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.0.write(batch)?;
        self.1.write(batch)
    }
    fn close(&mut self) -> Result<()> {
        self.0.close()?;
        self.1.close()
    }
}

enum FileWriter {
    Csv(arrow::csv::Writer<BufWriter<File>>),
    Parquet(ArrowWriter<File>),
}

/// Writes a CSV or Parquet file through a hidden tmp file that is renamed
/// into place on `close`. Dropping an unclosed sink removes the tmp file,
/// so a failed run leaves no partial output behind.
pub struct FileSink {
    schema: SchemaRef,
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<FileWriter>,
    rows: usize,
}

impl FileSink {
    pub fn create(path: &Path, schema: SchemaRef) -> Result<Self> {
        let format = TableFormat::from_path(path)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("output path {:?} has no file name", path))?
            .to_string_lossy()
            .into_owned();
        let tmp_path = dir.join(format!(".{}.tmp", file_name));

        let file =
            File::create(&tmp_path).with_context(|| format!("creating file {:?}", tmp_path))?;
        let writer = match format {
            TableFormat::Csv => FileWriter::Csv(
                WriterBuilder::new()
                    .with_header(true)
                    .build(BufWriter::new(file)),
            ),
            TableFormat::Parquet => {
                let props = WriterProperties::builder()
                    .set_compression(Compression::BROTLI(BrotliLevel::try_new(5)?))
                    .build();
                FileWriter::Parquet(
                    ArrowWriter::try_new(file, schema.clone(), Some(props))
                        .context("creating parquet writer")?,
                )
            }
        };

        Ok(Self {
            schema,
            final_path: path.to_path_buf(),
            tmp_path,
            writer: Some(writer),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.final_path
    }
}

impl TableSink for FileSink {
    fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("write after close on {:?}", self.final_path))?;
        match writer {
            FileWriter::Csv(w) => w.write(batch).context("writing CSV batch")?,
            FileWriter::Parquet(w) => w.write(batch).context("writing parquet batch")?,
        }
        self.rows += batch.num_rows();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // CSV headers are only emitted with the first batch.
        if self.rows == 0 {
            let empty = RecordBatch::new_empty(self.schema.clone());
            self.write(&empty)?;
        }
        match self.writer.take() {
            Some(FileWriter::Csv(w)) => {
                let mut inner = w.into_inner();
                inner.flush().context("flushing CSV")?;
            }
            Some(FileWriter::Parquet(w)) => {
                w.close().context("closing parquet writer")?;
            }
            None => return Ok(()),
        }
        fs::rename(&self.tmp_path, &self.final_path).with_context(|| {
            format!("renaming {:?} -> {:?}", self.tmp_path, self.final_path)
        })?;
        debug!(rows = self.rows, path = %self.final_path.display(), "table written");
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.tmp_path) {
                warn!("failed to remove {:?}: {}", self.tmp_path, e);
            }
        }
    }
}

/// Write a whole in-memory table to `path`.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    let mut sink = FileSink::create(path, table.schema.clone())?;
    for batch in &table.batches {
        sink.write(batch)?;
    }
    sink.close()
}
