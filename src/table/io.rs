use anyhow::{anyhow, Context, Result};
use arrow::{
    csv::{reader::Format, ReaderBuilder},
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::{
    fs::File,
    io::{Seek, SeekFrom},
    path::Path,
    sync::Arc,
};
use tracing::{debug, instrument};

use super::Table;

const READ_BATCH_ROWS: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("csv") => Ok(TableFormat::Csv),
            Some("parquet") | Some("pq") => Ok(TableFormat::Parquet),
            _ => Err(anyhow!(
                "cannot tell table format of {:?}: expected .csv or .parquet",
                path
            )),
        }
    }
}

/// Read a whole CSV or Parquet table into memory.
#[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    let table = match TableFormat::from_path(path)? {
        TableFormat::Csv => read_csv(path)?,
        TableFormat::Parquet => read_parquet(path)?,
    };
    debug!(
        rows = table.num_rows(),
        cols = table.schema.fields().len(),
        "read table"
    );
    Ok(table)
}

/// Column types are inferred from every row so a late non-numeric value
/// cannot break the read. All-empty columns become nullable Utf8.
fn read_csv(path: &Path) -> Result<Table> {
    let mut file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let (inferred, _) = Format::default()
        .with_header(true)
        .infer_schema(&mut file, None)
        .with_context(|| format!("inferring CSV schema of {:?}", path))?;
    file.seek(SeekFrom::Start(0))?;

    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|f| match f.data_type() {
            DataType::Null => Field::new(f.name(), DataType::Utf8, true),
            _ => f.as_ref().clone().with_nullable(true),
        })
        .collect();
    let schema: SchemaRef = Arc::new(Schema::new(fields));

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_batch_size(READ_BATCH_ROWS)
        .build(file)
        .context("creating CSV reader")?;
    let batches = reader
        .collect::<Result<Vec<RecordBatch>, _>>()
        .with_context(|| format!("reading CSV {:?}", path))?;

    Ok(Table { schema, batches })
}

fn read_parquet(path: &Path) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata of {:?}", path))?;
    let schema = builder.schema().clone();
    let reader = builder.with_batch_size(READ_BATCH_ROWS).build()?;
    let batches = reader
        .collect::<Result<Vec<RecordBatch>, _>>()
        .with_context(|| format!("reading parquet {:?}", path))?;
    Ok(Table { schema, batches })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, StringArray};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn csv_types_are_inferred_over_the_whole_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("canon.csv");
        fs::write(&path, "childid,score,note,blank\n1001,1.5,a,\n1002,2,,\n1003,x,c,\n")?;

        let table = read_table(&path)?;
        let batch = table.concat()?;
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Utf8);
        assert_eq!(batch.schema().field(3).data_type(), &DataType::Utf8);

        let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.value(2), 1003);
        let notes = batch.column(2).as_any().downcast_ref::<StringArray>().unwrap();
        assert!(notes.is_null(1));
        Ok(())
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(TableFormat::from_path(Path::new("x.xlsx")).is_err());
        assert_eq!(
            TableFormat::from_path(Path::new("x.PARQUET")).unwrap(),
            TableFormat::Parquet
        );
    }
}
