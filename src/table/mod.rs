pub mod io;
pub mod sink;

pub use io::{read_table, TableFormat};
pub use sink::{write_table, FileSink, MemorySink, TableSink, Tee};

use anyhow::Result;
use arrow::{compute::concat_batches, datatypes::SchemaRef, record_batch::RecordBatch};

/// An Arrow table: one schema, any number of batches.
#[derive(Debug, Clone)]
pub struct Table {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl Table {
    pub fn from_batch(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect()
    }

    /// Exact name first, then a case-insensitive match.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.schema.index_of(name).ok().or_else(|| {
            self.schema
                .fields()
                .iter()
                .position(|f| f.name().eq_ignore_ascii_case(name))
        })
    }

    /// All batches as one.
    pub fn concat(&self) -> Result<RecordBatch> {
        Ok(concat_batches(&self.schema, &self.batches)?)
    }
}
