//! Fixed-width survey extraction: parse a Stata `.dct` dictionary, stream a
//! multi-line-record flat file into Arrow tables, and left-join the result
//! onto an existing analytic table.

pub mod config;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod reshape;
pub mod schema;
pub mod table;

pub use config::Config;
pub use error::ExtractError;
pub use merge::{merge_tables, CollisionRule, MergePolicy, MergeSummary};
pub use pipeline::{run_extract, ExtractJob, ExtractRun, MergeStep};
pub use process::{extract_file, extract_reader, ExtractOptions, ExtractionSummary};
pub use report::{write_coverage, Coverage};
pub use reshape::{reshape_long, PanelSpec, ReshapeMode};
pub use schema::{build_schema, load_dictionary, FieldSelection, FieldSpec, WidthPolicy};
pub use table::{read_table, write_table, Table};
