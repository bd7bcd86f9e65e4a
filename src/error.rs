// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions that abort a run. Everything recoverable (bad dictionary
/// lines, undecodable cells, dangling records) is absorbed where it happens.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("dictionary not found: {}", .0.display())]
    DictionaryNotFound(PathBuf),

    #[error("flat data file not found: {}", .0.display())]
    DataNotFound(PathBuf),

    #[error("canonical table not found: {}", .0.display())]
    CanonicalNotFound(PathBuf),

    #[error("lines per record unknown: not configured and the dictionary has no _lines() directive")]
    UnknownRecordLength,

    #[error("{side} table has no identifier column `{column}`")]
    MissingIdentifier { side: &'static str, column: String },

    #[error("extracted table has {count} duplicate identifier(s), e.g. {examples:?}")]
    DuplicateIdentifiers { count: usize, examples: Vec<String> },

    #[error("column collision on {columns:?} and the merge policy is `fail`")]
    ColumnCollision { columns: Vec<String> },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
