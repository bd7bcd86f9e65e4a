// src/config.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::debug;

use crate::{
    error::ExtractError,
    merge::MergePolicy,
    process::{
        decode::{Encoding, SentinelSpec, TextBlankPolicy},
        DecodePolicy, ExtractOptions,
    },
    schema::{Dictionary, WidthPolicy},
};

/// Run settings. Every field has a default, so an empty YAML document is a
/// valid config.
///
/// ```yaml
/// lines_per_record: 27
/// width: {policy: next_column, last_width: 20}
/// sentinels: minimal        # or broad, or [-9, -1]
/// text_blank: missing
/// encoding: latin1
/// batch_rows: 8192
/// progress_every: 1000
/// merge: {on_collision: suffix, suffix: _dct}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Falls back to the dictionary's `_lines(N)` when unset.
    pub lines_per_record: Option<usize>,
    pub width: WidthPolicy,
    pub sentinels: SentinelSpec,
    pub text_blank: TextBlankPolicy,
    pub encoding: Encoding,
    pub batch_rows: usize,
    pub progress_every: usize,
    pub merge: MergePolicy,
}

impl Default for Config {
    fn default() -> Self {
        let options = ExtractOptions::default();
        Self {
            lines_per_record: None,
            width: WidthPolicy::default(),
            sentinels: SentinelSpec::default(),
            text_blank: TextBlankPolicy::default(),
            encoding: Encoding::default(),
            batch_rows: options.batch_rows,
            progress_every: options.progress_every,
            merge: MergePolicy::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
        let config: Config =
            serde_yaml::from_str(&text).with_context(|| format!("parsing config {:?}", path))?;
        debug!(?config, "loaded config");
        Ok(config)
    }

    /// `load` when a path is given, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ExtractError> {
        if self.lines_per_record == Some(0) {
            return Err(ExtractError::InvalidConfig(
                "lines_per_record must be positive".into(),
            ));
        }
        if !self.width.widths_are_positive() {
            return Err(ExtractError::InvalidConfig("widths must be positive".into()));
        }
        if self.batch_rows == 0 {
            return Err(ExtractError::InvalidConfig("batch_rows must be positive".into()));
        }
        if let SentinelSpec::Codes(codes) = &self.sentinels {
            if codes.is_empty() {
                return Err(ExtractError::InvalidConfig(
                    "sentinel list is empty; use a preset instead".into(),
                ));
            }
        }
        Ok(())
    }

    /// Configured record length first, then the dictionary's declaration.
    pub fn record_length(&self, dict: &Dictionary) -> Result<usize, ExtractError> {
        self.lines_per_record
            .or(dict.lines_per_record)
            .filter(|&n| n > 0)
            .ok_or(ExtractError::UnknownRecordLength)
    }

    pub fn decode_policy(&self) -> DecodePolicy {
        DecodePolicy {
            sentinels: (&self.sentinels).into(),
            text_blank: self.text_blank,
            encoding: self.encoding,
        }
    }

    pub fn extract_options(&self, lines_per_record: usize) -> ExtractOptions {
        ExtractOptions {
            lines_per_record,
            batch_rows: self.batch_rows,
            progress_every: self.progress_every,
            decode: self.decode_policy(),
        }
    }
}
