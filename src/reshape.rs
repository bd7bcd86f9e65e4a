// src/reshape.rs
//! Wide → long panel reshape: one row per subject per wave.

use anyhow::{Context, Result};
use arrow::{
    array::{new_null_array, ArrayRef, Int64Array},
    compute::cast,
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, sync::Arc};
use tracing::{info, instrument, warn};

use crate::{error::ExtractError, table::Table};

pub const WAVE_COLUMN: &str = "wave";

/// Which variables make it into the long table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReshapeMode {
    /// Present in at least one wave.
    #[default]
    Flexible,
    /// Present in every wave.
    Complete,
}

/// Panel layout, usually read from YAML:
///
/// ```yaml
/// id_columns: [childid, CHILDID]
/// waves: [2, 4, 9]
/// variables:
///   math_score: {2: x2mscalk5, 4: x4mscalk5, 9: x9mscalk5}
///   weight_parent: {2: W2P0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSpec {
    /// Time-invariant columns repeated on every wave's row.
    #[serde(alias = "baseline")]
    pub id_columns: Vec<String>,
    pub waves: Vec<i64>,
    /// long name → wave → wide column.
    pub variables: BTreeMap<String, BTreeMap<i64, String>>,
}

impl PanelSpec {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading panel spec {:?}", path))?;
        let spec: PanelSpec = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing panel spec {:?}", path))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.waves.is_empty() {
            return Err(ExtractError::InvalidConfig("panel spec lists no waves".into()).into());
        }
        for name in self.variables.keys() {
            if name == WAVE_COLUMN || self.id_columns.iter().any(|c| c == name) {
                return Err(ExtractError::InvalidConfig(format!(
                    "variable `{}` clashes with an id column or `{}`",
                    name, WAVE_COLUMN
                ))
                .into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReshapeSummary {
    pub subjects: usize,
    pub waves: usize,
    pub kept: Vec<String>,
    /// Variables left out because of the mode.
    pub dropped: Vec<String>,
    /// `(variable, wave, column)` mappings whose wide column does not exist.
    pub absent: Vec<(String, i64, String)>,
}

struct Resolved<'a> {
    name: &'a str,
    data_type: DataType,
    /// Column index per wave, aligned with `PanelSpec::waves`.
    sources: Vec<Option<usize>>,
}

/// Stack one copy of the id columns per wave and line up each variable's
/// wave-specific column under its long name.
#[instrument(level = "info", skip_all, fields(waves = spec.waves.len(), variables = spec.variables.len(), mode = ?mode))]
pub fn reshape_long(
    wide: &Table,
    spec: &PanelSpec,
    mode: ReshapeMode,
) -> Result<(Table, ReshapeSummary)> {
    spec.validate()?;
    let batch = wide.concat()?;
    let schema = batch.schema();
    let subjects = batch.num_rows();
    let mut summary = ReshapeSummary {
        subjects,
        waves: spec.waves.len(),
        ..Default::default()
    };

    let id_columns: Vec<usize> = spec
        .id_columns
        .iter()
        .filter_map(|name| {
            let idx = wide.find_column(name);
            if idx.is_none() {
                warn!(column = %name, "id column not in the wide table, skipping");
            }
            idx
        })
        .collect();

    let mut resolved: Vec<Resolved<'_>> = Vec::new();
    for (name, by_wave) in &spec.variables {
        let sources: Vec<Option<usize>> = spec
            .waves
            .iter()
            .map(|wave| {
                let column = by_wave.get(wave)?;
                let idx = wide.find_column(column);
                if idx.is_none() {
                    summary.absent.push((name.clone(), *wave, column.clone()));
                }
                idx
            })
            .collect();
        let present = sources.iter().flatten().count();
        let keep = match mode {
            ReshapeMode::Flexible => present > 0,
            ReshapeMode::Complete => present == spec.waves.len(),
        };
        match sources.iter().flatten().next() {
            Some(&first) if keep => {
                resolved.push(Resolved {
                    name,
                    data_type: schema.field(first).data_type().clone(),
                    sources,
                });
                summary.kept.push(name.clone());
            }
            _ => summary.dropped.push(name.clone()),
        }
    }
    if !summary.absent.is_empty() {
        warn!(mappings = summary.absent.len(), "some wave columns are not in the wide table");
    }

    let mut fields: Vec<Field> = id_columns
        .iter()
        .map(|&i| schema.field(i).clone().with_nullable(true))
        .collect();
    fields.push(Field::new(WAVE_COLUMN, DataType::Int64, false));
    fields.extend(
        resolved
            .iter()
            .map(|v| Field::new(v.name, v.data_type.clone(), true)),
    );
    let out_schema = Arc::new(Schema::new(fields));

    let mut batches = Vec::with_capacity(spec.waves.len());
    for (w, wave) in spec.waves.iter().enumerate() {
        let mut columns: Vec<ArrayRef> = id_columns.iter().map(|&i| batch.column(i).clone()).collect();
        columns.push(Arc::new(Int64Array::from(vec![*wave; subjects])));
        for v in &resolved {
            let col = match v.sources[w] {
                Some(i) => cast(batch.column(i), &v.data_type).with_context(|| {
                    format!(
                        "casting {} for `{}` wave {} to {}",
                        schema.field(i).name(),
                        v.name,
                        wave,
                        v.data_type
                    )
                })?,
                None => new_null_array(&v.data_type, subjects),
            };
            columns.push(col);
        }
        batches.push(RecordBatch::try_new(out_schema.clone(), columns)?);
    }

    info!(
        subjects,
        waves = spec.waves.len(),
        kept = summary.kept.len(),
        dropped = summary.dropped.len(),
        "reshaped to long"
    );
    Ok((
        Table {
            schema: out_schema,
            batches,
        },
        summary,
    ))
}
