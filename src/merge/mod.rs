pub mod ident;

pub use ident::{normalize_cell, normalize_id};

use anyhow::Result;
use arrow::{
    array::{new_null_array, Array, ArrayRef, UInt32Array},
    compute::take,
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};
use tracing::{info, instrument, warn};

use crate::{error::ExtractError, table::Table};

/// What happens to an extracted column whose name the canonical table
/// already uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionRule {
    /// Drop it from the extracted side; canonical values win.
    #[default]
    PreferCanonical,
    /// Keep it under `name + suffix`.
    Suffix,
    /// Abort the merge.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergePolicy {
    pub on_collision: CollisionRule,
    /// Used by [`CollisionRule::Suffix`].
    pub suffix: String,
    /// Compare column names ignoring ASCII case.
    pub case_insensitive: bool,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            on_collision: CollisionRule::PreferCanonical,
            suffix: "_extracted".to_string(),
            case_insensitive: true,
        }
    }
}

impl MergePolicy {
    fn key(&self, name: &str) -> String {
        if self.case_insensitive {
            name.to_ascii_lowercase()
        } else {
            name.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub canonical_rows: usize,
    /// Canonical rows that found an extracted row.
    pub matched: usize,
    pub unmatched: usize,
    pub extracted_rows: usize,
    /// Extracted rows no canonical row asked for.
    pub unused_extracted: usize,
    /// Extracted rows without an identifier.
    pub extracted_without_id: usize,
    pub dropped_columns: Vec<String>,
    pub renamed_columns: Vec<(String, String)>,
}

/// Left outer join of `canonical` with `extracted` on normalized
/// identifiers, one-to-one on the extracted side.
///
/// The result has exactly the canonical rows, in order, followed by the
/// extracted columns that survive collision resolution. The extracted
/// identifier column is not carried over.
#[instrument(level = "info", skip_all, fields(canonical_id = %canonical_id, extracted_id = %extracted_id))]
pub fn merge_tables(
    canonical: &Table,
    canonical_id: &str,
    extracted: &Table,
    extracted_id: &str,
    policy: &MergePolicy,
) -> Result<(Table, MergeSummary)> {
    let c_idx = canonical
        .find_column(canonical_id)
        .ok_or_else(|| ExtractError::MissingIdentifier {
            side: "canonical",
            column: canonical_id.to_string(),
        })?;
    let e_idx = extracted
        .find_column(extracted_id)
        .ok_or_else(|| ExtractError::MissingIdentifier {
            side: "extracted",
            column: extracted_id.to_string(),
        })?;

    let cbatch = canonical.concat()?;
    let ebatch = extracted.concat()?;
    let mut summary = MergeSummary {
        canonical_rows: cbatch.num_rows(),
        extracted_rows: ebatch.num_rows(),
        ..Default::default()
    };

    // 1) extracted id → row, rejecting duplicates
    let e_ids = ebatch.column(e_idx);
    let mut index: HashMap<String, u32> = HashMap::with_capacity(ebatch.num_rows());
    let mut duplicates: BTreeSet<String> = BTreeSet::new();
    for row in 0..ebatch.num_rows() {
        match normalize_cell(e_ids.as_ref(), row) {
            Some(id) => {
                if index.insert(id.clone(), row as u32).is_some() {
                    duplicates.insert(id);
                }
            }
            None => summary.extracted_without_id += 1,
        }
    }
    if !duplicates.is_empty() {
        return Err(ExtractError::DuplicateIdentifiers {
            count: duplicates.len(),
            examples: duplicates.into_iter().take(5).collect(),
        }
        .into());
    }
    if summary.extracted_without_id > 0 {
        warn!(
            rows = summary.extracted_without_id,
            "extracted rows without an identifier cannot be joined"
        );
    }

    // 2) collisions
    let canonical_names: HashSet<String> = cbatch
        .schema()
        .fields()
        .iter()
        .map(|f| policy.key(f.name()))
        .collect();
    // Every output name: canonical ones plus extracted ones that pass through
    // unchanged. A suffixed rename must avoid all of them.
    let mut taken: HashSet<String> = canonical_names.clone();
    taken.extend(
        ebatch
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != e_idx)
            .map(|(_, f)| policy.key(f.name()))
            .filter(|k| !canonical_names.contains(k)),
    );
    let mut kept: Vec<(usize, String)> = Vec::new();
    let mut collisions: Vec<String> = Vec::new();
    for (j, field) in ebatch.schema().fields().iter().enumerate() {
        if j == e_idx {
            continue;
        }
        let name = field.name();
        if !canonical_names.contains(&policy.key(name)) {
            kept.push((j, name.clone()));
            continue;
        }
        match policy.on_collision {
            CollisionRule::PreferCanonical => summary.dropped_columns.push(name.clone()),
            CollisionRule::Fail => collisions.push(name.clone()),
            CollisionRule::Suffix => {
                let renamed = format!("{}{}", name, policy.suffix);
                if !taken.insert(policy.key(&renamed)) {
                    warn!(column = %name, renamed = %renamed, "suffixed name still collides, dropping");
                    summary.dropped_columns.push(name.clone());
                } else {
                    summary.renamed_columns.push((name.clone(), renamed.clone()));
                    kept.push((j, renamed));
                }
            }
        }
    }
    if !collisions.is_empty() {
        return Err(ExtractError::ColumnCollision {
            columns: collisions,
        }
        .into());
    }
    if !summary.dropped_columns.is_empty() {
        info!(
            columns = ?summary.dropped_columns,
            "dropping extracted columns already present in the canonical table"
        );
    }

    // 3) left join positions
    let c_ids = cbatch.column(c_idx);
    let mut seen_canonical: HashSet<String> = HashSet::new();
    let mut canonical_dupes = 0usize;
    let mut used: HashSet<u32> = HashSet::new();
    let positions: UInt32Array = (0..cbatch.num_rows())
        .map(|row| {
            let id = normalize_cell(c_ids.as_ref(), row)?;
            let pos = index.get(&id).copied();
            if !seen_canonical.insert(id) {
                canonical_dupes += 1;
            }
            if let Some(p) = pos {
                used.insert(p);
            }
            pos
        })
        .collect();
    summary.matched = positions.len() - positions.null_count();
    summary.unmatched = summary.canonical_rows - summary.matched;
    summary.unused_extracted = index.len() - used.len();
    if canonical_dupes > 0 {
        warn!(
            rows = canonical_dupes,
            "canonical table repeats identifiers; each row is kept"
        );
    }

    // 4) assemble
    let cschema = cbatch.schema();
    let eschema = ebatch.schema();
    let mut fields: Vec<Field> = cschema.fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut columns: Vec<ArrayRef> = cbatch.columns().to_vec();
    for (j, name) in &kept {
        let src = eschema.field(*j);
        let col = if summary.matched == 0 {
            new_null_array(src.data_type(), cbatch.num_rows())
        } else {
            take(ebatch.column(*j).as_ref(), &positions, None)?
        };
        fields.push(Field::new(name, src.data_type().clone(), true));
        columns.push(col);
    }
    let merged = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

    info!(
        canonical_rows = summary.canonical_rows,
        matched = summary.matched,
        unmatched = summary.unmatched,
        unused_extracted = summary.unused_extracted,
        columns = merged.num_columns(),
        "merge finished"
    );
    Ok((Table::from_batch(merged), summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray};

    fn canonical() -> Table {
        let schema = Arc::new(Schema::new(vec![
            Field::new("childid", arrow::datatypes::DataType::Int64, true),
            Field::new("x1kage", arrow::datatypes::DataType::Int64, true),
            Field::new("school", arrow::datatypes::DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1001, 1002, 1003, 1004])) as ArrayRef,
                Arc::new(Int64Array::from(vec![60, 61, 62, 63])) as ArrayRef,
                Arc::new(StringArray::from(vec!["a", "b", "c", "d"])) as ArrayRef,
            ],
        )
        .unwrap();
        Table::from_batch(batch)
    }

    fn extracted(ids: &[&str]) -> Table {
        let schema = Arc::new(Schema::new(vec![
            Field::new("CHILDID", arrow::datatypes::DataType::Utf8, true),
            Field::new("X1KAGE", arrow::datatypes::DataType::Int64, true),
            Field::new("W1C0", arrow::datatypes::DataType::Float64, true),
        ]));
        let n = ids.len();
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids.to_vec())) as ArrayRef,
                Arc::new(Int64Array::from(vec![99; n])) as ArrayRef,
                Arc::new(Float64Array::from(
                    (0..n).map(|i| i as f64 + 0.5).collect::<Vec<_>>(),
                )) as ArrayRef,
            ],
        )
        .unwrap();
        Table::from_batch(batch)
    }

    #[test]
    fn subset_keeps_canonical_rows_and_fills_nulls() -> Result<()> {
        let (merged, summary) = merge_tables(
            &canonical(),
            "childid",
            &extracted(&[" 1003", "0001001"]),
            "CHILDID",
            &MergePolicy::default(),
        )?;
        assert_eq!(merged.num_rows(), 4);
        assert_eq!(merged.column_names(), ["childid", "x1kage", "school", "W1C0"]);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.unmatched, 2);
        assert_eq!(summary.dropped_columns, ["X1KAGE"]);

        let batch = merged.concat()?;
        let ages = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ages.value(0), 60, "canonical values win");
        let w = batch.column(3).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(w.value(0), 1.5);
        assert!(w.is_null(1));
        assert_eq!(w.value(2), 0.5);
        assert!(w.is_null(3));
        Ok(())
    }

    #[test]
    fn duplicate_extracted_ids_are_rejected() {
        let err = merge_tables(
            &canonical(),
            "childid",
            &extracted(&["1001", "01001"]),
            "CHILDID",
            &MergePolicy::default(),
        )
        .unwrap_err();
        match err.downcast_ref::<ExtractError>() {
            Some(ExtractError::DuplicateIdentifiers { count, examples }) => {
                assert_eq!(*count, 1);
                assert_eq!(examples, &["1001"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn missing_identifier_column_is_fatal() {
        let err = merge_tables(
            &canonical(),
            "childid",
            &extracted(&["1001"]),
            "PARENTID",
            &MergePolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::MissingIdentifier { side: "extracted", .. })
        ));
    }

    #[test]
    fn suffix_and_fail_rules() -> Result<()> {
        let policy = MergePolicy {
            on_collision: CollisionRule::Suffix,
            ..Default::default()
        };
        let (merged, summary) =
            merge_tables(&canonical(), "childid", &extracted(&["1002"]), "CHILDID", &policy)?;
        assert_eq!(
            merged.column_names(),
            ["childid", "x1kage", "school", "X1KAGE_extracted", "W1C0"]
        );
        assert_eq!(summary.renamed_columns.len(), 1);

        let policy = MergePolicy {
            on_collision: CollisionRule::Fail,
            ..Default::default()
        };
        let err = merge_tables(&canonical(), "childid", &extracted(&["1002"]), "CHILDID", &policy)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::ColumnCollision { .. })
        ));
        Ok(())
    }

    #[test]
    fn suffixed_name_never_duplicates_an_output_column() -> Result<()> {
        let canonical = Table::from_batch(
            RecordBatch::try_new(
                Arc::new(Schema::new(vec![
                    Field::new("childid", arrow::datatypes::DataType::Int64, true),
                    Field::new("AGE", arrow::datatypes::DataType::Int64, true),
                ])),
                vec![
                    Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
                    Arc::new(Int64Array::from(vec![60, 61])) as ArrayRef,
                ],
            )
            .unwrap(),
        );
        let extracted = Table::from_batch(
            RecordBatch::try_new(
                Arc::new(Schema::new(vec![
                    Field::new("CHILDID", arrow::datatypes::DataType::Utf8, true),
                    Field::new("AGE", arrow::datatypes::DataType::Int64, true),
                    Field::new("AGE_extracted", arrow::datatypes::DataType::Int64, true),
                ])),
                vec![
                    Arc::new(StringArray::from(vec!["1", "2"])) as ArrayRef,
                    Arc::new(Int64Array::from(vec![70, 71])) as ArrayRef,
                    Arc::new(Int64Array::from(vec![80, 81])) as ArrayRef,
                ],
            )
            .unwrap(),
        );
        let policy = MergePolicy {
            on_collision: CollisionRule::Suffix,
            ..Default::default()
        };
        let (merged, summary) = merge_tables(&canonical, "childid", &extracted, "CHILDID", &policy)?;
        assert_eq!(merged.column_names(), ["childid", "AGE", "AGE_extracted"]);
        assert_eq!(summary.dropped_columns, ["AGE"]);
        assert!(summary.renamed_columns.is_empty());

        let batch = merged.concat()?;
        let carried = batch.column(2).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(carried.value(0), 80, "the extracted AGE_extracted keeps its name");
        Ok(())
    }

    #[test]
    fn repeated_canonical_ids_keep_every_row() -> Result<()> {
        let canonical = Table::from_batch(
            RecordBatch::try_new(
                Arc::new(Schema::new(vec![
                    Field::new("childid", arrow::datatypes::DataType::Int64, true),
                    Field::new("school", arrow::datatypes::DataType::Utf8, true),
                ])),
                vec![
                    Arc::new(Int64Array::from(vec![1001, 1001, 1002])) as ArrayRef,
                    Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef,
                ],
            )
            .unwrap(),
        );
        let (merged, summary) = merge_tables(
            &canonical,
            "childid",
            &extracted(&["1001"]),
            "CHILDID",
            &MergePolicy::default(),
        )?;
        assert_eq!(merged.num_rows(), 3);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.unmatched, 1);

        let batch = merged.concat()?;
        let schools = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!((schools.value(0), schools.value(1)), ("a", "b"));
        let w = batch.column(3).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(w.value(0), 0.5);
        assert_eq!(w.value(1), 0.5);
        assert!(w.is_null(2));
        Ok(())
    }

    #[test]
    fn case_sensitive_policy_keeps_differently_cased_columns() -> Result<()> {
        let policy = MergePolicy {
            case_insensitive: false,
            ..Default::default()
        };
        let (merged, summary) =
            merge_tables(&canonical(), "childid", &extracted(&["1004"]), "CHILDID", &policy)?;
        assert!(summary.dropped_columns.is_empty());
        assert_eq!(merged.schema.fields().len(), 5);
        Ok(())
    }

    #[test]
    fn empty_extraction_still_adds_columns() -> Result<()> {
        let (merged, summary) = merge_tables(
            &canonical(),
            "childid",
            &extracted(&[]),
            "CHILDID",
            &MergePolicy::default(),
        )?;
        assert_eq!(summary.matched, 0);
        let batch = merged.concat()?;
        assert_eq!(batch.num_rows(), 4);
        assert_eq!(batch.column(3).null_count(), 4);
        Ok(())
    }
}
