// src/pipeline.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::{
    config::Config,
    error::ExtractError,
    merge::{merge_tables, MergeSummary},
    process::{extract_file, ExtractionSummary},
    report::write_coverage,
    schema::{
        self, build_arrow_schema, build_schema_including, load_dictionary, FieldSelection,
        SchemaOutcome,
    },
    table::{read_table, write_table, FileSink, MemorySink, Table, Tee},
};

/// Join the extracted rows onto an existing table.
#[derive(Debug, Clone)]
pub struct MergeStep {
    pub canonical: PathBuf,
    pub canonical_id: String,
    pub extracted_id: String,
    pub output: PathBuf,
}

/// One extraction run: dictionary + flat file in, tables and report out.
#[derive(Debug, Clone)]
pub struct ExtractJob {
    pub dictionary: PathBuf,
    pub data: PathBuf,
    pub selection: FieldSelection,
    /// Extracted table; a `<stem>.schema.json` sidecar lands next to it.
    pub output: Option<PathBuf>,
    pub merge: Option<MergeStep>,
    pub report: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ExtractRun {
    pub schema: SchemaOutcome,
    pub extraction: ExtractionSummary,
    pub extracted: Table,
    pub merged: Option<(Table, MergeSummary)>,
}

/// Parse the dictionary, stream the flat file, then optionally merge and
/// report.
///
/// Identifier columns are checked before the flat file is read. When a merge
/// is requested the extracted table is held in memory and only written once
/// the merge has succeeded, so a cardinality error leaves no output behind.
#[instrument(level = "info", skip_all, fields(dictionary = %job.dictionary.display(), data = %job.data.display()))]
pub fn run_extract(job: &ExtractJob, config: &Config) -> Result<ExtractRun> {
    config.validate()?;
    let dict = load_dictionary(&job.dictionary, config.encoding)?;
    let lines_per_record = config.record_length(&dict)?;

    let canonical = match &job.merge {
        Some(step) => {
            if !step.canonical.is_file() {
                return Err(ExtractError::CanonicalNotFound(step.canonical.clone()).into());
            }
            let table = read_table(&step.canonical)
                .with_context(|| format!("reading canonical table {:?}", step.canonical))?;
            if table.find_column(&step.canonical_id).is_none() {
                return Err(ExtractError::MissingIdentifier {
                    side: "canonical",
                    column: step.canonical_id.clone(),
                }
                .into());
            }
            Some(table)
        }
        None => None,
    };

    let identifier = job.merge.as_ref().map(|step| step.extracted_id.as_str());
    let outcome = build_schema_including(&dict, &job.selection, &config.width, identifier);
    if let Some(id) = identifier {
        if !outcome.fields.iter().any(|f| f.name.eq_ignore_ascii_case(id)) {
            return Err(ExtractError::MissingIdentifier {
                side: "extracted",
                column: id.to_string(),
            }
            .into());
        }
    }

    let options = config.extract_options(lines_per_record);
    let arrow_schema = build_arrow_schema(&outcome.fields);
    info!(
        fields = outcome.fields.len(),
        lines_per_record,
        "starting extraction"
    );

    let memory = MemorySink::new(arrow_schema.clone());
    let (extraction, extracted) = match (&job.output, &canonical) {
        // Nothing downstream can fail on the rows: stream straight to disk.
        (Some(path), None) => {
            let file = FileSink::create(path, arrow_schema)?;
            let (summary, Tee(memory, _)) =
                extract_file(&job.data, &outcome.fields, &options, Tee(memory, file))?;
            write_sidecar(path, &outcome)?;
            (summary, memory.into_table())
        }
        _ => {
            let (summary, memory) = extract_file(&job.data, &outcome.fields, &options, memory)?;
            (summary, memory.into_table())
        }
    };

    let merged = match (&job.merge, &canonical) {
        (Some(step), Some(canonical)) => {
            let (table, summary) = merge_tables(
                canonical,
                &step.canonical_id,
                &extracted,
                &step.extracted_id,
                &config.merge,
            )?;
            if let Some(path) = &job.output {
                write_table(path, &extracted)?;
                write_sidecar(path, &outcome)?;
            }
            write_table(&step.output, &table)?;
            info!(path = %step.output.display(), rows = table.num_rows(), "wrote merged table");
            Some((table, summary))
        }
        _ => None,
    };

    if let Some(path) = &job.report {
        let (title, table) = match &merged {
            Some((t, _)) => ("MERGED VARIABLES", t),
            None => ("EXTRACTED VARIABLES", &extracted),
        };
        write_coverage(path, title, table, &outcome.missing)?;
    }

    Ok(ExtractRun {
        schema: outcome,
        extraction,
        extracted,
        merged,
    })
}

fn write_sidecar(table_path: &Path, outcome: &SchemaOutcome) -> Result<()> {
    let sidecar = schema::write::schema_path_for(table_path);
    schema::write_schema(&sidecar, &outcome.fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, StringArray};
    use std::fs;
    use tempfile::tempdir;

    const DCT: &str = "dictionary {\n_lines(2)\n_line(1)\n\
        _column(1)  str4  CHILDID  %4s  \"CHILD IDENTIFIER\"\n\
        _column(6)  byte  X1KAGE   %3.0f \"AGE AT ASSESSMENT\"\n\
        _line(2)\n\
        _column(1)  str3  P1FOOD   %3s  \"FOOD SECURITY\"\n}\n";

    // CHILDID cols 1-4, X1KAGE cols 6-12 (declared integer width 7).
    const DATA: &str = "0001  72    \nyes\n0002  -9    \n   \n0003  65    \nno \n";

    fn job(dir: &std::path::Path) -> Result<ExtractJob> {
        fs::write(dir.join("k.dct"), DCT)?;
        fs::write(dir.join("k.dat"), DATA)?;
        fs::write(
            dir.join("canonical.csv"),
            "childid,school\n3,north\n1,south\n9,east\n",
        )?;
        Ok(ExtractJob {
            dictionary: dir.join("k.dct"),
            data: dir.join("k.dat"),
            selection: FieldSelection::names(["childid", "x1kage", "p1food", "w9c9p"]),
            output: Some(dir.join("out/extracted.csv")),
            merge: Some(MergeStep {
                canonical: dir.join("canonical.csv"),
                canonical_id: "childid".into(),
                extracted_id: "CHILDID".into(),
                output: dir.join("out/merged.parquet"),
            }),
            report: Some(dir.join("out/report.txt")),
        })
    }

    #[test]
    fn extract_merge_and_report() -> Result<()> {
        let dir = tempdir()?;
        let job = job(dir.path())?;
        let run = run_extract(&job, &Config::default())?;

        assert_eq!(run.extraction.records, 3);
        assert_eq!(run.schema.missing, ["W9C9P"]);
        assert!(dir.path().join("out/extracted.csv").is_file());
        assert!(dir.path().join("out/extracted.schema.json").is_file());
        assert!(!dir.path().join("out/.extracted.csv.tmp").exists());

        let (merged, summary) = run.merged.as_ref().unwrap();
        assert_eq!(summary.matched, 2);
        assert_eq!(merged.column_names(), ["childid", "school", "X1KAGE", "P1FOOD"]);
        let batch = merged.concat()?;
        let age = batch.column(2).as_any().downcast_ref::<Int64Array>().unwrap();
        let food = batch.column(3).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(age.value(0), 65);
        assert_eq!(food.value(0), "no");
        assert_eq!(age.value(1), 72);
        assert!(age.is_null(2));

        let reread = read_table(dir.path().join("out/merged.parquet"))?;
        assert_eq!(reread.num_rows(), 3);

        let report = fs::read_to_string(dir.path().join("out/report.txt"))?;
        assert!(report.starts_with("MERGED VARIABLES"));
        assert!(report.contains("W9C9P"));
        Ok(())
    }

    #[test]
    fn missing_canonical_fails_before_any_output() -> Result<()> {
        let dir = tempdir()?;
        let mut job = job(dir.path())?;
        if let Some(step) = job.merge.as_mut() {
            step.canonical = dir.path().join("absent.csv");
        }
        let err = run_extract(&job, &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::CanonicalNotFound(_))
        ));
        assert!(!dir.path().join("out").exists());
        Ok(())
    }

    #[test]
    fn identifier_absent_from_dictionary_fails_before_reading_data() -> Result<()> {
        let dir = tempdir()?;
        let mut job = job(dir.path())?;
        if let Some(step) = job.merge.as_mut() {
            step.extracted_id = "PARENTID".into();
        }
        // The data file is never opened.
        fs::remove_file(&job.data)?;
        let err = run_extract(&job, &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::MissingIdentifier { side: "extracted", .. })
        ));
        assert!(!dir.path().join("out").exists());
        Ok(())
    }

    #[test]
    fn duplicate_identifiers_leave_no_output() -> Result<()> {
        let dir = tempdir()?;
        let job = job(dir.path())?;
        fs::write(&job.data, "0001  72    \nyes\n0001  65    \nno \n")?;
        let err = run_extract(&job, &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::DuplicateIdentifiers { count: 1, .. })
        ));
        assert!(!dir.path().join("out/extracted.csv").exists());
        assert!(!dir.path().join("out/extracted.schema.json").exists());
        assert!(!dir.path().join("out/merged.parquet").exists());
        Ok(())
    }

    #[test]
    fn pattern_selection_still_extracts_the_identifier() -> Result<()> {
        let dir = tempdir()?;
        let mut job = job(dir.path())?;
        job.selection = FieldSelection::patterns(["^X1KAGE$"])?;
        let run = run_extract(&job, &Config::default())?;
        assert_eq!(run.extracted.column_names(), ["CHILDID", "X1KAGE"]);
        let (merged, summary) = run.merged.as_ref().unwrap();
        assert_eq!(summary.matched, 2);
        assert_eq!(merged.column_names(), ["childid", "school", "X1KAGE"]);
        Ok(())
    }

    #[test]
    fn record_length_must_be_known() -> Result<()> {
        let dir = tempdir()?;
        let job = job(dir.path())?;
        fs::write(&job.dictionary, DCT.replace("_lines(2)\n", ""))?;
        let err = run_extract(&job, &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::UnknownRecordLength)
        ));
        Ok(())
    }
}
