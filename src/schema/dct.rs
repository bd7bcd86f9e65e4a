// src/schema/dct.rs

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::HashSet, fs, path::Path};
use tracing::{debug, instrument, trace, warn};

use super::types::{Dictionary, DictionaryEntry};
use crate::{error::ExtractError, process::decode::Encoding};

static LINE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_line\((\d+)\)").expect("static regex"));
static LINES_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_lines\((\d+)\)").expect("static regex"));
static COLUMN_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_column\((\d+)\)").expect("static regex"));
static DESCRIPTION: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)""#).expect("static regex"));

/// Read a dictionary file from disk. A missing file is fatal; everything
/// inside the file is parsed tolerantly by [`parse_dct`].
#[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn load_dictionary<P: AsRef<Path>>(path: P, encoding: Encoding) -> Result<Dictionary> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ExtractError::DictionaryNotFound(path.to_path_buf()).into());
    }
    let bytes = fs::read(path).with_context(|| format!("reading dictionary {:?}", path))?;
    let dict = parse_dct(&encoding.decode(&bytes));
    debug!(
        entries = dict.entries.len(),
        lines_per_record = ?dict.lines_per_record,
        "loaded dictionary"
    );
    Ok(dict)
}

/// Parse the contents of a `.dct` file.
///
/// Lines without a `_column(N)` marker, or with too few tokens after it,
/// are skipped. A repeated variable name keeps its first definition.
pub fn parse_dct(contents: &str) -> Dictionary {
    let mut dict = Dictionary::default();
    let mut current_line = 1usize;
    let mut seen: HashSet<String> = HashSet::new();
    let mut skipped = 0usize;

    for (lineno, line) in contents.lines().enumerate() {
        if let Some(n) = capture_number(&LINES_DIRECTIVE, line) {
            if n > 0 {
                dict.lines_per_record = Some(n);
            }
        }

        if let Some(n) = capture_number(&LINE_MARKER, line) {
            if n == 0 {
                warn!(lineno, "ignoring _line(0) marker");
            } else {
                current_line = n;
            }
        }

        if !line.contains("_column(") {
            continue;
        }
        match parse_column_line(line, current_line) {
            Some(entry) => {
                dict.column_positions
                    .push((entry.record_line, entry.column_offset));
                if seen.insert(entry.name.clone()) {
                    trace!(name = %entry.name, line = entry.record_line, col = entry.column_offset, "entry");
                    dict.entries.push(entry);
                } else {
                    warn!(name = %entry.name, lineno, "duplicate dictionary name, keeping first");
                }
            }
            None => {
                skipped += 1;
                trace!(lineno, "skipping malformed _column line");
            }
        }
    }

    if skipped > 0 {
        debug!(skipped, "malformed _column lines skipped");
    }
    dict
}

fn capture_number(re: &Regex, line: &str) -> Option<usize> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// `_column(N)  <type>  <name>  [format]  ["description"]`
fn parse_column_line(line: &str, record_line: usize) -> Option<DictionaryEntry> {
    let column_offset = capture_number(&COLUMN_MARKER, line).filter(|&c| c > 0)?;

    let parts: Vec<&str> = line.split_whitespace().collect();
    let idx = parts.iter().position(|p| p.contains("_column"))?;
    let type_token = parts.get(idx + 1)?;
    let name = parts.get(idx + 2)?;

    let description = DESCRIPTION
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string());

    Some(DictionaryEntry {
        name: name.to_ascii_uppercase(),
        record_line,
        column_offset,
        type_token: type_token.to_ascii_lowercase(),
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"infile dictionary using childK5p.dat {
_lines(27)
_line(1)
  _column(1)     str7     childid    %7s   "CHILD IDENTIFICATION NUMBER"
  _column(8)     str8     PARENTID   %8s   "PARENT IDENTIFICATION NUMBER"
_line(3)
  _column(10)    byte     X1KAGE     %3.0f "X1 CHILD AGE AT ASSESSMENT"
  _column(13)    double   W1C0       %11.6f
  _column(40)    int
  this line mentions nothing at all
}
"#;

    #[test]
    fn parses_markers_types_and_descriptions() {
        let dict = parse_dct(SAMPLE);
        assert_eq!(dict.lines_per_record, Some(27));
        assert_eq!(dict.entries.len(), 4);

        let child = &dict.entries[0];
        assert_eq!(child.name, "CHILDID");
        assert_eq!(child.record_line, 1);
        assert_eq!(child.column_offset, 1);
        assert_eq!(child.type_token, "str7");
        assert_eq!(
            child.description.as_deref(),
            Some("CHILD IDENTIFICATION NUMBER")
        );

        let age = dict.get("x1kage").unwrap();
        assert_eq!(age.record_line, 3);
        assert_eq!(age.column_offset, 10);
        assert_eq!(age.type_token, "byte");

        assert_eq!(dict.get("W1C0").unwrap().description, None);
    }

    #[test]
    fn lines_directive_is_not_a_line_marker() {
        let dict = parse_dct("_lines(5)\n_column(3) int A\n");
        assert_eq!(dict.lines_per_record, Some(5));
        assert_eq!(dict.entries[0].record_line, 1);
    }

    #[test]
    fn no_column_markers_is_empty_not_error() {
        let dict = parse_dct("infile dictionary {\n_line(1)\n}\n");
        assert!(dict.entries.is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dict = parse_dct("_column() str3 A\n_column(0) str3 B\n_column(4) str3\n_column(5) str3 C\n");
        assert_eq!(dict.entries.len(), 1);
        assert_eq!(dict.entries[0].name, "C");
    }

    #[test]
    fn duplicate_names_keep_first() {
        let dict = parse_dct("_column(1) str3 a\n_line(2)\n_column(9) str3 A\n");
        assert_eq!(dict.entries.len(), 1);
        assert_eq!(dict.entries[0].column_offset, 1);
    }

    #[test]
    fn marker_and_column_on_same_line() {
        let dict = parse_dct("_line(4) _column(2) long Z\n");
        assert_eq!(dict.entries[0].record_line, 4);
        assert_eq!(dict.entries[0].column_offset, 2);
    }

    #[test]
    fn missing_dictionary_is_fatal() {
        let err = load_dictionary("/definitely/not/here.dct", Encoding::Latin1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::DictionaryNotFound(_))
        ));
    }

    #[test]
    fn loads_latin1_dictionary_from_disk() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(b"_column(1) str4 NAME \"caf\xe9\"\n")?;
        let dict = load_dictionary(tmp.path(), Encoding::Latin1)?;
        assert_eq!(dict.entries[0].description.as_deref(), Some("café"));
        Ok(())
    }
}
