use anyhow::{Context, Result};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use super::FieldSpec;

/// Sidecar path for a table: `out/table.csv` → `out/table.schema.json`.
pub fn schema_path_for(table_path: &Path) -> PathBuf {
    let stem = table_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extracted".to_string());
    table_path.with_file_name(format!("{}.schema.json", stem))
}

/// Write the resolved fields as pretty JSON, atomically: to a hidden tmp
/// file first, then renamed over `path`.
pub fn write_schema(path: &Path, fields: &[FieldSpec]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "schema.json".to_string());
    let tmp_path = dir.join(format!(".{}.tmp", file_name));

    let mut tmp =
        fs::File::create(&tmp_path).with_context(|| format!("creating {:?}", tmp_path))?;
    serde_json::to_writer_pretty(&mut tmp, fields).context("serializing schema JSON")?;
    tmp.write_all(b"\n")?;
    drop(tmp);

    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {:?} -> {:?}", tmp_path, path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DeclaredType;
    use tempfile::tempdir;

    #[test]
    fn writes_sidecar_json() -> Result<()> {
        let dir = tempdir()?;
        let table = dir.path().join("extract.parquet");
        let path = schema_path_for(&table);
        assert_eq!(path, dir.path().join("extract.schema.json"));

        let fields = vec![FieldSpec {
            name: "CHILDID".into(),
            record_line: 1,
            column_offset: 1,
            width: 7,
            declared_type: DeclaredType::Text,
        }];
        write_schema(&path, &fields)?;

        let back: Vec<FieldSpec> = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(back, fields);
        assert!(!dir.path().join(".extract.schema.json.tmp").exists());
        Ok(())
    }
}
