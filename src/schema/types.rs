// src/schema/types.rs

use serde::{Deserialize, Serialize};

/// The value family a dictionary type token maps onto.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredType {
    Text,
    Integer,
    Real,
}

impl DeclaredType {
    /// `strN` → text, `byte|int|long` → integer, `float|double` → real.
    /// Unknown tokens are treated as text.
    pub fn from_token(token: &str) -> Self {
        let lower = token.to_ascii_lowercase();
        if lower.starts_with("str") {
            DeclaredType::Text
        } else if matches!(lower.as_str(), "byte" | "int" | "long") {
            DeclaredType::Integer
        } else if matches!(lower.as_str(), "float" | "double") {
            DeclaredType::Real
        } else {
            DeclaredType::Text
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, DeclaredType::Text)
    }
}

/// One variable located inside a multi-line record.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq, Hash)]
pub struct FieldSpec {
    pub name: String,
    /// 1-based physical line within the record.
    pub record_line: usize,
    /// 1-based starting column.
    pub column_offset: usize,
    pub width: usize,
    pub declared_type: DeclaredType,
}

impl FieldSpec {
    /// Zero-based `[start, end)` byte window within the physical line.
    pub fn window(&self) -> (usize, usize) {
        let start = self.column_offset.saturating_sub(1);
        (start, start + self.width)
    }
}

/// A `_column(...)` line before any width policy has been applied.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Eq)]
pub struct DictionaryEntry {
    pub name: String,
    pub record_line: usize,
    pub column_offset: usize,
    pub type_token: String,
    pub description: Option<String>,
}

/// Everything a dictionary file declares.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dictionary {
    /// From a `_lines(N)` directive, if present.
    pub lines_per_record: Option<usize>,
    pub entries: Vec<DictionaryEntry>,
    /// `(record_line, column_offset)` of every parsed `_column` line,
    /// including repeated names that `entries` leaves out.
    pub column_positions: Vec<(usize, usize)>,
}

impl Dictionary {
    pub fn get(&self, name: &str) -> Option<&DictionaryEntry> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }
}
