use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::HashSet};

use crate::schema::{DeclaredType, FieldSpec};

/// Character encoding of the dictionary and flat data file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// One byte per character, so column offsets are byte offsets.
    #[default]
    Latin1,
    /// Invalid sequences become U+FFFD.
    Utf8,
}

impl Encoding {
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes),
            Encoding::Latin1 if bytes.is_ascii() => {
                // ASCII is valid UTF-8.
                Cow::Borrowed(std::str::from_utf8(bytes).unwrap_or_default())
            }
            Encoding::Latin1 => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

/// Named sentinel presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelPreset {
    /// -9, -8, -7, -1
    Minimal,
    /// -9, -8, -7, -4, -3, -2, -1
    Broad,
}

/// How sentinels are written in configuration: a preset name or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SentinelSpec {
    Preset(SentinelPreset),
    Codes(Vec<i64>),
}

impl Default for SentinelSpec {
    fn default() -> Self {
        SentinelSpec::Preset(SentinelPreset::Broad)
    }
}

/// Reserved numeric codes meaning "missing for a reason" (not applicable,
/// refused, don't know, not ascertained).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelSet {
    codes: HashSet<String>,
}

impl SentinelSet {
    pub fn from_codes<I: IntoIterator<Item = i64>>(codes: I) -> Self {
        Self {
            codes: codes.into_iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn minimal() -> Self {
        Self::from_codes([-9, -8, -7, -1])
    }

    pub fn broad() -> Self {
        Self::from_codes([-9, -8, -7, -4, -3, -2, -1])
    }

    /// Exact textual match against the trimmed cell.
    pub fn contains(&self, trimmed: &str) -> bool {
        self.codes.contains(trimmed)
    }
}

impl Default for SentinelSet {
    fn default() -> Self {
        Self::broad()
    }
}

impl From<&SentinelSpec> for SentinelSet {
    fn from(spec: &SentinelSpec) -> Self {
        match spec {
            SentinelSpec::Preset(SentinelPreset::Minimal) => SentinelSet::minimal(),
            SentinelSpec::Preset(SentinelPreset::Broad) => SentinelSet::broad(),
            SentinelSpec::Codes(codes) => SentinelSet::from_codes(codes.iter().copied()),
        }
    }
}

/// What a blank text cell decodes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextBlankPolicy {
    #[default]
    Missing,
    Empty,
}

#[derive(Debug, Clone, Default)]
pub struct DecodePolicy {
    pub sentinels: SentinelSet,
    pub text_blank: TextBlankPolicy,
    pub encoding: Encoding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Real(f64),
    Missing,
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

/// Raw bytes of a field's window, clamped to the line. A record without the
/// field's line, or a line shorter than the start column, yields `&[]`.
pub fn field_bytes<'a, L: AsRef<[u8]>>(spec: &FieldSpec, record: &'a [L]) -> &'a [u8] {
    let line: &[u8] = match spec.record_line.checked_sub(1).and_then(|i| record.get(i)) {
        Some(l) => l.as_ref(),
        None => return &[],
    };
    let (start, end) = spec.window();
    if start >= line.len() {
        return &[];
    }
    &line[start..end.min(line.len())]
}

/// Decode one field of one record. Never fails: anything that cannot be
/// read as the declared type becomes [`Value::Missing`].
pub fn decode_field<L: AsRef<[u8]>>(
    spec: &FieldSpec,
    record: &[L],
    policy: &DecodePolicy,
) -> Value {
    let raw = policy.encoding.decode(field_bytes(spec, record));
    decode_str(spec.declared_type, raw.trim(), policy)
}

/// Decode an already-trimmed cell.
pub fn decode_str(ty: DeclaredType, cell: &str, policy: &DecodePolicy) -> Value {
    if ty.is_numeric() && (cell.is_empty() || policy.sentinels.contains(cell)) {
        return Value::Missing;
    }
    match ty {
        DeclaredType::Integer => cell.parse::<i64>().map_or(Value::Missing, Value::Integer),
        DeclaredType::Real => match cell.parse::<f64>() {
            Ok(v) if v.is_finite() => Value::Real(v),
            _ => Value::Missing,
        },
        DeclaredType::Text if cell.is_empty() => match policy.text_blank {
            TextBlankPolicy::Missing => Value::Missing,
            TextBlankPolicy::Empty => Value::Text(String::new()),
        },
        DeclaredType::Text => Value::Text(cell.to_string()),
    }
}
