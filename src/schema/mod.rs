pub mod arrow;
pub mod dct;
pub mod search;
pub mod types;
pub mod width;
pub mod write;

pub use arrow::{arrow_type_for, build_arrow_schema};
pub use dct::{load_dictionary, parse_dct};
pub use types::{DeclaredType, Dictionary, DictionaryEntry, FieldSpec};
pub use width::WidthPolicy;
pub use write::write_schema;

use regex::Regex;
use std::collections::HashSet;
use tracing::{info, warn};

/// Which dictionary entries become fields.
#[derive(Debug, Clone)]
pub enum FieldSelection {
    /// Discovery mode: every entry in the dictionary.
    All,
    /// Explicit names, matched case-insensitively.
    Names(Vec<String>),
    /// Every entry whose name matches any pattern.
    Patterns(Vec<Regex>),
}

impl FieldSelection {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        FieldSelection::Names(
            names
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Build a pattern selection; patterns are compiled case-insensitively.
    pub fn patterns<I, S>(patterns: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|p| Regex::new(&format!("(?i){}", p.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FieldSelection::Patterns(compiled))
    }

    fn matches(&self, name: &str, wanted: &HashSet<String>) -> bool {
        match self {
            FieldSelection::All => true,
            FieldSelection::Names(_) => wanted.contains(name),
            FieldSelection::Patterns(res) => res.iter().any(|re| re.is_match(name)),
        }
    }
}

/// Resolved fields plus the requested names the dictionary never defined.
#[derive(Debug, Clone, Default)]
pub struct SchemaOutcome {
    pub fields: Vec<FieldSpec>,
    pub missing: Vec<String>,
}

/// Apply a selection and width policy to a parsed dictionary. Fields keep
/// dictionary order.
pub fn build_schema(
    dict: &Dictionary,
    selection: &FieldSelection,
    policy: &WidthPolicy,
) -> SchemaOutcome {
    build_schema_including(dict, selection, policy, None)
}

/// Like [`build_schema`], but `identifier` is always extracted when the
/// dictionary defines it, whatever the selection says.
pub fn build_schema_including(
    dict: &Dictionary,
    selection: &FieldSelection,
    policy: &WidthPolicy,
    identifier: Option<&str>,
) -> SchemaOutcome {
    let wanted: HashSet<String> = match selection {
        FieldSelection::Names(names) => names.iter().map(|n| n.to_ascii_uppercase()).collect(),
        _ => HashSet::new(),
    };

    let resolver = policy.resolver(dict);
    let mut fields = Vec::new();
    let mut found: HashSet<&str> = HashSet::new();

    for entry in &dict.entries {
        let is_identifier = identifier.is_some_and(|id| entry.name.eq_ignore_ascii_case(id));
        if !is_identifier && !selection.matches(&entry.name, &wanted) {
            continue;
        }
        let (declared_type, width) = resolver.resolve(entry);
        found.insert(entry.name.as_str());
        fields.push(FieldSpec {
            name: entry.name.clone(),
            record_line: entry.record_line,
            column_offset: entry.column_offset,
            width,
            declared_type,
        });
    }

    let mut missing = Vec::new();
    if let FieldSelection::Names(names) = selection {
        let mut reported = HashSet::new();
        for n in names {
            let upper = n.to_ascii_uppercase();
            if !found.contains(upper.as_str()) && reported.insert(upper.clone()) {
                warn!(name = %upper, "requested field not found in dictionary");
                missing.push(upper);
            }
        }
    }

    info!(
        fields = fields.len(),
        missing = missing.len(),
        "schema resolved"
    );
    SchemaOutcome { fields, missing }
}
