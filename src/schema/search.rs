//! Grouping dictionary variables into named categories by name or
//! description patterns. Used to discover which variables a dictionary
//! actually carries before deciding what to extract.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;

use super::types::{Dictionary, DictionaryEntry};

#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    patterns: Vec<Regex>,
}

impl Category {
    /// Patterns are compiled case-insensitively.
    pub fn new<S: AsRef<str>>(name: &str, patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", p.as_ref()))
                    .with_context(|| format!("bad pattern `{}` in category `{}`", p.as_ref(), name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: name.to_string(),
            patterns,
        })
    }

    /// Load `{category: [pattern, ...]}` from YAML. Categories come back
    /// sorted by name.
    pub fn from_yaml(text: &str) -> Result<Vec<Self>> {
        let raw: BTreeMap<String, Vec<String>> =
            serde_yaml::from_str(text).context("parsing category YAML")?;
        raw.iter().map(|(name, pats)| Category::new(name, pats)).collect()
    }

    fn matches(&self, entry: &DictionaryEntry, descriptions: bool) -> bool {
        self.patterns.iter().any(|re| {
            re.is_match(&entry.name)
                || (descriptions
                    && entry
                        .description
                        .as_deref()
                        .is_some_and(|d| re.is_match(d)))
        })
    }
}

#[derive(Debug)]
pub struct CategoryHits<'a> {
    pub category: &'a str,
    pub entries: Vec<&'a DictionaryEntry>,
}

/// Match every category against the dictionary. An entry can land in more
/// than one category.
pub fn search<'a>(
    dict: &'a Dictionary,
    categories: &'a [Category],
    descriptions: bool,
) -> Vec<CategoryHits<'a>> {
    categories
        .iter()
        .map(|cat| CategoryHits {
            category: &cat.name,
            entries: dict
                .entries
                .iter()
                .filter(|e| cat.matches(e, descriptions))
                .collect(),
        })
        .collect()
}

/// Distinct names across all hits, in dictionary order.
pub fn hit_names(dict: &Dictionary, hits: &[CategoryHits<'_>]) -> Vec<String> {
    dict.entries
        .iter()
        .filter(|e| {
            hits.iter()
                .any(|h| h.entries.iter().any(|x| x.name == e.name))
        })
        .map(|e| e.name.clone())
        .collect()
}
