// src/schema/width.rs

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound::{Excluded, Unbounded},
};

use super::types::{DeclaredType, Dictionary, DictionaryEntry};

/// How a field's width is derived. The two policies give different answers
/// for the same dictionary and are never mixed within one parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum WidthPolicy {
    /// Width comes from the type token: `strN` carries N, numeric families
    /// get a fixed width.
    Declared {
        #[serde(default = "default_integer_width")]
        integer_width: usize,
        #[serde(default = "default_real_width")]
        real_width: usize,
        #[serde(default = "default_fallback_width")]
        fallback_width: usize,
    },
    /// Width is the gap to the next column on the same record line.
    NextColumn {
        #[serde(default = "default_last_width")]
        last_width: usize,
    },
}

fn default_integer_width() -> usize {
    7
}
fn default_real_width() -> usize {
    11
}
fn default_fallback_width() -> usize {
    10
}
fn default_last_width() -> usize {
    20
}

impl Default for WidthPolicy {
    fn default() -> Self {
        WidthPolicy::Declared {
            integer_width: default_integer_width(),
            real_width: default_real_width(),
            fallback_width: default_fallback_width(),
        }
    }
}

impl WidthPolicy {
    pub fn next_column() -> Self {
        WidthPolicy::NextColumn {
            last_width: default_last_width(),
        }
    }

    /// Every configured width must be positive.
    pub fn widths_are_positive(&self) -> bool {
        match *self {
            WidthPolicy::Declared {
                integer_width,
                real_width,
                fallback_width,
            } => integer_width > 0 && real_width > 0 && fallback_width > 0,
            WidthPolicy::NextColumn { last_width } => last_width > 0,
        }
    }

    /// Bind the policy to a dictionary. `NextColumn` needs every parsed
    /// `_column` line, not only the kept entries, to find the neighbouring
    /// offsets.
    pub fn resolver<'a>(&'a self, dict: &Dictionary) -> WidthResolver<'a> {
        let offsets = match self {
            WidthPolicy::Declared { .. } => BTreeMap::new(),
            WidthPolicy::NextColumn { .. } => {
                let mut by_line: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
                for &(line, offset) in &dict.column_positions {
                    by_line.entry(line).or_default().insert(offset);
                }
                by_line
            }
        };
        WidthResolver {
            policy: self,
            offsets,
        }
    }
}

pub struct WidthResolver<'a> {
    policy: &'a WidthPolicy,
    offsets: BTreeMap<usize, BTreeSet<usize>>,
}

impl WidthResolver<'_> {
    /// Resolve the declared type and a positive width for one entry.
    pub fn resolve(&self, entry: &DictionaryEntry) -> (DeclaredType, usize) {
        match *self.policy {
            WidthPolicy::Declared {
                integer_width,
                real_width,
                fallback_width,
            } => declared_width(&entry.type_token, integer_width, real_width, fallback_width),
            WidthPolicy::NextColumn { last_width } => {
                let width = self
                    .offsets
                    .get(&entry.record_line)
                    .and_then(|set| set.range((Excluded(entry.column_offset), Unbounded)).next())
                    .map(|next| next - entry.column_offset)
                    .unwrap_or(last_width);
                (DeclaredType::from_token(&entry.type_token), width)
            }
        }
    }
}

fn declared_width(
    token: &str,
    integer_width: usize,
    real_width: usize,
    fallback_width: usize,
) -> (DeclaredType, usize) {
    let ty = DeclaredType::from_token(token);
    let width = match ty {
        DeclaredType::Integer => integer_width,
        DeclaredType::Real => real_width,
        DeclaredType::Text => token
            .get(3..)
            .filter(|_| token.starts_with("str"))
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(fallback_width),
    };
    (ty, width)
}
