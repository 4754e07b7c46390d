//! User-declared column mapping between a source and a target dataset

use crate::error::{Result, TabreconError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Target-column → source-column mapping, plus ignored and key columns.
///
/// Ignored and key columns are named by their target-side (post-mapping)
/// names. Columns with the same name on both sides that are not mentioned
/// in `columns` pair up implicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub columns: IndexMap<String, String>,
    pub ignore: Vec<String>,
    pub keys: Vec<String>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `target` with `source`
    pub fn map(mut self, target: impl Into<String>, source: impl Into<String>) -> Self {
        self.columns.insert(target.into(), source.into());
        self
    }

    pub fn ignore(mut self, column: impl Into<String>) -> Self {
        self.ignore.push(column.into());
        self
    }

    pub fn key(mut self, column: impl Into<String>) -> Self {
        self.keys.push(column.into());
        self
    }

    /// Parse the `"src_a:tgt_a,src_b:tgt_b"` form into target → source
    pub fn parse_pairs(text: &str) -> Result<IndexMap<String, String>> {
        let mut columns = IndexMap::new();
        for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (source, target) = pair.split_once(':').ok_or_else(|| {
                TabreconError::validation(format!("Invalid mapping '{}': expected 'source:target'", pair))
            })?;
            let (source, target) = (source.trim(), target.trim());
            if source.is_empty() || target.is_empty() {
                return Err(TabreconError::validation(format!("Invalid mapping '{}': empty column name", pair)));
            }
            if columns.insert(target.to_string(), source.to_string()).is_some() {
                return Err(TabreconError::validation(format!(
                    "Target column '{}' is mapped more than once",
                    target
                )));
            }
        }
        Ok(columns)
    }

    /// Split a comma-separated column list
    pub fn parse_list(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Build a mapping from the textual mapping and ignore-list forms
    pub fn from_strings(mapping: &str, ignored: &str) -> Result<Self> {
        Ok(Self {
            columns: Self::parse_pairs(mapping)?,
            ignore: Self::parse_list(ignored),
            keys: Vec::new(),
        })
    }

    /// Source column paired with a target column, if explicitly mapped
    pub fn source_for(&self, target: &str) -> Option<&str> {
        self.columns.get(target).map(String::as_str)
    }

    /// Whether a source column is the right-hand side of some explicit pair
    pub fn is_mapped_source(&self, source: &str) -> bool {
        self.columns.values().any(|s| s == source)
    }

    pub fn is_ignored(&self, column: &str) -> bool {
        self.ignore.iter().any(|c| c == column)
    }
}
