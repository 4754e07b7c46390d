//! Schema reconciliation: aligns two reported schemas under a column
//! mapping and picks a comparison strategy per column pair

use crate::error::{Result, TabreconError};
use crate::mapping::ColumnMapping;
use crate::model::ColumnInfo;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How the values of one column pair are compared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompareStrategy {
    /// Numeric-aware equality, then text equality
    Exact,
    Numeric { absolute: f64, relative: f64 },
    Text { trim: bool, case_fold: bool },
}

/// Strategy settings applied when reconciling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOptions {
    pub absolute_tolerance: f64,
    pub relative_tolerance: f64,
    pub trim: bool,
    pub case_fold: bool,
    /// Per-column strategies by target column name
    pub overrides: IndexMap<String, CompareStrategy>,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            absolute_tolerance: 0.0,
            relative_tolerance: 0.0,
            trim: false,
            case_fold: false,
            overrides: IndexMap::new(),
        }
    }
}

/// One aligned column pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnPair {
    pub source: String,
    pub target: String,
    #[serde(skip)]
    pub source_index: usize,
    #[serde(skip)]
    pub target_index: usize,
    pub strategy: CompareStrategy,
}

/// Output of reconciliation, fixed for the whole run
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledSchema {
    /// Compared pairs in target column order
    pub pairs: Vec<ColumnPair>,
    /// Key pairs in declared key order
    pub keys: Vec<ColumnPair>,
    /// No key columns were declared; rows are matched on all compared columns
    pub implicit_keys: bool,
}

impl ReconciledSchema {
    pub fn source_key_indices(&self) -> Vec<usize> {
        self.keys.iter().map(|p| p.source_index).collect()
    }

    pub fn target_key_indices(&self) -> Vec<usize> {
        self.keys.iter().map(|p| p.target_index).collect()
    }

    pub fn key_names(&self) -> Vec<String> {
        self.keys.iter().map(|p| p.target.clone()).collect()
    }
}

fn index_of(schema: &[ColumnInfo], name: &str, side: &str) -> Result<Option<usize>> {
    let mut found = schema.iter().enumerate().filter(|(_, c)| c.name == name).map(|(i, _)| i);
    let first = found.next();
    if first.is_some() && found.next().is_some() {
        return Err(TabreconError::validation(format!(
            "Column '{}' appears more than once in the {} schema",
            name, side
        )));
    }
    Ok(first)
}

fn choose_strategy(
    source: &ColumnInfo,
    target: &ColumnInfo,
    options: &StrategyOptions,
) -> Result<CompareStrategy> {
    let both_numeric = source.data_type.is_numeric() && target.data_type.is_numeric();
    let both_text = source.data_type.is_textual() && target.data_type.is_textual();

    if let Some(strategy) = options.overrides.get(&target.name) {
        let compatible = match strategy {
            CompareStrategy::Exact => true,
            CompareStrategy::Numeric { .. } => both_numeric,
            CompareStrategy::Text { .. } => both_text,
        };
        if !compatible {
            return Err(TabreconError::validation(format!(
                "Strategy {:?} does not fit column '{}' ({} vs {})",
                strategy, target.name, source.data_type, target.data_type
            )));
        }
        return Ok(strategy.clone());
    }

    if both_numeric && (options.absolute_tolerance > 0.0 || options.relative_tolerance > 0.0) {
        Ok(CompareStrategy::Numeric {
            absolute: options.absolute_tolerance,
            relative: options.relative_tolerance,
        })
    } else if both_text && (options.trim || options.case_fold) {
        Ok(CompareStrategy::Text {
            trim: options.trim,
            case_fold: options.case_fold,
        })
    } else {
        Ok(CompareStrategy::Exact)
    }
}

/// Align the two schemas under `mapping`. Runs before any row is read and
/// fails on anything that would make the comparison meaningless.
pub fn reconcile(
    source: &[ColumnInfo],
    target: &[ColumnInfo],
    mapping: &ColumnMapping,
    options: &StrategyOptions,
) -> Result<ReconciledSchema> {
    for (target_name, source_name) in &mapping.columns {
        if index_of(target, target_name, "target")?.is_none() {
            return Err(TabreconError::validation(format!(
                "Mapped column '{}' not found in target",
                target_name
            )));
        }
        if index_of(source, source_name, "source")?.is_none() {
            return Err(TabreconError::validation(format!(
                "Mapped column '{}' not found in source",
                source_name
            )));
        }
    }

    // Target name -> source name, explicit pairs first, then same-name pairs
    let resolve_source = |target_name: &str| -> Option<String> {
        match mapping.source_for(target_name) {
            Some(source_name) => Some(source_name.to_string()),
            None if !mapping.is_mapped_source(target_name) && source.iter().any(|c| c.name == target_name) => {
                Some(target_name.to_string())
            }
            None => None,
        }
    };

    for ignored in &mapping.ignore {
        let known = target.iter().any(|c| &c.name == ignored) || source.iter().any(|c| &c.name == ignored);
        if !known {
            return Err(TabreconError::validation(format!(
                "Ignored column '{}' not found on either side",
                ignored
            )));
        }
        if mapping.keys.contains(ignored) {
            return Err(TabreconError::validation(format!("Key column '{}' is also ignored", ignored)));
        }
    }

    let build_pair = |target_name: &str, source_name: &str| -> Result<ColumnPair> {
        let target_index = index_of(target, target_name, "target")?
            .ok_or_else(|| TabreconError::validation(format!("Column '{}' not found in target", target_name)))?;
        let source_index = index_of(source, source_name, "source")?
            .ok_or_else(|| TabreconError::validation(format!("Column '{}' not found in source", source_name)))?;
        Ok(ColumnPair {
            source: source_name.to_string(),
            target: target_name.to_string(),
            source_index,
            target_index,
            strategy: choose_strategy(&source[source_index], &target[target_index], options)?,
        })
    };

    let mut pairs = Vec::new();
    for column in target {
        if mapping.is_ignored(&column.name) {
            continue;
        }
        if let Some(source_name) = resolve_source(&column.name) {
            if mapping.is_ignored(&source_name) {
                continue;
            }
            pairs.push(build_pair(&column.name, &source_name)?);
        }
    }

    if pairs.is_empty() {
        return Err(TabreconError::validation(
            "No comparable columns: the mapping leaves no column present on both sides",
        ));
    }

    for name in options.overrides.keys() {
        if !pairs.iter().any(|p| &p.target == name) {
            return Err(TabreconError::validation(format!(
                "Strategy override for '{}' does not name a compared column",
                name
            )));
        }
    }

    let mut keys = Vec::new();
    for key in &mapping.keys {
        if index_of(target, key, "target")?.is_none() {
            return Err(TabreconError::validation(format!("Key column '{}' not found in target", key)));
        }
        let source_name = resolve_source(key).ok_or_else(|| {
            TabreconError::validation(format!("Key column '{}' has no counterpart in source", key))
        })?;
        let mut pair = build_pair(key, &source_name)?;
        pair.strategy = CompareStrategy::Exact;
        keys.push(pair);
    }

    let implicit_keys = keys.is_empty();
    if implicit_keys {
        log::warn!("No key columns declared; matching rows on all {} compared columns", pairs.len());
        keys = pairs.clone();
    }

    Ok(ReconciledSchema {
        pairs,
        keys,
        implicit_keys,
    })
}
