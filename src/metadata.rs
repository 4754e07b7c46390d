//! Batch metadata sheets: one CSV row per feed-to-feed comparison

use crate::error::{Result, TabreconError};
use crate::mapping::ColumnMapping;
use crate::sources::{SourceConfig, SourceKind};
use serde::Deserialize;
use std::path::Path;

const FEED_TO_FEED: &str = "Feed To Feed";

#[derive(Debug, Deserialize)]
struct MetadataRow {
    #[serde(rename = "ComparisonType", default)]
    comparison_type: String,
    #[serde(rename = "Filename1", default)]
    filename1: String,
    #[serde(rename = "Filename2", default)]
    filename2: String,
    #[serde(rename = "Separator1", default)]
    separator1: String,
    #[serde(rename = "Separator2", default)]
    separator2: String,
    #[serde(rename = "ColumnMapping", default)]
    column_mapping: String,
    #[serde(rename = "IgnoredColumns", default)]
    ignored_columns: String,
    #[serde(rename = "KeyColumns", default)]
    key_columns: String,
    #[serde(rename = "SkipFile", default)]
    skip_file: String,
}

/// One comparison from a metadata sheet
#[derive(Debug, Clone)]
pub struct BatchEntry {
    /// 1-based data row in the sheet
    pub row: usize,
    pub source: SourceConfig,
    pub target: SourceConfig,
    pub mapping: ColumnMapping,
}

impl BatchEntry {
    pub fn name(&self) -> String {
        let stem = |location: &str| {
            Path::new(location)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| location.to_string())
        };
        format!("{}_vs_{}", stem(&self.source.location), stem(&self.target.location))
    }
}

/// Parse a separator cell: empty means "default by extension"
fn parse_separator(cell: &str, row: usize) -> Result<Option<char>> {
    match cell {
        "" => Ok(None),
        "\\t" | "tab" | "TAB" | "\t" => Ok(Some('\t')),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Some(c)),
                _ => Err(TabreconError::config(format!(
                    "metadata row {}: separator '{}' must be a single character",
                    row, other
                ))),
            }
        }
    }
}

fn source_config(location: &str, separator: Option<char>, base: &Path) -> SourceConfig {
    let path = Path::new(location);
    let location = if path.is_relative() {
        base.join(path).to_string_lossy().to_string()
    } else {
        location.to_string()
    };
    let mut config = SourceConfig::new(SourceKind::detect(&location), location);
    config.separator = separator;
    config
}

/// Read the runnable comparisons from a metadata CSV. Rows whose `SkipFile`
/// starts with `#` and rows of other comparison types are left out.
pub fn load_batch<P: AsRef<Path>>(path: P) -> Result<Vec<BatchEntry>> {
    let path = path.as_ref();
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;

    let mut entries = Vec::new();
    for (i, record) in reader.deserialize::<MetadataRow>().enumerate() {
        let row_no = i + 1;
        let row = record?;
        if row.skip_file.starts_with('#') {
            log::info!("Skipping metadata row {} ({})", row_no, row.skip_file);
            continue;
        }
        if row.comparison_type != FEED_TO_FEED {
            log::debug!("Ignoring metadata row {} of type '{}'", row_no, row.comparison_type);
            continue;
        }
        if row.filename1.is_empty() || row.filename2.is_empty() {
            return Err(TabreconError::config(format!("metadata row {}: both file names are required", row_no)));
        }

        let mut mapping = ColumnMapping::from_strings(&row.column_mapping, &row.ignored_columns)
            .map_err(|e| TabreconError::config(format!("metadata row {}: {}", row_no, e)))?;
        mapping.keys = ColumnMapping::parse_list(&row.key_columns);

        entries.push(BatchEntry {
            row: row_no,
            source: source_config(&row.filename1, parse_separator(&row.separator1, row_no)?, base),
            target: source_config(&row.filename2, parse_separator(&row.separator2, row_no)?, base),
            mapping,
        });
    }
    log::info!("{} comparisons scheduled from {}", entries.len(), path.display());
    Ok(entries)
}
