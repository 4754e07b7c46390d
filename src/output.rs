//! Output formatting utilities

use crate::engine::RunReport;
use crate::error::Result;
use crate::model::ColumnInfo;
use crate::result::{CheckDetail, ComparisonResult, QualityCheckResult, RowDiff, RowStatus, RunStatus};
use std::path::Path;

/// Diffs printed in pretty mode; the JSON report carries all of them
const PRINTED_DIFFS: usize = 10;

/// Pretty printer for tabrecon output
pub struct PrettyPrinter;

impl PrettyPrinter {
    /// Print a full run: the comparison followed by any quality results
    pub fn print_report(report: &RunReport) {
        Self::print_comparison(&report.comparison);
        for quality in &report.quality {
            println!();
            Self::print_quality(quality);
        }
    }

    /// Print comparison results
    pub fn print_comparison(result: &ComparisonResult) {
        println!("🔍 Comparison: {} → {}", result.source.name, result.target.name);
        Self::print_status(&result.status);
        println!("├─ Key columns: {}", result.key_columns.join(", "));
        println!(
            "├─ Rows: {} source, {} target",
            result.source.rows, result.target.rows
        );
        if result.source.skipped_rows + result.target.skipped_rows > 0 {
            println!(
                "├─ ⚠️  Skipped malformed rows: {} source, {} target",
                result.source.skipped_rows, result.target.skipped_rows
            );
        }

        let counts = &result.counts;
        println!("├─ ✅ Matched: {}", counts.matched);
        let mark = |n: u64| if n > 0 { "❌" } else { "✅" };
        println!("├─ {} Mismatched: {}", mark(counts.mismatched), counts.mismatched);
        println!("├─ {} Missing in target: {}", mark(counts.missing_in_target), counts.missing_in_target);
        println!("├─ {} Missing in source: {}", mark(counts.missing_in_source), counts.missing_in_source);
        println!("├─ {} Duplicate keys: {}", mark(counts.duplicate_key), counts.duplicate_key);
        for nulls in result.null_count_differences() {
            println!(
                "├─ ⚠️  Nulls in {}: {} source, {} target",
                nulls.column, nulls.source_nulls, nulls.target_nulls
            );
        }

        if result.diffs.is_empty() {
            println!("└─ No differences");
            return;
        }

        println!("└─ Differences ({} total{}):", result.total_diffs, if result.truncated { ", truncated" } else { "" });
        let shown = result.diffs.len().min(PRINTED_DIFFS);
        for (i, diff) in result.diffs.iter().take(shown).enumerate() {
            let last = i == shown - 1;
            Self::print_diff(diff, if last { "   └─" } else { "   ├─" }, if last { "      " } else { "   │  " });
        }
        if result.total_diffs > shown as u64 {
            println!("      ... and {} more", result.total_diffs - shown as u64);
        }
    }

    fn print_status(status: &RunStatus) {
        match status {
            RunStatus::Complete => println!("├─ Status: complete"),
            RunStatus::Cancelled => println!("├─ ⚠️  Status: cancelled"),
            RunStatus::Incomplete {
                error,
                chunk_index,
                row_key,
            } => {
                println!("├─ ⚠️  Status: INCOMPLETE");
                println!("│  ├─ Error: {}", error);
                if let Some(chunk) = chunk_index {
                    println!("│  ├─ Chunk: {}", chunk);
                }
                if let Some(key) = row_key {
                    println!("│  ├─ Key: {}", key);
                }
                println!("│  └─ Counts cover rows processed before the failure");
            }
        }
    }

    fn print_diff(diff: &RowDiff, prefix: &str, child: &str) {
        let label = match diff.status {
            RowStatus::Matched => "matched",
            RowStatus::Mismatched => "mismatched",
            RowStatus::MissingInTarget => "missing in target",
            RowStatus::MissingInSource => "missing in source",
            RowStatus::DuplicateKey => "duplicate key",
        };
        match diff.side {
            Some(side) => println!("{} {} {} ({})", prefix, diff.key, label, side),
            None => println!("{} {} {}", prefix, diff.key, label),
        }
        for (j, cell) in diff.cells.iter().enumerate() {
            let marker = if j == diff.cells.len() - 1 { "└─" } else { "├─" };
            println!(
                "{}{} {}: '{}' → '{}'",
                child, marker, cell.column, cell.source_value, cell.target_value
            );
        }
    }

    /// Print quality check results
    pub fn print_quality(result: &QualityCheckResult) {
        println!("🧪 Quality: {}", result.dataset);
        Self::print_status(&result.status);
        println!("├─ Rows: {}", result.rows);
        for (i, check) in result.checks.iter().enumerate() {
            let last = i == result.checks.len() - 1;
            let prefix = if last { "└─" } else { "├─" };
            let mark = if check.passed { "✅" } else { "❌" };
            println!("{} {} {}", prefix, mark, check.name);
            let child = if last { "   " } else { "│  " };
            if let Some(message) = &check.message {
                println!("{}└─ {}", child, message);
            }
            if let CheckDetail::Duplicates { sample, .. } = &check.detail {
                for entry in sample.iter().take(3) {
                    println!("{}   • {} × {}", child, entry.key, entry.count);
                }
            }
        }
    }

    /// Print the schema reported by a source
    pub fn print_schema(name: &str, columns: &[ColumnInfo]) {
        println!("📋 Schema: {}", name);
        for (i, column) in columns.iter().enumerate() {
            let prefix = if i == columns.len() - 1 { "└─" } else { "├─" };
            let nullable = if column.nullable { "" } else { ", not null" };
            println!("{} {} ({}{})", prefix, column.name, column.data_type, nullable);
        }
    }

    /// Print one line per batch entry
    pub fn print_batch_summary(lines: &[(String, std::result::Result<bool, String>)]) {
        println!("📦 Batch: {} comparisons", lines.len());
        for (i, (name, outcome)) in lines.iter().enumerate() {
            let prefix = if i == lines.len() - 1 { "└─" } else { "├─" };
            match outcome {
                Ok(true) => println!("{} ✅ {}", prefix, name),
                Ok(false) => println!("{} ❌ {}: differences found", prefix, name),
                Err(e) => println!("{} ⚠️  {}: {}", prefix, name, e),
            }
        }
    }
}

/// JSON formatter for machine-readable output
pub struct JsonFormatter;

impl JsonFormatter {
    /// Format any serializable data as JSON
    pub fn format<T: serde::Serialize + ?Sized>(data: &T) -> Result<String> {
        Ok(serde_json::to_string_pretty(data)?)
    }

    /// Write data as pretty JSON and return the number of bytes written
    pub fn write<T: serde::Serialize + ?Sized, P: AsRef<Path>>(data: &T, path: P) -> Result<u64> {
        let json = Self::format(data)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, &json)?;
        Ok(json.len() as u64)
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
