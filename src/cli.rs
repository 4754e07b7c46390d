//! Command-line interface for tabrecon

use crate::sources::SourceKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tabrecon")]
#[command(about = "Streaming source/target reconciliation and data-quality checks")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a comparison described by a JSON configuration file
    Run {
        /// Run configuration file
        config: PathBuf,

        /// Write the JSON report to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Read both sides on separate threads
        #[arg(long)]
        parallel: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare two sources
    Compare {
        /// Source location (file, directory, database or URL)
        source: String,

        /// Target location
        target: String,

        /// Source type (detected from the location when omitted)
        #[arg(long, value_parser = SourceKind::parse)]
        source_type: Option<SourceKind>,

        /// Target type (detected from the location when omitted)
        #[arg(long, value_parser = SourceKind::parse)]
        target_type: Option<SourceKind>,

        /// Source field separator
        #[arg(long)]
        source_separator: Option<char>,

        /// Target field separator
        #[arg(long)]
        target_separator: Option<char>,

        /// Key column (target-side name); repeat for composite keys
        #[arg(long = "key")]
        keys: Vec<String>,

        /// Column mapping as "source:target,source:target"
        #[arg(long = "map")]
        mapping: Option<String>,

        /// Comma-separated columns to leave out of the comparison
        #[arg(long)]
        ignore: Option<String>,

        /// Maximum number of differences kept in the report
        #[arg(long, default_value_t = crate::DEFAULT_MAX_REPORTED_DIFFS)]
        max_diffs: usize,

        /// Rows per chunk (must be > 0)
        #[arg(long, default_value_t = crate::DEFAULT_CHUNK_SIZE, value_parser = validate_chunk_size)]
        chunk_size: usize,

        /// Both inputs are sorted by key
        #[arg(long)]
        sorted: bool,

        /// Read both sides on separate threads
        #[arg(long)]
        parallel: bool,

        /// Write the JSON report to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run data-quality checks over one source
    Check {
        /// Input location
        input: String,

        /// Input type (detected from the location when omitted)
        #[arg(long = "type", value_parser = SourceKind::parse)]
        kind: Option<SourceKind>,

        /// Field separator
        #[arg(long)]
        separator: Option<char>,

        /// Key column for duplicate detection; repeat for composite keys
        #[arg(long = "key")]
        keys: Vec<String>,

        /// Expected number of rows
        #[arg(long)]
        expected_rows: Option<u64>,

        /// Maximum allowed null ratio per column (0.0 to 1.0)
        #[arg(long, value_parser = validate_ratio)]
        max_null_ratio: Option<f64>,

        /// Write the JSON result to this file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the schema a source reports
    Schema {
        /// Input location
        input: String,

        /// Input type (detected from the location when omitted)
        #[arg(long = "type", value_parser = SourceKind::parse)]
        kind: Option<SourceKind>,

        /// Field separator
        #[arg(long)]
        separator: Option<char>,
    },

    /// Run every comparison listed in a metadata CSV
    Batch {
        /// Metadata file
        metadata: PathBuf,

        /// Directory for one JSON report per comparison
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

/// Validate that chunk size is greater than 0
fn validate_chunk_size(s: &str) -> Result<usize, String> {
    let chunk_size: usize = s
        .parse()
        .map_err(|_| format!("Invalid chunk size: '{}'. Must be a positive integer.", s))?;

    if chunk_size == 0 {
        return Err("Chunk size must be greater than 0".to_string());
    }

    Ok(chunk_size)
}

fn validate_ratio(s: &str) -> Result<f64, String> {
    let ratio: f64 = s.parse().map_err(|_| format!("Invalid ratio: '{}'", s))?;
    if !(0.0..=1.0).contains(&ratio) {
        return Err(format!("Ratio must be between 0 and 1: {}", ratio));
    }
    Ok(ratio)
}
