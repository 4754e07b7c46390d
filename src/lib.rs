//! # tabrecon
//!
//! Streaming reconciliation of tabular data: reads a source and a target
//! dataset chunk by chunk from files, databases, HTTP APIs, columnar files
//! or archives, pairs their columns through a declared mapping, matches rows
//! by key and reports row and cell differences alongside data-quality checks.

pub mod cli;
pub mod commands;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod mapping;
pub mod metadata;
pub mod model;
pub mod output;
pub mod pending;
pub mod progress;
pub mod quality;
pub mod result;
pub mod schema;
pub mod sources;

pub use compare::{CompareMode, CompareOptions};
pub use config::RunConfig;
pub use engine::{CancellationToken, Engine, RunReport};
pub use error::{Result, TabreconError};
pub use mapping::ColumnMapping;
pub use quality::{BuiltinRule, BusinessRule, QualityOptions};
pub use result::{ComparisonResult, QualityCheckResult, RowStatus, RunStatus};
pub use sources::{open_source, SourceAdapter, SourceConfig, SourceKind};

/// Default number of rows per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// Default per-source timeout for connecting and for each chunk, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default number of rows sampled for type inference
pub const DEFAULT_INFER_ROWS: usize = 1000;

/// Default cap on the differences kept in a report
pub const DEFAULT_MAX_REPORTED_DIFFS: usize = 1_000;

/// Default in-memory budget for pending rows per side, in bytes
pub const DEFAULT_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

/// Default disk budget for spilled rows per side, in bytes
pub const DEFAULT_SPILL_BUDGET: u64 = 8 * 1024 * 1024 * 1024;

/// Default number of sample keys kept per quality check
pub const DEFAULT_SAMPLE_SIZE: usize = 100;
