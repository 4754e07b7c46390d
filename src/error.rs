//! Error types for tabrecon operations

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TabreconError>;

#[derive(Error, Debug)]
pub enum TabreconError {
    #[error("Connection error ({source_name}): {message}")]
    Connection { source_name: String, message: String },

    #[error("Schema mismatch: {message}")]
    SchemaMismatch { message: String },

    #[error("Malformed row at record {record}: {message}")]
    MalformedRow { record: u64, message: String },

    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },

    #[error("Timed out after {timeout:?} waiting for {source_name}")]
    Timeout { source_name: String, timeout: Duration },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("{source} (chunk {chunk_index}{})", fmt_key(.row_key))]
    AtChunk {
        chunk_index: u64,
        row_key: Option<String>,
        #[source]
        source: Box<TabreconError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

fn fmt_key(row_key: &Option<String>) -> String {
    match row_key {
        Some(key) => format!(", key {}", key),
        None => String::new(),
    }
}

impl TabreconError {
    pub fn connection(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Connection {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: msg.into(),
        }
    }

    pub fn malformed_row(record: u64, msg: impl Into<String>) -> Self {
        Self::MalformedRow {
            record,
            message: msg.into(),
        }
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: msg.into(),
        }
    }

    pub fn timeout(source_name: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            source_name: source_name.into(),
            timeout,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Attach stream position to an error. Errors that already carry a
    /// position are returned unchanged.
    pub fn at_chunk(self, chunk_index: u64, row_key: Option<String>) -> Self {
        match self {
            Self::AtChunk { .. } => self,
            other => Self::AtChunk {
                chunk_index,
                row_key,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any position wrapper removed.
    pub fn root(&self) -> &TabreconError {
        match self {
            Self::AtChunk { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn chunk_index(&self) -> Option<u64> {
        match self {
            Self::AtChunk { chunk_index, .. } => Some(*chunk_index),
            _ => None,
        }
    }

    pub fn row_key(&self) -> Option<&str> {
        match self {
            Self::AtChunk { row_key, .. } => row_key.as_deref(),
            _ => None,
        }
    }
}
