//! Source adapters: every physical source type is turned into a lazy,
//! restartable stream of [`Chunk`]s over the common model.
//!
//! An adapter reports its schema up front ([`SourceAdapter::schema`]) and
//! hands out a fresh [`RowReader`] each time it is opened. [`ChunkStream`]
//! sits on top of the reader and owns everything that is common to all
//! variants: chunk sizing and numbering, the malformed-row policy, row width
//! checks, and attaching chunk positions to errors.

pub mod archive;
pub mod columnar;
pub mod database;
pub mod delimited;
pub mod fixed_width;
pub mod http;
pub mod inference;
pub mod producer;

use crate::error::{Result, TabreconError};
use crate::model::{Chunk, Row, Schema, Value};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use archive::ArchiveSource;
pub use columnar::ColumnarSource;
pub use database::DatabaseSource;
pub use delimited::DelimitedSource;
pub use fixed_width::FixedWidthSource;
pub use http::HttpSource;

/// Physical source variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[serde(alias = "csv", alias = "dat", alias = "txt", alias = "tsv")]
    Delimited,
    FixedWidth,
    #[serde(alias = "database", alias = "sql")]
    Table,
    #[serde(alias = "procedure", alias = "stored_proc")]
    StoredProcedure,
    #[serde(alias = "api")]
    Http,
    #[serde(alias = "parquet")]
    Columnar,
    #[serde(alias = "zip", alias = "bundle")]
    Archive,
}

impl SourceKind {
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "delimited" | "csv" | "dat" | "txt" | "tsv" => Ok(Self::Delimited),
            "fixed_width" | "fixed" => Ok(Self::FixedWidth),
            "table" | "database" | "sql" => Ok(Self::Table),
            "stored_procedure" | "procedure" | "stored_proc" => Ok(Self::StoredProcedure),
            "http" | "api" => Ok(Self::Http),
            "columnar" | "parquet" => Ok(Self::Columnar),
            "archive" | "zip" | "bundle" => Ok(Self::Archive),
            _ => Err(format!(
                "Invalid source type: {}. Use 'delimited', 'fixed_width', 'table', \
                 'stored_procedure', 'http', 'columnar' or 'archive'",
                s
            )),
        }
    }

    /// Guess the kind from a location string
    pub fn detect(location: &str) -> Self {
        let lower = location.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Self::Http;
        }
        if lower.ends_with(".zip")
            || lower.ends_with(".tar")
            || lower.ends_with(".tar.zst")
            || lower.ends_with(".tzst")
            || Path::new(location).is_dir()
        {
            return Self::Archive;
        }
        if lower.ends_with(".parquet") {
            return Self::Columnar;
        }
        if lower.ends_with(".duckdb") || lower.ends_with(".db") {
            return Self::Table;
        }
        Self::Delimited
    }
}

/// What to do with a row that cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRowPolicy {
    /// Skip the row and count it
    Skip,
    /// Abort the run
    #[default]
    Fail,
}

/// Configuration for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub location: String,
    /// Field separator for delimited formats
    #[serde(default)]
    pub separator: Option<char>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub has_header: bool,
    /// Extra tokens read as null besides the empty string
    #[serde(default)]
    pub null_values: Vec<String>,
    /// Explicit column names for header-less files
    #[serde(default)]
    pub columns: Vec<String>,
    /// Field widths for fixed-width files
    #[serde(default)]
    pub widths: Vec<usize>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub procedure: Option<String>,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Field of a JSON response object that holds the record array
    #[serde(default)]
    pub records_field: Option<String>,
    /// Query parameter carrying the page number
    #[serde(default)]
    pub page_param: Option<String>,
    #[serde(default)]
    pub page_start: Option<u64>,
    /// Field of a JSON response object that holds the next page URL
    #[serde(default)]
    pub next_field: Option<String>,
    #[serde(default)]
    pub max_pages: Option<u64>,
    #[serde(default)]
    pub malformed_rows: MalformedRowPolicy,
    /// Rows sampled for type inference
    #[serde(default)]
    pub infer_rows: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    pub fn new(kind: SourceKind, location: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            separator: None,
            chunk_size: None,
            timeout_secs: None,
            has_header: true,
            null_values: Vec::new(),
            columns: Vec::new(),
            widths: Vec::new(),
            table: None,
            query: None,
            procedure: None,
            args: Vec::new(),
            records_field: None,
            page_param: None,
            page_start: None,
            next_field: None,
            max_pages: None,
            malformed_rows: MalformedRowPolicy::Fail,
            infer_rows: None,
        }
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = Some(separator);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn stream_options(&self, default_chunk_size: usize) -> StreamOptions {
        StreamOptions {
            chunk_size: self.chunk_size.unwrap_or(default_chunk_size).max(1),
            malformed_rows: self.malformed_rows,
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(crate::DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub fn infer_rows(&self) -> usize {
        self.infer_rows.unwrap_or(crate::DEFAULT_INFER_ROWS).max(1)
    }
}

/// Settings shared by every stream
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub chunk_size: usize,
    pub malformed_rows: MalformedRowPolicy,
    pub timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            malformed_rows: MalformedRowPolicy::Fail,
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Outcome of reading one record
#[derive(Debug, Clone, PartialEq)]
pub enum RowRead {
    Row(Vec<Value>),
    /// The record could not be decoded; `record` is its 1-based position
    Malformed { record: u64, reason: String },
}

/// Row-at-a-time reader handed out by an adapter
pub trait RowReader: Send {
    /// Next record, `None` at end of input. Errors are fatal.
    fn next_row(&mut self) -> Result<Option<RowRead>>;
}

/// Capability set shared by all source variants
pub trait SourceAdapter: Send {
    /// Human-readable name for logs and errors
    fn describe(&self) -> String;

    fn options(&self) -> &StreamOptions;

    /// Column list and inferred types, available before streaming
    fn schema(&mut self) -> Result<Schema>;

    /// Open a reader positioned at the first data row
    fn open_reader(&mut self) -> Result<Box<dyn RowReader>>;

    /// Start a new chunk stream from the beginning of the source
    fn stream(&mut self) -> Result<ChunkStream> {
        let schema = self.schema()?;
        let reader = self.open_reader()?;
        Ok(ChunkStream::new(self.describe(), schema, reader, self.options().clone()))
    }
}

/// Build the adapter for a source configuration
pub fn open_source(config: &SourceConfig, default_chunk_size: usize) -> Result<Box<dyn SourceAdapter>> {
    let options = config.stream_options(default_chunk_size);
    let adapter: Box<dyn SourceAdapter> = match config.kind {
        SourceKind::Delimited => Box::new(DelimitedSource::new(config, options)?),
        SourceKind::FixedWidth => Box::new(FixedWidthSource::new(config, options)?),
        SourceKind::Table | SourceKind::StoredProcedure => Box::new(DatabaseSource::new(config, options)?),
        SourceKind::Http => Box::new(HttpSource::new(config, options)?),
        SourceKind::Columnar => Box::new(ColumnarSource::new(config, options)?),
        SourceKind::Archive => Box::new(ArchiveSource::new(config, options)?),
    };
    log::debug!("Opened {} source: {}", format!("{:?}", config.kind).to_lowercase(), adapter.describe());
    Ok(adapter)
}

/// Check that a file location exists before any streaming starts
pub(crate) fn require_path(name: &str, location: &str) -> Result<std::path::PathBuf> {
    let path = Path::new(location);
    if !path.exists() {
        return Err(TabreconError::connection(name, format!("File not found: {}", path.display())));
    }
    Ok(path.to_path_buf())
}

/// Lazy sequence of chunks over one source
pub struct ChunkStream {
    name: String,
    schema: Schema,
    reader: Option<Box<dyn RowReader>>,
    options: StreamOptions,
    next_index: u64,
    rows_read: u64,
    skipped: u64,
}

impl ChunkStream {
    pub fn new(name: String, schema: Schema, reader: Box<dyn RowReader>, options: StreamOptions) -> Self {
        Self {
            name,
            schema,
            reader: Some(reader),
            options,
            next_index: 0,
            rows_read: 0,
            skipped: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Rows yielded so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Malformed rows skipped so far
    pub fn skipped_rows(&self) -> u64 {
        self.skipped
    }

    /// Release the underlying reader; the stream yields nothing afterwards
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            log::debug!("Closed stream {}", self.name);
        }
    }

    fn fail(&mut self, error: TabreconError) -> Option<Result<Chunk>> {
        let index = self.next_index;
        self.close();
        Some(Err(error.at_chunk(index, None)))
    }
}

impl Iterator for ChunkStream {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut rows = Vec::with_capacity(self.options.chunk_size.min(crate::DEFAULT_CHUNK_SIZE));
        let width = self.schema.len();

        while rows.len() < self.options.chunk_size {
            let reader = match self.reader.as_mut() {
                Some(reader) => reader,
                None => break,
            };
            match reader.next_row() {
                Ok(Some(RowRead::Row(values))) => {
                    if values.len() != width {
                        let message = format!(
                            "{}: row has {} values but the schema has {} columns",
                            self.name,
                            values.len(),
                            width
                        );
                        return self.fail(TabreconError::schema_mismatch(message));
                    }
                    rows.push(Row::new(values));
                }
                Ok(Some(RowRead::Malformed { record, reason })) => match self.options.malformed_rows {
                    MalformedRowPolicy::Skip => {
                        self.skipped += 1;
                        log::debug!("{}: skipping malformed record {}: {}", self.name, record, reason);
                    }
                    MalformedRowPolicy::Fail => {
                        return self.fail(TabreconError::malformed_row(record, reason));
                    }
                },
                Ok(None) => {
                    self.close();
                }
                Err(e) => return self.fail(e),
            }
        }

        if rows.is_empty() {
            return None;
        }

        let chunk = Chunk {
            index: self.next_index,
            columns: self.schema.clone(),
            rows,
        };
        self.next_index += 1;
        self.rows_read += chunk.len() as u64;
        Some(Ok(chunk))
    }
}
