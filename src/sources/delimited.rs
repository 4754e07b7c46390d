//! Delimited text sources (CSV, pipe-separated DAT, TSV)

use super::inference::{default_column_names, infer_schema, parse_value, NullTokens};
use super::{require_path, RowRead, RowReader, SourceAdapter, SourceConfig, StreamOptions};
use crate::error::{Result, TabreconError};
use crate::model::{ColumnInfo, DataType, Schema};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

/// Separator used when none is configured, chosen by file extension
pub fn default_separator(location: &str) -> char {
    let lower = location.to_lowercase();
    if lower.ends_with(".dat") {
        '|'
    } else if lower.ends_with(".tsv") {
        '\t'
    } else {
        ','
    }
}

/// Settings shared by every reader of delimited text
#[derive(Debug, Clone)]
pub(crate) struct TextSettings {
    pub separator: u8,
    pub has_header: bool,
    pub columns: Vec<String>,
    pub nulls: NullTokens,
    pub infer_rows: usize,
}

impl TextSettings {
    pub fn from_config(config: &SourceConfig, fallback_separator: char) -> Result<Self> {
        let separator = config.separator.unwrap_or(fallback_separator);
        if !separator.is_ascii() {
            return Err(TabreconError::config(format!(
                "Separator must be a single ASCII character, got '{}'",
                separator
            )));
        }
        Ok(Self {
            separator: separator as u8,
            has_header: config.has_header,
            columns: config.columns.clone(),
            nulls: NullTokens::new(&config.null_values),
            infer_rows: config.infer_rows(),
        })
    }

    pub fn reader<R: Read>(&self, input: R) -> csv::Reader<R> {
        ReaderBuilder::new()
            .delimiter(self.separator)
            .has_headers(self.has_header)
            .flexible(true)
            .from_reader(input)
    }

    /// Read the header (if any) and sample rows, then infer the schema
    pub fn sniff<R: Read>(&self, reader: &mut csv::Reader<R>) -> Result<Vec<ColumnInfo>> {
        let header: Vec<String> = if self.has_header {
            reader.headers()?.iter().map(|h| h.trim().to_string()).collect()
        } else {
            Vec::new()
        };

        let mut sample = Vec::new();
        for record in reader.records().take(self.infer_rows) {
            match record {
                Ok(record) => sample.push(record.iter().map(str::to_string).collect::<Vec<_>>()),
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(_) => continue,
            }
        }

        let names = if !self.columns.is_empty() {
            let width = if self.has_header {
                header.len()
            } else {
                sample.first().map(Vec::len).unwrap_or(self.columns.len())
            };
            if width != self.columns.len() {
                return Err(TabreconError::config(format!(
                    "{} column names given but the data has {} fields",
                    self.columns.len(),
                    width
                )));
            }
            self.columns.clone()
        } else if self.has_header {
            header
        } else {
            default_column_names(sample.first().map(Vec::len).unwrap_or(0))
        };

        Ok(infer_schema(&names, &sample, &self.nulls))
    }
}

/// Turns csv records into typed rows
#[derive(Debug, Clone)]
pub(crate) struct RecordDecoder {
    types: Vec<DataType>,
    nulls: NullTokens,
}

impl RecordDecoder {
    pub fn new(schema: &[ColumnInfo], nulls: NullTokens) -> Self {
        Self {
            types: schema.iter().map(|c| c.data_type).collect(),
            nulls,
        }
    }

    pub fn decode(&self, record: &StringRecord, record_no: u64) -> RowRead {
        if record.len() != self.types.len() {
            return RowRead::Malformed {
                record: record_no,
                reason: format!("expected {} fields, found {}", self.types.len(), record.len()),
            };
        }
        RowRead::Row(
            record
                .iter()
                .zip(&self.types)
                .map(|(raw, data_type)| parse_value(raw, *data_type, &self.nulls))
                .collect(),
        )
    }

    /// Decode one csv read. Encoding problems are malformed rows; I/O errors are fatal.
    pub fn decode_result(&self, result: csv::Result<StringRecord>, record_no: u64) -> Result<RowRead> {
        match result {
            Ok(record) => Ok(self.decode(&record, record_no)),
            Err(e) if e.is_io_error() => Err(e.into()),
            Err(e) => Ok(RowRead::Malformed {
                record: record_no,
                reason: e.to_string(),
            }),
        }
    }
}

/// Delimited file adapter
pub struct DelimitedSource {
    path: PathBuf,
    settings: TextSettings,
    options: StreamOptions,
    schema: Option<Schema>,
}

impl DelimitedSource {
    pub fn new(config: &SourceConfig, options: StreamOptions) -> Result<Self> {
        let settings = TextSettings::from_config(config, default_separator(&config.location))?;
        Ok(Self {
            path: PathBuf::from(&config.location),
            settings,
            options,
            schema: None,
        })
    }

    fn open_file(&self) -> Result<File> {
        let path = require_path(&self.describe(), &self.path.to_string_lossy())?;
        Ok(File::open(path)?)
    }
}

impl SourceAdapter for DelimitedSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn options(&self) -> &StreamOptions {
        &self.options
    }

    fn schema(&mut self) -> Result<Schema> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        let mut reader = self.settings.reader(self.open_file()?);
        let schema = Arc::new(self.settings.sniff(&mut reader)?);
        log::debug!("Inferred {} columns for {}", schema.len(), self.describe());
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    fn open_reader(&mut self) -> Result<Box<dyn RowReader>> {
        let schema = self.schema()?;
        let reader = self.settings.reader(self.open_file()?);
        Ok(Box::new(DelimitedReader {
            records: reader.into_records(),
            decoder: RecordDecoder::new(&schema, self.settings.nulls.clone()),
            record_no: 0,
        }))
    }
}

struct DelimitedReader {
    records: csv::StringRecordsIntoIter<File>,
    decoder: RecordDecoder,
    record_no: u64,
}

impl RowReader for DelimitedReader {
    fn next_row(&mut self) -> Result<Option<RowRead>> {
        match self.records.next() {
            None => Ok(None),
            Some(result) => {
                self.record_no += 1;
                self.decoder.decode_result(result, self.record_no).map(Some)
            }
        }
    }
}
