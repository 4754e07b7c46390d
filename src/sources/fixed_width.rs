//! Fixed-width text sources

use super::inference::{default_column_names, infer_schema, parse_value, NullTokens};
use super::{require_path, RowRead, RowReader, SourceAdapter, SourceConfig, StreamOptions};
use crate::error::{Result, TabreconError};
use crate::model::{DataType, Schema};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;
use std::sync::Arc;

/// Split a line into fields by character widths. The last field may be
/// short; a line that ends before the last field starts is malformed.
fn split_line(line: &str, widths: &[usize]) -> Option<Vec<String>> {
    let chars: Vec<char> = line.trim_end_matches(['\r', '\n']).chars().collect();
    let last_start: usize = widths[..widths.len().saturating_sub(1)].iter().sum();
    if chars.len() < last_start {
        return None;
    }
    let mut fields = Vec::with_capacity(widths.len());
    let mut start = 0;
    for width in widths {
        let end = (start + width).min(chars.len());
        let field: String = chars[start..end].iter().collect();
        fields.push(field.trim().to_string());
        start += width;
    }
    Some(fields)
}

/// Fixed-width file adapter
pub struct FixedWidthSource {
    path: PathBuf,
    widths: Vec<usize>,
    has_header: bool,
    columns: Vec<String>,
    nulls: NullTokens,
    infer_rows: usize,
    options: StreamOptions,
    schema: Option<Schema>,
}

impl FixedWidthSource {
    pub fn new(config: &SourceConfig, options: StreamOptions) -> Result<Self> {
        if config.widths.is_empty() || config.widths.contains(&0) {
            return Err(TabreconError::config("fixed_width sources need non-zero 'widths'"));
        }
        if !config.columns.is_empty() && config.columns.len() != config.widths.len() {
            return Err(TabreconError::config(format!(
                "{} column names given for {} widths",
                config.columns.len(),
                config.widths.len()
            )));
        }
        Ok(Self {
            path: PathBuf::from(&config.location),
            widths: config.widths.clone(),
            has_header: config.has_header,
            columns: config.columns.clone(),
            nulls: NullTokens::new(&config.null_values),
            infer_rows: config.infer_rows(),
            options,
            schema: None,
        })
    }

    /// Data lines, with the header consumed when present
    fn open_lines(&self) -> Result<(Option<String>, Lines<BufReader<File>>)> {
        let path = require_path(&self.describe(), &self.path.to_string_lossy())?;
        let mut lines = BufReader::new(File::open(path)?).lines();
        let header = if self.has_header { lines.next().transpose()? } else { None };
        Ok((header, lines))
    }
}

impl SourceAdapter for FixedWidthSource {
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
        let (header, lines) = self.open_lines()?;

        let names = if !self.columns.is_empty() {
            self.columns.clone()
        } else if let Some(header) = header {
            split_line(&header, &self.widths)
                .ok_or_else(|| TabreconError::schema_mismatch("header line is shorter than the declared widths"))?
        } else {
            default_column_names(self.widths.len())
        };

        let mut sample = Vec::new();
        for line in lines.filter(|l| l.as_ref().map(|s| !s.trim().is_empty()).unwrap_or(true)) {
            if sample.len() >= self.infer_rows {
                break;
            }
            if let Some(fields) = split_line(&line?, &self.widths) {
                sample.push(fields);
            }
        }

        let schema = Arc::new(infer_schema(&names, &sample, &self.nulls));
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    fn open_reader(&mut self) -> Result<Box<dyn RowReader>> {
        let schema = self.schema()?;
        let (_, lines) = self.open_lines()?;
        Ok(Box::new(FixedWidthReader {
            lines,
            widths: self.widths.clone(),
            types: schema.iter().map(|c| c.data_type).collect(),
            nulls: self.nulls.clone(),
            record_no: 0,
        }))
    }
}

struct FixedWidthReader {
    lines: Lines<BufReader<File>>,
    widths: Vec<usize>,
    types: Vec<DataType>,
    nulls: NullTokens,
    record_no: u64,
}

impl RowReader for FixedWidthReader {
    fn next_row(&mut self) -> Result<Option<RowRead>> {
        loop {
            let line = match self.lines.next() {
                None => return Ok(None),
                Some(line) => line?,
            };
            if line.trim().is_empty() {
                continue;
            }
            self.record_no += 1;
            let read = match split_line(&line, &self.widths) {
                Some(fields) => RowRead::Row(
                    fields
                        .iter()
                        .zip(&self.types)
                        .map(|(raw, data_type)| parse_value(raw, *data_type, &self.nulls))
                        .collect(),
                ),
                None => RowRead::Malformed {
                    record: self.record_no,
                    reason: format!("line has {} characters, too short for widths", line.chars().count()),
                },
            };
            return Ok(Some(read));
        }
    }
}
