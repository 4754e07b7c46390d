//! Paginated JSON HTTP API sources

use super::inference::{infer_value_type, parse_value, widen, NullTokens};
use super::{RowRead, RowReader, SourceAdapter, SourceConfig, StreamOptions};
use crate::error::{Result, TabreconError};
use crate::model::{ColumnInfo, DataType, Schema, Value};
use indexmap::IndexMap;
use reqwest::blocking::Client;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Paging {
    Single,
    PageNumber { param: String, start: u64 },
    NextLink { field: String },
}

/// Walks the pages of one endpoint
struct PageFetcher {
    name: String,
    client: Client,
    url: String,
    records_field: Option<String>,
    paging: Paging,
    max_pages: Option<u64>,
    timeout: Duration,
    pages_fetched: u64,
    next_url: Option<String>,
    done: bool,
}

impl PageFetcher {
    fn send(&self, url: &str, page: Option<(&str, u64)>) -> Result<serde_json::Value> {
        let mut request = self.client.get(url);
        if let Some((param, number)) = page {
            request = request.query(&[(param, number.to_string())]);
        }
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                TabreconError::timeout(self.name.clone(), self.timeout)
            } else {
                TabreconError::connection(self.name.clone(), e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TabreconError::connection(self.name.clone(), format!("HTTP {} from {}", status, url)));
        }
        Ok(response.json::<serde_json::Value>()?)
    }

    /// Records of the next page, `None` once the endpoint is exhausted
    fn next_page(&mut self) -> Result<Option<Vec<serde_json::Value>>> {
        if self.done || self.max_pages.map(|max| self.pages_fetched >= max).unwrap_or(false) {
            return Ok(None);
        }

        let body = match &self.paging {
            Paging::Single => {
                self.done = true;
                self.send(&self.url, None)?
            }
            Paging::PageNumber { param, start } => {
                let number = start + self.pages_fetched;
                self.send(&self.url, Some((param.as_str(), number)))?
            }
            Paging::NextLink { .. } => {
                let url = match (self.pages_fetched, &self.next_url) {
                    (0, _) => self.url.clone(),
                    (_, Some(next)) => next.clone(),
                    (_, None) => return Ok(None),
                };
                self.send(&url, None)?
            }
        };
        self.pages_fetched += 1;

        if let Paging::NextLink { field } = &self.paging {
            let next = body.get(field.as_str()).and_then(|v| v.as_str()).filter(|s| !s.is_empty());
            self.next_url = next.map(str::to_string);
            if self.next_url.is_none() {
                self.done = true;
            }
        }

        let records = self.extract_records(body)?;
        if records.is_empty() && matches!(self.paging, Paging::PageNumber { .. }) {
            self.done = true;
            return Ok(None);
        }
        log::debug!("{}: page {} returned {} records", self.name, self.pages_fetched, records.len());
        Ok(Some(records))
    }

    fn extract_records(&self, body: serde_json::Value) -> Result<Vec<serde_json::Value>> {
        let records = match (&self.records_field, body) {
            (None, serde_json::Value::Array(items)) => items,
            (Some(field), serde_json::Value::Object(mut object)) => match object.remove(field.as_str()) {
                Some(serde_json::Value::Array(items)) => items,
                Some(serde_json::Value::Null) | None => Vec::new(),
                Some(_) => {
                    return Err(TabreconError::schema_mismatch(format!(
                        "{}: field '{}' is not an array",
                        self.name, field
                    )));
                }
            },
            (None, serde_json::Value::Object(_)) => {
                return Err(TabreconError::config(format!(
                    "{}: response is an object; set 'records_field'",
                    self.name
                )));
            }
            (_, other) => {
                return Err(TabreconError::schema_mismatch(format!(
                    "{}: unexpected response body {}",
                    self.name,
                    json_kind(&other)
                )));
            }
        };
        Ok(records)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn json_type(value: &serde_json::Value, nulls: &NullTokens) -> DataType {
    match value {
        serde_json::Value::Null => DataType::Unknown,
        serde_json::Value::Bool(_) => DataType::Boolean,
        serde_json::Value::Number(n) if n.is_i64() => DataType::Integer,
        serde_json::Value::Number(_) => DataType::Float,
        serde_json::Value::String(s) if nulls.is_null(s) => DataType::Unknown,
        serde_json::Value::String(s) => infer_value_type(s),
        _ => DataType::Text,
    }
}

fn json_to_value(value: &serde_json::Value, data_type: DataType, nulls: &NullTokens) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::float).unwrap_or_else(|| Value::Text(n.to_string())),
        },
        serde_json::Value::String(s) => parse_value(s, data_type, nulls),
        other => Value::Text(other.to_string()),
    }
}

/// HTTP JSON API adapter
pub struct HttpSource {
    url: String,
    client: Client,
    records_field: Option<String>,
    paging: Paging,
    max_pages: Option<u64>,
    nulls: NullTokens,
    infer_rows: usize,
    options: StreamOptions,
    schema: Option<Schema>,
}

impl HttpSource {
    pub fn new(config: &SourceConfig, options: StreamOptions) -> Result<Self> {
        let paging = match (&config.page_param, &config.next_field) {
            (Some(_), Some(_)) => {
                return Err(TabreconError::config("set either 'page_param' or 'next_field', not both"));
            }
            (Some(param), None) => Paging::PageNumber {
                param: param.clone(),
                start: config.page_start.unwrap_or(1),
            },
            (None, Some(field)) => Paging::NextLink { field: field.clone() },
            (None, None) => Paging::Single,
        };
        if matches!(paging, Paging::NextLink { .. }) && config.records_field.is_none() {
            return Err(TabreconError::config("'next_field' pagination needs 'records_field'"));
        }
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            url: config.location.clone(),
            client,
            records_field: config.records_field.clone(),
            paging,
            max_pages: config.max_pages,
            nulls: NullTokens::new(&config.null_values),
            infer_rows: config.infer_rows(),
            options,
            schema: None,
        })
    }

    fn fetcher(&self) -> PageFetcher {
        PageFetcher {
            name: self.describe(),
            client: self.client.clone(),
            url: self.url.clone(),
            records_field: self.records_field.clone(),
            paging: self.paging.clone(),
            max_pages: self.max_pages,
            timeout: self.options.timeout,
            pages_fetched: 0,
            next_url: None,
            done: false,
        }
    }
}

impl SourceAdapter for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn options(&self) -> &StreamOptions {
        &self.options
    }

    fn schema(&mut self) -> Result<Schema> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        let mut fetcher = self.fetcher();
        let mut columns: IndexMap<String, DataType> = IndexMap::new();
        let mut sampled = 0;

        while sampled < self.infer_rows {
            let page = match fetcher.next_page()? {
                Some(page) => page,
                None => break,
            };
            for record in page.iter().take(self.infer_rows - sampled) {
                sampled += 1;
                if let Some(object) = record.as_object() {
                    for (key, value) in object {
                        let seen = columns.entry(key.clone()).or_insert(DataType::Unknown);
                        *seen = widen(*seen, json_type(value, &self.nulls));
                    }
                }
            }
        }

        let schema: Vec<ColumnInfo> = columns
            .into_iter()
            .map(|(name, data_type)| {
                let data_type = if data_type == DataType::Unknown { DataType::Text } else { data_type };
                ColumnInfo::new(name, data_type)
            })
            .collect();
        let schema = Arc::new(schema);
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    fn open_reader(&mut self) -> Result<Box<dyn RowReader>> {
        let schema = self.schema()?;
        Ok(Box::new(HttpReader {
            fetcher: self.fetcher(),
            columns: schema.iter().map(|c| (c.name.clone(), c.data_type)).collect(),
            nulls: self.nulls.clone(),
            buffer: VecDeque::new(),
            record_no: 0,
        }))
    }
}

struct HttpReader {
    fetcher: PageFetcher,
    columns: IndexMap<String, DataType>,
    nulls: NullTokens,
    buffer: VecDeque<serde_json::Value>,
    record_no: u64,
}

impl RowReader for HttpReader {
    fn next_row(&mut self) -> Result<Option<RowRead>> {
        while self.buffer.is_empty() {
            match self.fetcher.next_page()? {
                Some(page) => self.buffer.extend(page),
                None => return Ok(None),
            }
        }
        let record = match self.buffer.pop_front() {
            Some(record) => record,
            None => return Ok(None),
        };
        self.record_no += 1;

        let object = match record.as_object() {
            Some(object) => object,
            None => {
                return Ok(Some(RowRead::Malformed {
                    record: self.record_no,
                    reason: format!("expected an object, found {}", json_kind(&record)),
                }));
            }
        };
        if let Some(unknown) = object.keys().find(|k| !self.columns.contains_key(k.as_str())) {
            return Err(TabreconError::schema_mismatch(format!(
                "{}: record {} has field '{}' not present in the schema",
                self.fetcher.name, self.record_no, unknown
            )));
        }

        let values = self
            .columns
            .iter()
            .map(|(name, data_type)| match object.get(name) {
                Some(value) => json_to_value(value, *data_type, &self.nulls),
                None => Value::Null,
            })
            .collect();
        Ok(Some(RowRead::Row(values)))
    }
}
