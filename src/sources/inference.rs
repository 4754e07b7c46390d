//! Value parsing and column type inference for text-based sources

use crate::model::{ColumnInfo, DataType, Value};
use chrono::{NaiveDate, NaiveDateTime};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Tokens that read as null. The empty string always does.
#[derive(Debug, Clone, Default)]
pub struct NullTokens {
    tokens: Vec<String>,
}

impl NullTokens {
    pub fn new(tokens: &[String]) -> Self {
        Self {
            tokens: tokens.to_vec(),
        }
    }

    pub fn is_null(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.is_empty() || self.tokens.iter().any(|t| t == trimmed)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Narrowest type a single non-null text value fits
pub fn infer_value_type(raw: &str) -> DataType {
    let value = raw.trim();
    if value.parse::<i64>().is_ok() {
        DataType::Integer
    } else if value.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false) {
        DataType::Float
    } else if parse_bool(value).is_some() {
        DataType::Boolean
    } else if parse_date(value).is_some() {
        DataType::Date
    } else if parse_timestamp(value).is_some() {
        DataType::Timestamp
    } else {
        DataType::Text
    }
}

/// Smallest type that holds both `a` and `b`
pub(crate) fn widen(a: DataType, b: DataType) -> DataType {
    use DataType::*;
    match (a, b) {
        (Unknown, t) | (t, Unknown) => t,
        (x, y) if x == y => x,
        (Integer, Float) | (Float, Integer) => Float,
        (Date, Timestamp) | (Timestamp, Date) => Timestamp,
        _ => Text,
    }
}

/// Infer a column type from sampled raw values; nulls are ignored
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a str>, nulls: &NullTokens) -> DataType {
    values
        .into_iter()
        .filter(|v| !nulls.is_null(v))
        .fold(DataType::Unknown, |acc, v| {
            if acc == DataType::Text {
                acc
            } else {
                widen(acc, infer_value_type(v))
            }
        })
}

/// Build a schema from column names and a row-major sample of raw values.
/// Sample rows shorter than `names` contribute only the fields they have.
pub fn infer_schema(names: &[String], sample: &[Vec<String>], nulls: &NullTokens) -> Vec<ColumnInfo> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let data_type = infer_column_type(sample.iter().filter_map(|row| row.get(i).map(String::as_str)), nulls);
            // Columns with no sampled values stay text
            let data_type = if data_type == DataType::Unknown {
                DataType::Text
            } else {
                data_type
            };
            ColumnInfo::new(name.clone(), data_type)
        })
        .collect()
}

/// Parse a raw field under its column type. Values that do not fit the
/// inferred type fall back to text rather than failing the row.
pub fn parse_value(raw: &str, data_type: DataType, nulls: &NullTokens) -> Value {
    if nulls.is_null(raw) {
        return Value::Null;
    }
    let trimmed = raw.trim();
    let parsed = match data_type {
        DataType::Integer => trimmed.parse::<i64>().ok().map(Value::Int),
        DataType::Float => trimmed.parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::Float),
        DataType::Boolean => parse_bool(trimmed).map(Value::Bool),
        DataType::Date => parse_date(trimmed).map(Value::Date),
        DataType::Timestamp => parse_timestamp(trimmed)
            .map(Value::Timestamp)
            .or_else(|| parse_date(trimmed).and_then(|d| d.and_hms_opt(0, 0, 0)).map(Value::Timestamp)),
        DataType::Text | DataType::Unknown => None,
    };
    parsed.unwrap_or_else(|| Value::Text(raw.to_string()))
}

/// Default column names for header-less sources
pub fn default_column_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("column_{}", i)).collect()
}
