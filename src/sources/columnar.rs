//! Columnar (Parquet) file sources

use super::producer;
use super::{require_path, RowRead, RowReader, SourceAdapter, SourceConfig, StreamOptions};
use crate::error::Result;
use crate::model::{ColumnInfo, DataType, Schema, Value};
use chrono::{DateTime, NaiveDate};
use parquet::basic::{ConvertedType, LogicalType, Type as PhysicalType};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use parquet::schema::types::Type;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// Logical type of a top-level Parquet field
fn field_type(field: &Type) -> DataType {
    if !field.is_primitive() {
        return DataType::Text;
    }
    let info = field.get_basic_info();
    match info.logical_type() {
        Some(LogicalType::String) | Some(LogicalType::Enum) | Some(LogicalType::Json) => return DataType::Text,
        Some(LogicalType::Date) => return DataType::Date,
        Some(LogicalType::Timestamp { .. }) => return DataType::Timestamp,
        Some(LogicalType::Decimal { .. }) => return DataType::Float,
        _ => {}
    }
    match info.converted_type() {
        ConvertedType::UTF8 | ConvertedType::ENUM | ConvertedType::JSON => return DataType::Text,
        ConvertedType::DATE => return DataType::Date,
        ConvertedType::TIMESTAMP_MILLIS | ConvertedType::TIMESTAMP_MICROS => return DataType::Timestamp,
        ConvertedType::DECIMAL => return DataType::Float,
        _ => {}
    }
    match field.get_physical_type() {
        PhysicalType::BOOLEAN => DataType::Boolean,
        PhysicalType::INT32 | PhysicalType::INT64 => DataType::Integer,
        PhysicalType::INT96 => DataType::Timestamp,
        PhysicalType::FLOAT | PhysicalType::DOUBLE => DataType::Float,
        PhysicalType::BYTE_ARRAY | PhysicalType::FIXED_LEN_BYTE_ARRAY => DataType::Text,
    }
}

/// Convert a Parquet record field into the common model
fn value_from_field(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(i) => Value::Int(*i as i64),
        Field::Short(i) => Value::Int(*i as i64),
        Field::Int(i) => Value::Int(*i as i64),
        Field::Long(i) => Value::Int(*i),
        Field::UByte(i) => Value::Int(*i as i64),
        Field::UShort(i) => Value::Int(*i as i64),
        Field::UInt(i) => Value::Int(*i as i64),
        Field::ULong(i) => i64::try_from(*i).map(Value::Int).unwrap_or_else(|_| Value::Text(i.to_string())),
        Field::Float(f) => Value::float(*f as f64),
        Field::Double(f) => Value::float(*f),
        Field::Str(s) => Value::Text(s.clone()),
        Field::Bytes(b) => Value::Text(String::from_utf8_lossy(b.data()).to_string()),
        Field::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(*days as i64)))
            .map(Value::Date)
            .unwrap_or(Value::Null),
        Field::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms)
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .unwrap_or(Value::Null),
        Field::TimestampMicros(us) => DateTime::from_timestamp_micros(*us)
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .unwrap_or(Value::Null),
        Field::Decimal(_) => {
            let text = field.to_string();
            text.parse::<f64>().map(Value::float).unwrap_or(Value::Text(text))
        }
        other => Value::Text(other.to_string()),
    }
}

/// Parquet file adapter
pub struct ColumnarSource {
    path: PathBuf,
    options: StreamOptions,
    schema: Option<Schema>,
}

impl ColumnarSource {
    pub fn new(config: &SourceConfig, options: StreamOptions) -> Result<Self> {
        Ok(Self {
            path: PathBuf::from(&config.location),
            options,
            schema: None,
        })
    }

    fn open(&self) -> Result<SerializedFileReader<File>> {
        let path = require_path(&self.describe(), &self.path.to_string_lossy())?;
        Ok(SerializedFileReader::new(File::open(path)?)?)
    }
}

impl SourceAdapter for ColumnarSource {
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
        let reader = self.open()?;
        let descr = reader.metadata().file_metadata().schema_descr();
        let columns: Vec<ColumnInfo> = descr
            .root_schema()
            .get_fields()
            .iter()
            .map(|field| ColumnInfo {
                name: field.name().to_string(),
                data_type: field_type(field),
                nullable: field.is_optional(),
            })
            .collect();
        log::debug!(
            "{}: {} columns, {} rows",
            self.describe(),
            columns.len(),
            reader.metadata().file_metadata().num_rows()
        );
        let schema = Arc::new(columns);
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    fn open_reader(&mut self) -> Result<Box<dyn RowReader>> {
        self.schema()?;
        let reader = self.open()?;
        let reader = producer::spawn(self.describe(), self.options.timeout, move |sink| {
            for row in reader.into_iter() {
                let row = row?;
                let values = row.get_column_iter().map(|(_, field)| value_from_field(field)).collect();
                sink.send(RowRead::Row(values))?;
            }
            Ok(())
        })?;
        Ok(Box::new(reader))
    }
}
