//! Relational sources over DuckDB: tables, ad-hoc queries and stored
//! procedures (DuckDB table macros)

use super::producer;
use super::{RowRead, RowReader, SourceAdapter, SourceConfig, SourceKind, StreamOptions};
use crate::error::{Result, TabreconError};
use crate::model::{ColumnInfo, DataType, Schema, Value};
use chrono::{DateTime, NaiveDate};
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::{AccessMode, Config, Connection};
use std::path::Path;
use std::sync::Arc;

const IN_MEMORY: &str = ":memory:";

/// What to select from the database
#[derive(Debug, Clone)]
enum Relation {
    Table(String),
    Query(String),
    Procedure { name: String, args: Vec<serde_json::Value> },
}

/// DuckDB-backed table, query or stored procedure adapter
pub struct DatabaseSource {
    location: String,
    relation: Relation,
    options: StreamOptions,
    schema: Option<Schema>,
}

/// Quote an identifier, keeping schema qualification (`main.orders`)
fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.trim_matches('"').replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Render a JSON argument as a SQL literal
fn sql_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn open_connection(name: &str, location: &str) -> Result<Connection> {
    let result = if location == IN_MEMORY || location.is_empty() {
        Connection::open_in_memory()
    } else {
        if !Path::new(location).exists() {
            return Err(TabreconError::connection(name, format!("Database not found: {}", location)));
        }
        Config::default()
            .access_mode(AccessMode::ReadOnly)
            .and_then(|config| Connection::open_with_flags(location, config))
    };
    result.map_err(|e| TabreconError::connection(name, e.to_string()))
}

/// Classify DuckDB failures that mean the relation is not there
fn convert_duckdb_error(error: duckdb::Error, name: &str) -> TabreconError {
    let message = error.to_string();
    if message.contains("does not exist") || message.contains("Catalog Error") {
        TabreconError::connection(name, message)
    } else if message.contains("Permission denied") {
        TabreconError::connection(name, format!("Permission denied: {}", message))
    } else {
        TabreconError::DuckDb(error)
    }
}

fn timestamp_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

/// Convert a DuckDB cell into the common model
fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i as i64),
        ValueRef::SmallInt(i) => Value::Int(i as i64),
        ValueRef::Int(i) => Value::Int(i as i64),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::HugeInt(i) => i64::try_from(i).map(Value::Int).unwrap_or_else(|_| Value::Text(i.to_string())),
        ValueRef::UTinyInt(i) => Value::Int(i as i64),
        ValueRef::USmallInt(i) => Value::Int(i as i64),
        ValueRef::UInt(i) => Value::Int(i as i64),
        ValueRef::UBigInt(i) => i64::try_from(i).map(Value::Int).unwrap_or_else(|_| Value::Text(i.to_string())),
        ValueRef::Float(f) => Value::float(f as f64),
        ValueRef::Double(f) => Value::float(f),
        ValueRef::Decimal(d) => {
            let text = d.to_string();
            text.parse::<f64>().map(Value::float).unwrap_or(Value::Text(text))
        }
        ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Text(format!("<blob:{} bytes>", b.len())),
        ValueRef::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days as i64)))
            .map(Value::Date)
            .unwrap_or(Value::Null),
        ValueRef::Timestamp(unit, ts) => DateTime::from_timestamp_micros(timestamp_micros(unit, ts))
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .unwrap_or(Value::Null),
        ValueRef::Time64(unit, t) => {
            let micros = timestamp_micros(unit, t);
            Value::Text(format!(
                "{:02}:{:02}:{:02}.{:06}",
                micros / 3_600_000_000,
                (micros / 60_000_000) % 60,
                (micros / 1_000_000) % 60,
                micros % 1_000_000
            ))
        }
        other => Value::Text(format!("{:?}", other)),
    }
}

impl DatabaseSource {
    pub fn new(config: &SourceConfig, options: StreamOptions) -> Result<Self> {
        let relation = match config.kind {
            SourceKind::StoredProcedure => {
                let name = config
                    .procedure
                    .clone()
                    .ok_or_else(|| TabreconError::config("stored_procedure sources need a 'procedure'"))?;
                Relation::Procedure {
                    name,
                    args: config.args.clone(),
                }
            }
            _ => match (&config.query, &config.table) {
                (Some(query), _) => Relation::Query(query.clone()),
                (None, Some(table)) => Relation::Table(table.clone()),
                (None, None) => {
                    return Err(TabreconError::config("table sources need a 'table' or a 'query'"));
                }
            },
        };
        Ok(Self {
            location: config.location.clone(),
            relation,
            options,
            schema: None,
        })
    }

    fn select_sql(&self) -> String {
        match &self.relation {
            Relation::Table(table) => format!("SELECT * FROM {}", quote_identifier(table)),
            Relation::Query(query) => query.trim().trim_end_matches(';').to_string(),
            Relation::Procedure { name, args } => format!(
                "SELECT * FROM {}({})",
                quote_identifier(name),
                args.iter().map(sql_literal).collect::<Vec<_>>().join(", ")
            ),
        }
    }

    fn check_procedure(&self, connection: &Connection) -> Result<()> {
        if let Relation::Procedure { name, .. } = &self.relation {
            let bare = name.rsplit('.').next().unwrap_or(name).trim_matches('"');
            let count: i64 = connection.query_row(
                "SELECT COUNT(*) FROM duckdb_functions() WHERE function_name = ? AND function_type = 'table_macro'",
                [bare],
                |row| row.get(0),
            )?;
            if count == 0 {
                return Err(TabreconError::connection(self.describe(), format!("Procedure not found: {}", name)));
            }
        }
        Ok(())
    }
}

impl SourceAdapter for DatabaseSource {
    fn describe(&self) -> String {
        let what = match &self.relation {
            Relation::Table(table) => table.clone(),
            Relation::Query(_) => "query".to_string(),
            Relation::Procedure { name, .. } => format!("{}()", name),
        };
        format!("{}:{}", self.location, what)
    }

    fn options(&self) -> &StreamOptions {
        &self.options
    }

    fn schema(&mut self) -> Result<Schema> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        let name = self.describe();
        let connection = open_connection(&name, &self.location)?;
        self.check_procedure(&connection)?;

        let describe_sql = format!("DESCRIBE {}", self.select_sql());
        let mut stmt = connection
            .prepare(&describe_sql)
            .map_err(|e| convert_duckdb_error(e, &name))?;
        let rows = stmt
            .query_map([], |row| {
                let column_name: String = row.get(0)?;
                let column_type: String = row.get(1)?;
                let nullable: Option<String> = row.get(2)?;
                Ok(ColumnInfo {
                    name: column_name,
                    data_type: DataType::from_sql_type(&column_type),
                    nullable: nullable.map(|n| n != "NO").unwrap_or(true),
                })
            })
            .map_err(|e| convert_duckdb_error(e, &name))?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        let schema = Arc::new(columns);
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    fn open_reader(&mut self) -> Result<Box<dyn RowReader>> {
        let width = self.schema()?.len();
        let name = self.describe();
        let location = self.location.clone();
        let sql = self.select_sql();

        let reader = producer::spawn(name.clone(), self.options.timeout, move |sink| {
            let connection = open_connection(&name, &location)?;
            let mut stmt = connection.prepare(&sql).map_err(|e| convert_duckdb_error(e, &name))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(value_from_ref(row.get_ref(i)?));
                }
                sink.send(RowRead::Row(values))?;
            }
            Ok(())
        })?;
        Ok(Box::new(reader))
    }
}
