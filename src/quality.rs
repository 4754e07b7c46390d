//! Streaming data-quality checks over one chunk stream: row count,
//! duplicate keys, null ratios, business rules and expected schema

use crate::error::{Result, TabreconError};
use crate::hash::KeyFingerprint;
use crate::model::{Chunk, ColumnInfo, DataType, Row, RowKey, RowView, Schema, Value};
use crate::pending::PartitionedSpill;
use crate::result::{
    CheckDetail, CheckKind, CheckOutcome, ColumnNulls, KeyCount, QualityAggregator, QualityCheckResult, RunStatus,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Expected total row count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowCountExpectation {
    Exact(u64),
    AtLeast(u64),
    /// Same total as the other side of a comparison
    Paired,
}

impl RowCountExpectation {
    fn describe(&self, paired: Option<u64>) -> String {
        match (self, paired) {
            (Self::Exact(n), _) => format!("exactly {}", n),
            (Self::AtLeast(n), _) => format!("at least {}", n),
            (Self::Paired, Some(n)) => format!("paired ({})", n),
            (Self::Paired, None) => "paired".to_string(),
        }
    }
}

/// Named built-in rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum BuiltinRule {
    NotNull {
        column: String,
    },
    NonNegative {
        column: String,
    },
    Range {
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    AllowedValues {
        column: String,
        values: Vec<String>,
    },
    Pattern {
        column: String,
        pattern: String,
    },
    /// Sum of `addends` equals `total`
    SumEquals {
        addends: Vec<String>,
        total: String,
        #[serde(default)]
        tolerance: f64,
    },
    /// Every non-null value was read as `data_type`
    ColumnType {
        column: String,
        data_type: DataType,
    },
}

impl BuiltinRule {
    pub fn name(&self) -> String {
        match self {
            Self::NotNull { column } => format!("not_null({})", column),
            Self::NonNegative { column } => format!("non_negative({})", column),
            Self::Range { column, .. } => format!("range({})", column),
            Self::AllowedValues { column, .. } => format!("allowed_values({})", column),
            Self::Pattern { column, .. } => format!("pattern({})", column),
            Self::SumEquals { addends, total, .. } => format!("sum_equals({} = {})", addends.join(" + "), total),
            Self::ColumnType { column, data_type } => format!("column_type({}: {})", column, data_type),
        }
    }

    fn columns(&self) -> Vec<&str> {
        match self {
            Self::NotNull { column }
            | Self::NonNegative { column }
            | Self::Range { column, .. }
            | Self::AllowedValues { column, .. }
            | Self::Pattern { column, .. }
            | Self::ColumnType { column, .. } => vec![column.as_str()],
            Self::SumEquals { addends, total, .. } => {
                addends.iter().map(String::as_str).chain(std::iter::once(total.as_str())).collect()
            }
        }
    }
}

pub type RowPredicate = Arc<dyn Fn(&RowView) -> bool + Send + Sync>;

/// A row-level rule: a built-in, or an opaque predicate that returns
/// `true` for rows that pass
#[derive(Clone)]
pub enum BusinessRule {
    Builtin(BuiltinRule),
    Predicate { name: String, predicate: RowPredicate },
}

impl BusinessRule {
    pub fn predicate(name: impl Into<String>, predicate: impl Fn(&RowView) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Builtin(rule) => rule.name(),
            Self::Predicate { name, .. } => name.clone(),
        }
    }
}

impl From<BuiltinRule> for BusinessRule {
    fn from(rule: BuiltinRule) -> Self {
        Self::Builtin(rule)
    }
}

impl fmt::Debug for BusinessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(rule) => f.debug_tuple("Builtin").field(rule).finish(),
            Self::Predicate { name, .. } => f.debug_struct("Predicate").field("name", name).finish_non_exhaustive(),
        }
    }
}

impl<'de> Deserialize<'de> for BusinessRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        BuiltinRule::deserialize(deserializer).map(Self::Builtin)
    }
}

impl Serialize for BusinessRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Builtin(rule) => rule.serialize(serializer),
            Self::Predicate { name, .. } => serializer.serialize_str(name),
        }
    }
}

/// Quality checks to run over one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityOptions {
    /// Key columns on this side. When empty, rule samples name rows by
    /// ordinal and duplicates are counted over whole rows.
    pub keys: Vec<String>,
    pub row_count: Option<RowCountExpectation>,
    pub check_duplicates: bool,
    /// Default maximum null ratio per column
    pub max_null_ratio: f64,
    pub null_thresholds: IndexMap<String, f64>,
    pub rules: Vec<BusinessRule>,
    /// Expected column names, in order
    pub expected_columns: Option<Vec<String>>,
    pub sample_size: usize,
    /// Bytes of key counts held in memory before spilling
    pub memory_budget: usize,
    /// Bytes of spilled key counts allowed on disk
    pub spill_budget: u64,
}

impl Default for QualityOptions {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            row_count: None,
            check_duplicates: true,
            max_null_ratio: 1.0,
            null_thresholds: IndexMap::new(),
            rules: Vec::new(),
            expected_columns: None,
            sample_size: crate::DEFAULT_SAMPLE_SIZE,
            memory_budget: crate::DEFAULT_MEMORY_BUDGET,
            spill_budget: crate::DEFAULT_SPILL_BUDGET,
        }
    }
}

impl QualityOptions {
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_rule(mut self, rule: impl Into<BusinessRule>) -> Self {
        self.rules.push(rule.into());
        self
    }
}

/// Totals from a [`DuplicateCounter`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateSummary {
    pub distinct_keys: u64,
    pub duplicate_keys: u64,
    pub extra_rows: u64,
    /// Smallest duplicate keys with their counts
    pub sample: Vec<KeyCount>,
    pub truncated: bool,
}

struct SummaryBuilder {
    summary: DuplicateSummary,
    sample: BTreeMap<RowKey, u64>,
    sample_size: usize,
}

impl SummaryBuilder {
    fn add(&mut self, entry: KeyCount) {
        self.summary.distinct_keys += 1;
        if entry.count < 2 {
            return;
        }
        self.summary.duplicate_keys += 1;
        self.summary.extra_rows += entry.count - 1;
        self.sample.insert(entry.key, entry.count);
        if self.sample.len() > self.sample_size {
            self.sample.pop_last();
        }
    }

    fn build(mut self) -> DuplicateSummary {
        self.summary.truncated = self.summary.duplicate_keys > self.sample.len() as u64;
        self.summary.sample = self.sample.into_iter().map(|(key, count)| KeyCount { key, count }).collect();
        self.summary
    }
}

/// Per-key occurrence counter. Counts live in memory up to a budget, then
/// move to hash-partitioned temp files that are summed one partition at a
/// time.
pub struct DuplicateCounter {
    counts: HashMap<KeyFingerprint, KeyCount>,
    bytes: usize,
    budget: usize,
    spill: Option<PartitionedSpill<KeyCount>>,
    spill_budget: u64,
    sample_size: usize,
}

impl DuplicateCounter {
    pub fn new(budget: usize, spill_budget: u64, sample_size: usize) -> Self {
        Self {
            counts: HashMap::new(),
            bytes: 0,
            budget,
            spill: None,
            spill_budget,
            sample_size,
        }
    }

    pub fn observe(&mut self, key: RowKey) -> Result<()> {
        let fingerprint = KeyFingerprint::of(&key);
        match self.counts.get_mut(&fingerprint) {
            Some(entry) => entry.count += 1,
            None => {
                self.bytes += key.estimated_size() + std::mem::size_of::<(KeyFingerprint, KeyCount)>();
                self.counts.insert(fingerprint, KeyCount { key, count: 1 });
            }
        }
        if self.bytes > self.budget {
            self.spill()?;
        }
        Ok(())
    }

    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    fn spill(&mut self) -> Result<()> {
        let spill = self.spill.get_or_insert_with(|| {
            log::warn!(
                "Key counts exceed the memory budget of {} bytes; spilling to disk",
                self.budget
            );
            PartitionedSpill::new("duplicate counts", self.spill_budget)
        });
        for (fingerprint, entry) in self.counts.drain() {
            spill.put(fingerprint, &entry)?;
        }
        self.bytes = 0;
        Ok(())
    }

    pub fn finish(mut self) -> Result<DuplicateSummary> {
        let mut builder = SummaryBuilder {
            summary: DuplicateSummary::default(),
            sample: BTreeMap::new(),
            sample_size: self.sample_size,
        };

        if self.spill.is_none() {
            for entry in self.counts.into_values() {
                builder.add(entry);
            }
            return Ok(builder.build());
        }

        self.spill()?;
        if let Some(spill) = self.spill.take() {
            spill.drain(self.budget, &mut |records| {
                let mut counts: HashMap<KeyFingerprint, KeyCount> = HashMap::new();
                for (fingerprint, entry) in records {
                    counts
                        .entry(fingerprint)
                        .and_modify(|e| e.count += entry.count)
                        .or_insert(entry);
                }
                for entry in counts.into_values() {
                    builder.add(entry);
                }
                Ok(())
            })?;
        }
        Ok(builder.build())
    }
}

enum PreparedRule {
    NotNull(usize),
    NonNegative(usize),
    Range { column: usize, min: Option<f64>, max: Option<f64> },
    AllowedValues { column: usize, values: HashSet<String> },
    Pattern { column: usize, regex: Regex },
    SumEquals { addends: Vec<usize>, total: usize, tolerance: f64 },
    ColumnType { column: usize, data_type: DataType },
    Predicate(RowPredicate),
}

/// Whether a parsed value carries the given logical type
fn has_type(value: &Value, data_type: DataType) -> bool {
    match (data_type, value) {
        (DataType::Unknown, _) => true,
        (DataType::Integer, Value::Int(_)) => true,
        (DataType::Float, Value::Int(_) | Value::Float(_)) => true,
        (DataType::Boolean, Value::Bool(_)) => true,
        (DataType::Date, Value::Date(_)) => true,
        (DataType::Timestamp, Value::Timestamp(_)) => true,
        (DataType::Text, Value::Text(_)) => true,
        _ => false,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(_) | Value::Float(_) => value.as_f64(),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl PreparedRule {
    fn prepare(rule: &BusinessRule, columns: &[ColumnInfo]) -> Result<Self> {
        let builtin = match rule {
            BusinessRule::Predicate { predicate, .. } => return Ok(Self::Predicate(predicate.clone())),
            BusinessRule::Builtin(builtin) => builtin,
        };
        let index = |name: &str| -> Result<usize> {
            columns.iter().position(|c| c.name == name).ok_or_else(|| {
                TabreconError::validation(format!("Rule {} names unknown column '{}'", builtin.name(), name))
            })
        };
        // Validate every referenced column up front
        for name in builtin.columns() {
            index(name)?;
        }

        Ok(match builtin {
            BuiltinRule::NotNull { column } => Self::NotNull(index(column)?),
            BuiltinRule::NonNegative { column } => Self::NonNegative(index(column)?),
            BuiltinRule::Range { column, min, max } => Self::Range {
                column: index(column)?,
                min: *min,
                max: *max,
            },
            BuiltinRule::AllowedValues { column, values } => Self::AllowedValues {
                column: index(column)?,
                values: values.iter().map(|v| v.trim().to_string()).collect(),
            },
            BuiltinRule::Pattern { column, pattern } => Self::Pattern {
                column: index(column)?,
                regex: Regex::new(pattern)?,
            },
            BuiltinRule::SumEquals {
                addends,
                total,
                tolerance,
            } => Self::SumEquals {
                addends: addends.iter().map(|a| index(a)).collect::<Result<Vec<_>>>()?,
                total: index(total)?,
                tolerance: tolerance.max(1e-9),
            },
            BuiltinRule::ColumnType { column, data_type } => {
                let column = index(column)?;
                if columns[column].data_type != *data_type {
                    log::debug!(
                        "Column '{}' was read as {}, expected {}",
                        columns[column].name,
                        columns[column].data_type,
                        data_type
                    );
                }
                Self::ColumnType {
                    column,
                    data_type: *data_type,
                }
            }
        })
    }

    /// True when the row breaks the rule. Nulls only break `not_null`.
    fn violated(&self, view: &RowView, row: &Row) -> bool {
        match self {
            Self::NotNull(column) => row.get(*column).is_null(),
            Self::NonNegative(column) => {
                let value = row.get(*column);
                !value.is_null() && number(value).map(|n| n < 0.0).unwrap_or(true)
            }
            Self::Range { column, min, max } => {
                let value = row.get(*column);
                if value.is_null() {
                    return false;
                }
                match number(value) {
                    Some(n) => min.map(|m| n < m).unwrap_or(false) || max.map(|m| n > m).unwrap_or(false),
                    None => true,
                }
            }
            Self::AllowedValues { column, values } => {
                let value = row.get(*column);
                !value.is_null() && !values.contains(value.to_string().trim())
            }
            Self::Pattern { column, regex } => {
                let value = row.get(*column);
                !value.is_null() && !regex.is_match(&value.to_string())
            }
            Self::SumEquals {
                addends,
                total,
                tolerance,
            } => {
                let total = row.get(*total);
                if total.is_null() || addends.iter().any(|a| row.get(*a).is_null()) {
                    return false;
                }
                let sum: Option<f64> = addends.iter().map(|a| number(row.get(*a))).sum();
                match (sum, number(total)) {
                    (Some(sum), Some(total)) => (sum - total).abs() > *tolerance,
                    _ => true,
                }
            }
            Self::ColumnType { column, data_type } => {
                let value = row.get(*column);
                !value.is_null() && !has_type(value, *data_type)
            }
            Self::Predicate(predicate) => !predicate(view),
        }
    }
}

/// Runs the configured checks over a stream, one chunk at a time
pub struct QualityChecker {
    dataset: String,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    options: QualityOptions,
    columns: Schema,
    key_indices: Vec<usize>,
    /// Columns duplicates are counted over: the keys, or every column
    duplicate_indices: Vec<usize>,
    rule_names: Vec<String>,
    rules: Vec<PreparedRule>,
    duplicates: Option<DuplicateCounter>,
    totals: QualityAggregator,
    last_chunk: Option<u64>,
}

impl QualityChecker {
    /// Validate the options against the stream's schema before any row is read
    pub fn new(dataset: impl Into<String>, options: QualityOptions, columns: Schema) -> Result<Self> {
        let known = |name: &str| columns.iter().any(|c| c.name == name);
        for key in &options.keys {
            if !known(key) {
                return Err(TabreconError::validation(format!("Key column '{}' not found", key)));
            }
        }
        for name in options.null_thresholds.keys() {
            if !known(name) {
                return Err(TabreconError::validation(format!(
                    "Null threshold given for unknown column '{}'",
                    name
                )));
            }
        }

        let key_indices: Vec<usize> = options
            .keys
            .iter()
            .filter_map(|k| columns.iter().position(|c| &c.name == k))
            .collect();
        let duplicate_indices = if key_indices.is_empty() {
            (0..columns.len()).collect()
        } else {
            key_indices.clone()
        };
        let rules = options
            .rules
            .iter()
            .map(|rule| PreparedRule::prepare(rule, &columns))
            .collect::<Result<Vec<_>>>()?;
        let rule_names = options.rules.iter().map(BusinessRule::name).collect();
        let duplicates = options
            .check_duplicates
            .then(|| DuplicateCounter::new(options.memory_budget, options.spill_budget, options.sample_size));
        let totals = QualityAggregator::new(columns.len(), rules.len(), options.sample_size);

        Ok(Self {
            dataset: dataset.into(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            options,
            columns,
            key_indices,
            duplicate_indices,
            rule_names,
            rules,
            duplicates,
            totals,
            last_chunk: None,
        })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn rows(&self) -> u64 {
        self.totals.rows
    }

    fn key_for(&self, row: &Row, ordinal: u64) -> RowKey {
        if self.key_indices.is_empty() {
            RowKey::ordinal(ordinal)
        } else {
            RowKey::from_row(row, &self.key_indices)
        }
    }

    pub fn observe(&mut self, chunk: &Chunk) -> Result<()> {
        let first_ordinal = self.totals.rows + 1;
        let mut partial = QualityAggregator::new(self.columns.len(), self.rules.len(), self.options.sample_size);
        partial.rows = chunk.len() as u64;

        for row in &chunk.rows {
            for (i, value) in row.values.iter().enumerate() {
                if value.is_null() {
                    partial.nulls[i] += 1;
                }
            }
        }

        if !self.rules.is_empty() {
            let rules = &self.rules;
            let columns: &[ColumnInfo] = &chunk.columns;
            let violations: Vec<Vec<usize>> = chunk
                .rows
                .par_iter()
                .map(|row| {
                    let view = RowView::new(columns, row);
                    rules
                        .iter()
                        .enumerate()
                        .filter(|(_, rule)| rule.violated(&view, row))
                        .map(|(i, _)| i)
                        .collect()
                })
                .collect();

            for tally in partial.rules.iter_mut() {
                tally.evaluated = chunk.len() as u64;
            }
            for (offset, broken) in violations.iter().enumerate() {
                for &rule in broken {
                    let key = self.key_for(&chunk.rows[offset], first_ordinal + offset as u64);
                    partial.record_violation(rule, key);
                }
            }
        }

        if let Some(counter) = self.duplicates.as_mut() {
            for row in &chunk.rows {
                counter.observe(RowKey::from_row(row, &self.duplicate_indices))?;
            }
        }

        self.totals.merge(partial);
        self.last_chunk = Some(chunk.index);
        log::debug!("{}: quality checks over chunk {} ({} rows)", self.dataset, chunk.index, chunk.len());
        Ok(())
    }

    /// Evaluate every check. `paired_rows` is the other side's total when
    /// run alongside a comparison. A check that cannot be evaluated leaves
    /// the result incomplete instead of failing.
    pub fn finish(self, mut status: RunStatus, skipped_rows: u64, paired_rows: Option<u64>) -> QualityCheckResult {
        let mut checks = Vec::new();
        let rows = self.totals.rows;

        if let Some(expected) = &self.options.expected_columns {
            let actual: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
            let missing: Vec<String> = expected.iter().filter(|e| !actual.contains(e)).cloned().collect();
            let unexpected: Vec<String> = actual.iter().filter(|a| !expected.contains(a)).cloned().collect();
            let passed = &actual == expected;
            checks.push(CheckOutcome {
                kind: CheckKind::Schema,
                name: "schema".to_string(),
                passed,
                message: (!passed).then(|| "column list differs from the expected ordered list".to_string()),
                detail: CheckDetail::Schema {
                    expected: expected.clone(),
                    actual,
                    missing,
                    unexpected,
                },
            });
        }

        if let Some(expectation) = self.options.row_count {
            let (passed, message) = match (expectation, paired_rows) {
                (RowCountExpectation::Exact(n), _) => (rows == n, None),
                (RowCountExpectation::AtLeast(n), _) => (rows >= n, None),
                (RowCountExpectation::Paired, Some(n)) => (rows == n, None),
                (RowCountExpectation::Paired, None) => {
                    (false, Some("no paired dataset to take the expected count from".to_string()))
                }
            };
            let message = message.or_else(|| {
                (!passed).then(|| format!("expected {} rows, found {}", expectation.describe(paired_rows), rows))
            });
            checks.push(CheckOutcome {
                kind: CheckKind::RowCount,
                name: "row_count".to_string(),
                passed,
                message,
                detail: CheckDetail::RowCount {
                    actual: rows,
                    expected: expectation.describe(paired_rows),
                },
            });
        }

        let summary = match self.duplicates.map(DuplicateCounter::finish) {
            Some(Ok(summary)) => Some(summary),
            Some(Err(e)) => {
                let e = e.at_chunk(self.last_chunk.unwrap_or(0), None);
                log::error!("{}: duplicate check could not finish: {}", self.dataset, e);
                if status.is_complete() {
                    status = RunStatus::from_error(&e);
                }
                None
            }
            None => None,
        };
        if let Some(summary) = summary {
            let passed = summary.duplicate_keys == 0;
            let over = if self.options.keys.is_empty() {
                "*".to_string()
            } else {
                self.options.keys.join(", ")
            };
            checks.push(CheckOutcome {
                kind: CheckKind::Duplicates,
                name: format!("duplicates({})", over),
                passed,
                message: (!passed).then(|| format!("{} keys occur more than once", summary.duplicate_keys)),
                detail: CheckDetail::Duplicates {
                    distinct_keys: summary.distinct_keys,
                    duplicate_keys: summary.duplicate_keys,
                    extra_rows: summary.extra_rows,
                    sample: summary.sample,
                    truncated: summary.truncated,
                },
            });
        }

        let null_columns: Vec<ColumnNulls> = self
            .columns
            .iter()
            .zip(&self.totals.nulls)
            .map(|(column, &nulls)| {
                let ratio = if rows == 0 { 0.0 } else { nulls as f64 / rows as f64 };
                let threshold = self
                    .options
                    .null_thresholds
                    .get(&column.name)
                    .copied()
                    .unwrap_or(self.options.max_null_ratio);
                ColumnNulls {
                    column: column.name.clone(),
                    nulls,
                    ratio,
                    threshold,
                    passed: ratio <= threshold,
                }
            })
            .collect();
        let failing: Vec<&str> = null_columns.iter().filter(|c| !c.passed).map(|c| c.column.as_str()).collect();
        checks.push(CheckOutcome {
            kind: CheckKind::Nulls,
            name: "nulls".to_string(),
            passed: failing.is_empty(),
            message: (!failing.is_empty()).then(|| format!("null ratio above threshold in: {}", failing.join(", "))),
            detail: CheckDetail::Nulls {
                rows,
                columns: null_columns,
            },
        });

        for (name, tally) in self.rule_names.iter().zip(&self.totals.rules) {
            let passed = tally.violations == 0;
            checks.push(CheckOutcome {
                kind: CheckKind::BusinessRule,
                name: name.clone(),
                passed,
                message: (!passed).then(|| format!("{} of {} rows violate {}", tally.violations, tally.evaluated, name)),
                detail: CheckDetail::BusinessRule {
                    rule: name.clone(),
                    evaluated: tally.evaluated,
                    violations: tally.violations,
                    sample: tally.sample.clone(),
                },
            });
        }

        let failed = checks.iter().filter(|c| !c.passed).count();
        log::info!("{}: {} rows, {} of {} checks failed", self.dataset, rows, failed, checks.len());

        self.totals
            .finish(self.run_id, self.dataset, self.started_at, status, skipped_rows, checks)
    }
}
