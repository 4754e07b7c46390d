//! Result objects and the aggregators that build them from per-chunk
//! outcomes

use crate::model::{RowKey, Value};
use crate::schema::ColumnPair;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which input a row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Target,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Self::Source => Self::Target,
            Self::Target => Self::Source,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Target => f.write_str("target"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Match,
    Mismatch,
    SourceNull,
    TargetNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDiff {
    pub column: String,
    pub source_value: Value,
    pub target_value: Value,
    pub status: CellStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Matched,
    Mismatched,
    MissingInTarget,
    MissingInSource,
    DuplicateKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDiff {
    pub key: RowKey,
    pub status: RowStatus,
    /// Non-matching cells of a mismatched row, in column-pair order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellDiff>,
    /// Side of the extra occurrence for duplicate keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
}

impl RowDiff {
    pub fn new(key: RowKey, status: RowStatus) -> Self {
        Self {
            key,
            status,
            cells: Vec::new(),
            side: None,
        }
    }

    pub fn mismatched(key: RowKey, cells: Vec<CellDiff>) -> Self {
        Self {
            key,
            status: RowStatus::Mismatched,
            cells,
            side: None,
        }
    }

    pub fn duplicate(key: RowKey, side: Side) -> Self {
        Self {
            key,
            status: RowStatus::DuplicateKey,
            cells: Vec::new(),
            side: Some(side),
        }
    }

    pub fn missing_from(key: RowKey, present_on: Side) -> Self {
        let status = match present_on {
            Side::Source => RowStatus::MissingInTarget,
            Side::Target => RowStatus::MissingInSource,
        };
        Self::new(key, status)
    }
}

/// Row outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounts {
    pub matched: u64,
    pub mismatched: u64,
    pub missing_in_target: u64,
    pub missing_in_source: u64,
    pub duplicate_key: u64,
}

impl DiffCounts {
    pub fn add(&mut self, status: RowStatus) {
        match status {
            RowStatus::Matched => self.matched += 1,
            RowStatus::Mismatched => self.mismatched += 1,
            RowStatus::MissingInTarget => self.missing_in_target += 1,
            RowStatus::MissingInSource => self.missing_in_source += 1,
            RowStatus::DuplicateKey => self.duplicate_key += 1,
        }
    }

    pub fn merge(&mut self, other: &DiffCounts) {
        self.matched += other.matched;
        self.mismatched += other.mismatched;
        self.missing_in_target += other.missing_in_target;
        self.missing_in_source += other.missing_in_source;
        self.duplicate_key += other.duplicate_key;
    }

    pub fn non_matching(&self) -> u64 {
        self.mismatched + self.missing_in_target + self.missing_in_source + self.duplicate_key
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    /// A fatal error stopped the run; counts cover the rows processed before it
    Incomplete {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_index: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        row_key: Option<String>,
    },
    Cancelled,
}

impl RunStatus {
    pub fn from_error(error: &crate::error::TabreconError) -> Self {
        Self::Incomplete {
            error: error.to_string(),
            chunk_index: error.chunk_index(),
            row_key: error.row_key().map(str::to_string),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Row totals for one input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideTotals {
    pub name: String,
    pub rows: u64,
    pub skipped_rows: u64,
}

/// Final comparison report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub columns: Vec<ColumnPair>,
    pub key_columns: Vec<String>,
    pub source: SideTotals,
    pub target: SideTotals,
    pub counts: DiffCounts,
    /// Non-matching rows in resolution order, at most `max_reported_diffs`
    pub diffs: Vec<RowDiff>,
    /// True number of non-matching rows
    pub total_diffs: u64,
    pub truncated: bool,
    pub max_reported_diffs: usize,
    /// Null cells per compared column on each side
    #[serde(default)]
    pub null_counts: Vec<ColumnNullCounts>,
}

/// Null cells of one compared column on both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNullCounts {
    /// Target-side column name
    pub column: String,
    pub source_nulls: u64,
    pub target_nulls: u64,
}

impl ColumnNullCounts {
    pub fn differs(&self) -> bool {
        self.source_nulls != self.target_nulls
    }
}

impl ComparisonResult {
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    pub fn has_differences(&self) -> bool {
        self.counts.non_matching() > 0
    }

    /// Identical datasets under the mapping, fully compared
    pub fn is_clean(&self) -> bool {
        self.is_complete() && !self.has_differences()
    }

    /// Columns whose null count differs between the sides
    pub fn null_count_differences(&self) -> impl Iterator<Item = &ColumnNullCounts> {
        self.null_counts.iter().filter(|c| c.differs())
    }
}

/// Builds a [`ComparisonResult`] from per-chunk outcomes
#[derive(Debug, Clone)]
pub struct ComparisonAggregator {
    counts: DiffCounts,
    diffs: Vec<RowDiff>,
    total_diffs: u64,
    truncated: bool,
    max_reported_diffs: usize,
    /// Null cells per column pair, source then target
    nulls: Vec<[u64; 2]>,
}

impl ComparisonAggregator {
    pub fn new(max_reported_diffs: usize) -> Self {
        Self {
            counts: DiffCounts::default(),
            diffs: Vec::new(),
            total_diffs: 0,
            truncated: false,
            max_reported_diffs,
            nulls: Vec::new(),
        }
    }

    /// Count a null cell in column pair `pair` of a row read from `side`
    pub fn record_null(&mut self, side: Side, pair: usize) {
        if self.nulls.len() <= pair {
            self.nulls.resize(pair + 1, [0; 2]);
        }
        let slot = match side {
            Side::Source => 0,
            Side::Target => 1,
        };
        self.nulls[pair][slot] += 1;
    }

    /// Matched rows are only counted
    pub fn record_match(&mut self) {
        self.counts.matched += 1;
    }

    pub fn record(&mut self, diff: RowDiff) {
        self.counts.add(diff.status);
        if diff.status == RowStatus::Matched {
            return;
        }
        self.total_diffs += 1;
        if self.diffs.len() < self.max_reported_diffs {
            self.diffs.push(diff);
        } else {
            self.truncated = true;
        }
    }

    pub fn counts(&self) -> &DiffCounts {
        &self.counts
    }

    /// Fold `other` in after the outcomes already recorded
    pub fn merge(&mut self, other: ComparisonAggregator) {
        self.counts.merge(&other.counts);
        self.total_diffs += other.total_diffs;
        self.truncated |= other.truncated;
        if self.nulls.len() < other.nulls.len() {
            self.nulls.resize(other.nulls.len(), [0; 2]);
        }
        for (mine, theirs) in self.nulls.iter_mut().zip(&other.nulls) {
            mine[0] += theirs[0];
            mine[1] += theirs[1];
        }
        for diff in other.diffs {
            if self.diffs.len() < self.max_reported_diffs {
                self.diffs.push(diff);
            } else {
                self.truncated = true;
            }
        }
    }

    pub fn finish(self, header: ResultHeader, status: RunStatus) -> ComparisonResult {
        let null_counts = header
            .columns
            .iter()
            .enumerate()
            .map(|(i, pair)| {
                let [source_nulls, target_nulls] = self.nulls.get(i).copied().unwrap_or_default();
                ColumnNullCounts {
                    column: pair.target.clone(),
                    source_nulls,
                    target_nulls,
                }
            })
            .collect();
        ComparisonResult {
            run_id: header.run_id,
            started_at: header.started_at,
            finished_at: Utc::now(),
            status,
            columns: header.columns,
            key_columns: header.key_columns,
            source: header.source,
            target: header.target,
            counts: self.counts,
            diffs: self.diffs,
            total_diffs: self.total_diffs,
            truncated: self.truncated,
            max_reported_diffs: self.max_reported_diffs,
            null_counts,
        }
    }
}

/// Run metadata supplied when finishing a comparison
#[derive(Debug, Clone)]
pub struct ResultHeader {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub columns: Vec<ColumnPair>,
    pub key_columns: Vec<String>,
    pub source: SideTotals,
    pub target: SideTotals,
}

impl ResultHeader {
    pub fn new(columns: Vec<ColumnPair>, key_columns: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            columns,
            key_columns,
            source: SideTotals::default(),
            target: SideTotals::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    RowCount,
    Duplicates,
    Nulls,
    BusinessRule,
    Schema,
}

/// Occurrence count of one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCount {
    pub key: RowKey,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnNulls {
    pub column: String,
    pub nulls: u64,
    pub ratio: f64,
    pub threshold: f64,
    pub passed: bool,
}

/// Check-specific evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckDetail {
    RowCount {
        actual: u64,
        expected: String,
    },
    Duplicates {
        distinct_keys: u64,
        duplicate_keys: u64,
        extra_rows: u64,
        sample: Vec<KeyCount>,
        truncated: bool,
    },
    Nulls {
        rows: u64,
        columns: Vec<ColumnNulls>,
    },
    BusinessRule {
        rule: String,
        evaluated: u64,
        violations: u64,
        sample: Vec<RowKey>,
    },
    Schema {
        expected: Vec<String>,
        actual: Vec<String>,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub kind: CheckKind,
    pub name: String,
    pub passed: bool,
    pub detail: CheckDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Quality checks over one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckResult {
    pub run_id: Uuid,
    pub dataset: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub rows: u64,
    pub skipped_rows: u64,
    pub checks: Vec<CheckOutcome>,
}

impl QualityCheckResult {
    pub fn passed(&self) -> bool {
        self.status.is_complete() && self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn check(&self, kind: CheckKind) -> Option<&CheckOutcome> {
        self.checks.iter().find(|c| c.kind == kind)
    }
}

/// Per-rule running totals
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleTally {
    pub evaluated: u64,
    pub violations: u64,
    pub sample: Vec<RowKey>,
}

/// Associative per-chunk totals for the streaming quality checks
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAggregator {
    pub rows: u64,
    pub nulls: Vec<u64>,
    pub rules: Vec<RuleTally>,
    sample_size: usize,
}

impl QualityAggregator {
    pub fn new(columns: usize, rules: usize, sample_size: usize) -> Self {
        Self {
            rows: 0,
            nulls: vec![0; columns],
            rules: vec![RuleTally::default(); rules],
            sample_size,
        }
    }

    pub fn record_violation(&mut self, rule: usize, key: RowKey) {
        let tally = &mut self.rules[rule];
        tally.violations += 1;
        if tally.sample.len() < self.sample_size {
            tally.sample.push(key);
        }
    }

    pub fn merge(&mut self, other: QualityAggregator) {
        self.rows += other.rows;
        for (mine, theirs) in self.nulls.iter_mut().zip(other.nulls) {
            *mine += theirs;
        }
        for (mine, theirs) in self.rules.iter_mut().zip(other.rules) {
            mine.evaluated += theirs.evaluated;
            mine.violations += theirs.violations;
            let room = self.sample_size.saturating_sub(mine.sample.len());
            mine.sample.extend(theirs.sample.into_iter().take(room));
        }
    }

    pub fn finish(
        self,
        run_id: Uuid,
        dataset: String,
        started_at: DateTime<Utc>,
        status: RunStatus,
        skipped_rows: u64,
        checks: Vec<CheckOutcome>,
    ) -> QualityCheckResult {
        QualityCheckResult {
            run_id,
            dataset,
            started_at,
            finished_at: Utc::now(),
            status,
            rows: self.rows,
            skipped_rows,
            checks,
        }
    }
}
