//! Chunked key-aligned comparison of two streams.
//!
//! The [`Comparator`] is fed one chunk at a time from either side and keeps
//! just enough state to align rows by key: a pending set per side plus the
//! set of resolved keys in unsorted mode, or a short merge-join queue per
//! side in sorted mode. Every resolved row is reported to the
//! [`ComparisonAggregator`] threaded through the calls.
//!
//! Unsorted state that outgrows the memory budget moves to hash-partitioned
//! spill files; from then on rows are appended to their partition and each
//! partition is replayed through the same alignment once both sides end.

use crate::error::{Result, TabreconError};
use crate::hash::KeyFingerprint;
use crate::model::{Chunk, Row, RowKey, Value};
use crate::pending::{PartitionedSpill, PendingRow, PendingSet};
use crate::result::{CellDiff, CellStatus, ComparisonAggregator, RowDiff, Side};
use crate::schema::{CompareStrategy, ReconciledSchema, StrategyOptions};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

/// How the two streams are aligned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    /// Any row order; pending rows are indexed by key and spill to disk
    #[default]
    Unsorted,
    /// Both inputs ascend by key; merge-join with bounded memory
    Sorted,
}

/// Comparison settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    pub mode: CompareMode,
    pub chunk_size: usize,
    pub max_reported_diffs: usize,
    /// Bytes of alignment state held in memory per side; unsorted mode
    /// pools both sides' share
    pub memory_budget: usize,
    /// Bytes of spill files a side may hold on disk, pooled like memory
    pub spill_budget: u64,
    /// Read each side on its own producer thread
    pub parallel: bool,
    /// Chunks buffered per side in parallel mode
    pub queue_depth: usize,
    #[serde(flatten)]
    pub strategy: StrategyOptions,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            mode: CompareMode::Unsorted,
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            max_reported_diffs: crate::DEFAULT_MAX_REPORTED_DIFFS,
            memory_budget: crate::DEFAULT_MEMORY_BUDGET,
            spill_budget: crate::DEFAULT_SPILL_BUDGET,
            parallel: false,
            queue_depth: 2,
            strategy: StrategyOptions::default(),
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(_) | Value::Float(_) => value.as_f64(),
        Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn exact_equal(source: &Value, target: &Value) -> bool {
    if let (Some(a), Some(b)) = (numeric(source), numeric(target)) {
        return a == b;
    }
    source == target || source.to_string() == target.to_string()
}

fn normalize(value: &Value, trim: bool, case_fold: bool) -> String {
    let text = value.to_string();
    let text = if trim { text.trim().to_string() } else { text };
    if case_fold {
        text.to_lowercase()
    } else {
        text
    }
}

/// Compare one pair of cells under a strategy
pub fn compare_cells(source: &Value, target: &Value, strategy: &CompareStrategy) -> CellStatus {
    match (source.is_null(), target.is_null()) {
        (true, true) => return CellStatus::Match,
        (true, false) => return CellStatus::SourceNull,
        (false, true) => return CellStatus::TargetNull,
        (false, false) => {}
    }

    let equal = match strategy {
        CompareStrategy::Exact => exact_equal(source, target),
        CompareStrategy::Numeric { absolute, relative } => match (numeric(source), numeric(target)) {
            (Some(a), Some(b)) => {
                let diff = (a - b).abs();
                diff <= *absolute || diff <= relative * a.abs().max(b.abs())
            }
            _ => exact_equal(source, target),
        },
        CompareStrategy::Text { trim, case_fold } => {
            normalize(source, *trim, *case_fold) == normalize(target, *trim, *case_fold)
        }
    };

    if equal {
        CellStatus::Match
    } else {
        CellStatus::Mismatch
    }
}

/// Compare every column pair of two rows sharing a key and record the outcome
fn record_pair(schema: &ReconciledSchema, key: RowKey, source: &Row, target: &Row, agg: &mut ComparisonAggregator) {
    let cells: Vec<CellDiff> = schema
        .pairs
        .iter()
        .filter_map(|pair| {
            let s = source.get(pair.source_index);
            let t = target.get(pair.target_index);
            match compare_cells(s, t, &pair.strategy) {
                CellStatus::Match => None,
                status => Some(CellDiff {
                    column: pair.target.clone(),
                    source_value: s.clone(),
                    target_value: t.clone(),
                    status,
                }),
            }
        })
        .collect();

    if cells.is_empty() {
        agg.record_match();
    } else {
        agg.record(RowDiff::mismatched(key, cells));
    }
}

fn slot(side: Side) -> usize {
    match side {
        Side::Source => 0,
        Side::Target => 1,
    }
}

/// Bytes charged per remembered resolved key
const RESOLVED_KEY_BYTES: usize = 2 * std::mem::size_of::<KeyFingerprint>();

/// One record of spilled unsorted state
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SpillEvent {
    Resolved,
    Row { side: Side, entry: PendingRow },
}

#[derive(Default)]
struct UnsortedState {
    pending: [PendingSet; 2],
    /// Keys already matched or reported missing
    resolved: HashSet<KeyFingerprint>,
    /// Everything read after the state outgrew memory
    overflow: Option<PartitionedSpill<SpillEvent>>,
    spilled: bool,
}

impl UnsortedState {
    fn memory_bytes(&self) -> usize {
        self.pending[0].memory_bytes() + self.pending[1].memory_bytes() + self.resolved.len() * RESOLVED_KEY_BYTES
    }

    #[allow(clippy::too_many_arguments)]
    fn align(
        &mut self,
        schema: &ReconciledSchema,
        side: Side,
        fingerprint: KeyFingerprint,
        key: &RowKey,
        row: &Row,
        chunk_index: u64,
        theirs_exhausted: bool,
        agg: &mut ComparisonAggregator,
    ) {
        let (mine, theirs) = (slot(side), slot(side.other()));
        if self.resolved.contains(&fingerprint) || self.pending[mine].contains(&fingerprint) {
            agg.record(RowDiff::duplicate(key.clone(), side));
        } else if let Some(other) = self.pending[theirs].take(&fingerprint) {
            self.resolved.insert(fingerprint);
            let (source, target) = match side {
                Side::Source => (row, &other.row),
                Side::Target => (&other.row, row),
            };
            record_pair(schema, key.clone(), source, target, agg);
        } else if theirs_exhausted {
            self.resolved.insert(fingerprint);
            agg.record(RowDiff::missing_from(key.clone(), side));
        } else {
            let entry = PendingRow {
                key: key.clone(),
                row: row.clone(),
                chunk_index,
            };
            self.pending[mine].insert(fingerprint, entry);
        }
    }

    /// Report every pending row of `present_on` as missing on the other side
    fn resolve_missing(&mut self, present_on: Side, agg: &mut ComparisonAggregator) {
        for (fingerprint, entry) in self.pending[slot(present_on)].drain() {
            self.resolved.insert(fingerprint);
            agg.record(RowDiff::missing_from(entry.key, present_on));
        }
    }

    fn enforce_budget(&mut self, memory_budget: usize, spill_budget: u64) -> Result<()> {
        let used = self.memory_bytes();
        if self.overflow.is_some() || used <= memory_budget.saturating_mul(2) {
            return Ok(());
        }
        log::warn!(
            "Unsorted alignment state ({} bytes, {} resolved keys) exceeds the memory budget; spilling to disk",
            used,
            self.resolved.len()
        );
        let mut overflow = PartitionedSpill::new("comparison", spill_budget.saturating_mul(2));
        for fingerprint in self.resolved.drain() {
            overflow.put(fingerprint, &SpillEvent::Resolved)?;
        }
        self.resolved.shrink_to_fit();
        for side in [Side::Source, Side::Target] {
            for (fingerprint, entry) in self.pending[slot(side)].drain() {
                overflow.put(fingerprint, &SpillEvent::Row { side, entry })?;
            }
        }
        log::debug!("Spilled {} records ({} bytes)", overflow.len(), overflow.live_bytes());
        self.overflow = Some(overflow);
        self.spilled = true;
        Ok(())
    }
}

/// Replay spilled partitions through a fresh in-memory alignment each.
/// Keys never cross partitions, so every key sees its events in read order.
fn resolve_overflow(
    overflow: PartitionedSpill<SpillEvent>,
    schema: &ReconciledSchema,
    memory_budget: usize,
    agg: &mut ComparisonAggregator,
) -> Result<()> {
    log::info!(
        "Resolving {} spilled records ({} bytes) one partition at a time",
        overflow.len(),
        overflow.live_bytes()
    );
    overflow.drain(memory_budget, &mut |records| {
        let mut replay = UnsortedState::default();
        for (fingerprint, event) in records {
            match event {
                SpillEvent::Resolved => {
                    replay.resolved.insert(fingerprint);
                }
                SpillEvent::Row { side, entry } => replay.align(
                    schema,
                    side,
                    fingerprint,
                    &entry.key,
                    &entry.row,
                    entry.chunk_index,
                    false,
                    agg,
                ),
            }
        }
        replay.resolve_missing(Side::Source, agg);
        replay.resolve_missing(Side::Target, agg);
        Ok(())
    })
}

struct SortedState {
    queues: [VecDeque<PendingRow>; 2],
    queued_bytes: [usize; 2],
    /// Watermark: last key read from each side
    last: [Option<RowKey>; 2],
}

enum AlignState {
    Unsorted(UnsortedState),
    Sorted(SortedState),
}

/// Streaming comparator for one run
pub struct Comparator {
    schema: ReconciledSchema,
    key_indices: [Vec<usize>; 2],
    state: AlignState,
    memory_budget: usize,
    spill_budget: u64,
    exhausted: [bool; 2],
    rows: [u64; 2],
}

impl Comparator {
    pub fn new(schema: ReconciledSchema, options: &CompareOptions) -> Self {
        let key_indices = [schema.source_key_indices(), schema.target_key_indices()];
        let state = match options.mode {
            CompareMode::Unsorted => AlignState::Unsorted(UnsortedState::default()),
            CompareMode::Sorted => AlignState::Sorted(SortedState {
                queues: [VecDeque::new(), VecDeque::new()],
                queued_bytes: [0, 0],
                last: [None, None],
            }),
        };
        Self {
            schema,
            key_indices,
            state,
            memory_budget: options.memory_budget,
            spill_budget: options.spill_budget,
            exhausted: [false, false],
            rows: [0, 0],
        }
    }

    pub fn schema(&self) -> &ReconciledSchema {
        &self.schema
    }

    pub fn rows_seen(&self, side: Side) -> u64 {
        self.rows[slot(side)]
    }

    pub fn is_exhausted(&self, side: Side) -> bool {
        self.exhausted[slot(side)]
    }

    /// Whether unsorted state had to move to disk during this run
    pub fn has_spilled(&self) -> bool {
        matches!(&self.state, AlignState::Unsorted(state) if state.spilled)
    }

    /// The side to pull from next, or `None` once both are exhausted
    pub fn next_side(&self) -> Option<Side> {
        match (self.exhausted[0], self.exhausted[1]) {
            (true, true) => return None,
            (true, false) => return Some(Side::Target),
            (false, true) => return Some(Side::Source),
            (false, false) => {}
        }
        let behind = match &self.state {
            AlignState::Unsorted(_) => self.rows[1] < self.rows[0],
            AlignState::Sorted(state) => match (&state.last[0], &state.last[1]) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(s), Some(t)) => t < s,
            },
        };
        Some(if behind { Side::Target } else { Side::Source })
    }

    /// Align every row of a chunk read from `side`
    pub fn push_chunk(&mut self, side: Side, chunk: &Chunk, agg: &mut ComparisonAggregator) -> Result<()> {
        let mine = slot(side);
        if self.exhausted[mine] {
            return Err(TabreconError::invalid_input(format!("{} stream already finished", side)));
        }
        self.rows[mine] += chunk.len() as u64;
        log::debug!("Comparing {} chunk {} ({} rows)", side, chunk.index, chunk.len());

        for row in &chunk.rows {
            for (i, pair) in self.schema.pairs.iter().enumerate() {
                let index = match side {
                    Side::Source => pair.source_index,
                    Side::Target => pair.target_index,
                };
                if row.get(index).is_null() {
                    agg.record_null(side, i);
                }
            }
            let key = RowKey::from_row(row, &self.key_indices[mine]);
            self.push_row(side, &key, row, chunk.index, agg)
                .map_err(|e| e.at_chunk(chunk.index, Some(key.to_string())))?;
        }
        Ok(())
    }

    fn push_row(
        &mut self,
        side: Side,
        key: &RowKey,
        row: &Row,
        chunk_index: u64,
        agg: &mut ComparisonAggregator,
    ) -> Result<()> {
        let (mine, theirs) = (slot(side), slot(side.other()));
        let Self {
            schema,
            state,
            exhausted,
            memory_budget,
            spill_budget,
            ..
        } = self;

        match state {
            AlignState::Unsorted(state) => {
                let fingerprint = KeyFingerprint::of(key);
                if let Some(overflow) = state.overflow.as_mut() {
                    let entry = PendingRow {
                        key: key.clone(),
                        row: row.clone(),
                        chunk_index,
                    };
                    return overflow.put(fingerprint, &SpillEvent::Row { side, entry });
                }
                state.align(schema, side, fingerprint, key, row, chunk_index, exhausted[theirs], agg);
                state.enforce_budget(*memory_budget, *spill_budget)?;
            }
            AlignState::Sorted(state) => {
                if let Some(last) = &state.last[mine] {
                    match key.cmp(last) {
                        Ordering::Equal => {
                            agg.record(RowDiff::duplicate(key.clone(), side));
                            return Ok(());
                        }
                        Ordering::Less => {
                            return Err(TabreconError::validation(format!(
                                "{} is not sorted by key: {} follows {}",
                                side, key, last
                            )));
                        }
                        Ordering::Greater => {}
                    }
                }
                state.last[mine] = Some(key.clone());
                let entry = PendingRow {
                    key: key.clone(),
                    row: row.clone(),
                    chunk_index,
                };
                state.queued_bytes[mine] += entry.estimated_size();
                state.queues[mine].push_back(entry);
                merge_join(schema, state, exhausted, agg);
                if state.queued_bytes[mine] > *memory_budget {
                    return Err(TabreconError::resource_exhausted(format!(
                        "{} rows waiting for a match exceed the memory budget of {} bytes",
                        side, memory_budget
                    )));
                }
            }
        }
        Ok(())
    }

    /// Mark `side` exhausted and resolve what can no longer be matched
    pub fn finish_side(&mut self, side: Side, agg: &mut ComparisonAggregator) -> Result<()> {
        let mine = slot(side);
        if self.exhausted[mine] {
            return Ok(());
        }
        self.exhausted[mine] = true;
        log::debug!("{} exhausted after {} rows", side, self.rows[mine]);

        let Self {
            schema,
            state,
            exhausted,
            memory_budget,
            spill_budget,
            ..
        } = self;
        let all_exhausted = exhausted.iter().all(|e| *e);
        match state {
            AlignState::Unsorted(state) => {
                if state.overflow.is_none() {
                    state.resolve_missing(side.other(), agg);
                    if !all_exhausted {
                        state.enforce_budget(*memory_budget, *spill_budget)?;
                    }
                }
                if all_exhausted {
                    if let Some(overflow) = state.overflow.take() {
                        resolve_overflow(overflow, schema, *memory_budget, agg)?;
                    }
                }
            }
            AlignState::Sorted(state) => merge_join(schema, state, exhausted, agg),
        }
        Ok(())
    }
}

/// Resolve queue fronts: equal keys are compared, and a key that the other
/// side has already passed (or can never reach) is missing there
fn merge_join(
    schema: &ReconciledSchema,
    state: &mut SortedState,
    exhausted: &[bool; 2],
    agg: &mut ComparisonAggregator,
) {
    loop {
        let order = match (state.queues[0].front(), state.queues[1].front()) {
            (Some(s), Some(t)) => s.key.cmp(&t.key),
            (Some(s), None) => {
                if passed(&s.key, &state.last[1], exhausted[1]) {
                    Ordering::Less
                } else {
                    break;
                }
            }
            (None, Some(t)) => {
                if passed(&t.key, &state.last[0], exhausted[0]) {
                    Ordering::Greater
                } else {
                    break;
                }
            }
            (None, None) => break,
        };

        match order {
            Ordering::Equal => {
                if let (Some(s), Some(t)) = (pop(state, 0), pop(state, 1)) {
                    record_pair(schema, s.key, &s.row, &t.row, agg);
                }
            }
            Ordering::Less => {
                if let Some(s) = pop(state, 0) {
                    agg.record(RowDiff::missing_from(s.key, Side::Source));
                }
            }
            Ordering::Greater => {
                if let Some(t) = pop(state, 1) {
                    agg.record(RowDiff::missing_from(t.key, Side::Target));
                }
            }
        }
    }
}

fn passed(key: &RowKey, watermark: &Option<RowKey>, exhausted: bool) -> bool {
    exhausted || watermark.as_ref().map(|w| key < w).unwrap_or(false)
}

fn pop(state: &mut SortedState, i: usize) -> Option<PendingRow> {
    let entry = state.queues[i].pop_front()?;
    state.queued_bytes[i] = state.queued_bytes[i].saturating_sub(entry.estimated_size());
    Some(entry)
}
