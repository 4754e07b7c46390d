//! Run orchestration: opens both streams, drives the comparator and the
//! optional quality checkers chunk by chunk, and turns failures into a
//! tagged partial result.

use crate::compare::{CompareOptions, Comparator};
use crate::error::{Result, TabreconError};
use crate::mapping::ColumnMapping;
use crate::model::Chunk;
use crate::progress::ProgressReporter;
use crate::quality::{QualityChecker, QualityOptions};
use crate::result::{ComparisonAggregator, ComparisonResult, QualityCheckResult, ResultHeader, RunStatus, Side};
use crate::schema::{reconcile, ReconciledSchema};
use crate::sources::{ChunkStream, SourceAdapter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Run-scoped cancellation flag, checked between chunks
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a comparison run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub comparison: ComparisonResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality: Vec<QualityCheckResult>,
}

impl RunReport {
    /// Comparison complete, no differences and every quality check passed
    pub fn is_clean(&self) -> bool {
        self.comparison.is_clean() && self.quality.iter().all(QualityCheckResult::passed)
    }

    pub fn is_complete(&self) -> bool {
        self.comparison.is_complete() && self.quality.iter().all(|q| q.status.is_complete())
    }
}

fn slot(side: Side) -> usize {
    match side {
        Side::Source => 0,
        Side::Target => 1,
    }
}

enum Message {
    Chunk(Result<Chunk>),
    End { skipped: u64 },
}

/// One side read on its own thread
struct ChannelSide {
    name: String,
    rx: Option<Receiver<Message>>,
    timeout: Duration,
    skipped: u64,
    timed_out: bool,
    handle: Option<JoinHandle<()>>,
}

impl ChannelSide {
    fn spawn(mut stream: ChunkStream, queue_depth: usize) -> Result<Self> {
        let (tx, rx) = sync_channel(queue_depth.max(1));
        let name = stream.name().to_string();
        let timeout = stream.options().timeout;

        let handle = thread::Builder::new()
            .name(format!("tabrecon-chunks-{}", name))
            .spawn(move || {
                for item in stream.by_ref() {
                    let failed = item.is_err();
                    if tx.send(Message::Chunk(item)).is_err() || failed {
                        return;
                    }
                }
                let _ = tx.send(Message::End {
                    skipped: stream.skipped_rows(),
                });
            })?;

        Ok(Self {
            name,
            rx: Some(rx),
            timeout,
            skipped: 0,
            timed_out: false,
            handle: Some(handle),
        })
    }

    fn next(&mut self) -> Result<Option<Chunk>> {
        let rx = match self.rx.as_ref() {
            Some(rx) => rx,
            None => return Ok(None),
        };
        match rx.recv_timeout(self.timeout) {
            Ok(Message::Chunk(item)) => item.map(Some),
            Ok(Message::End { skipped }) => {
                self.skipped = skipped;
                self.rx = None;
                Ok(None)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.timed_out = true;
                Err(TabreconError::timeout(self.name.clone(), self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(TabreconError::connection(
                self.name.clone(),
                "chunk reader thread exited unexpectedly",
            )),
        }
    }
}

impl Drop for ChannelSide {
    fn drop(&mut self) {
        // Closing the channel stops the thread at its next send
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            if self.timed_out {
                log::warn!("Leaving chunk reader for {} running after timeout", self.name);
            } else if handle.join().is_err() {
                log::warn!("Chunk reader for {} panicked", self.name);
            }
        }
    }
}

/// Where chunks come from during a run
enum Feed {
    Sequential([ChunkStream; 2]),
    Parallel([ChannelSide; 2]),
}

impl Feed {
    fn open(source: ChunkStream, target: ChunkStream, options: &CompareOptions) -> Result<Self> {
        if options.parallel {
            log::debug!("Reading both sides in parallel (queue depth {})", options.queue_depth);
            Ok(Self::Parallel([
                ChannelSide::spawn(source, options.queue_depth)?,
                ChannelSide::spawn(target, options.queue_depth)?,
            ]))
        } else {
            Ok(Self::Sequential([source, target]))
        }
    }

    fn next(&mut self, side: Side) -> Result<Option<Chunk>> {
        match self {
            Self::Sequential(streams) => {
                let stream = &mut streams[slot(side)];
                let started = Instant::now();
                let item = stream.next().transpose()?;
                let timeout = stream.options().timeout;
                if started.elapsed() > timeout {
                    stream.close();
                    return Err(TabreconError::timeout(stream.name(), timeout));
                }
                Ok(item)
            }
            Self::Parallel(sides) => sides[slot(side)].next(),
        }
    }

    fn skipped(&self, side: Side) -> u64 {
        match self {
            Self::Sequential(streams) => streams[slot(side)].skipped_rows(),
            Self::Parallel(sides) => sides[slot(side)].skipped,
        }
    }
}

/// Runs comparisons and quality checks
pub struct Engine {
    options: CompareOptions,
    source_quality: Option<QualityOptions>,
    target_quality: Option<QualityOptions>,
    token: CancellationToken,
    progress: ProgressReporter,
}

impl Engine {
    pub fn new(options: CompareOptions) -> Self {
        Self {
            options,
            source_quality: None,
            target_quality: None,
            token: CancellationToken::new(),
            progress: ProgressReporter::new_minimal(),
        }
    }

    pub fn options(&self) -> &CompareOptions {
        &self.options
    }

    pub fn with_source_quality(mut self, options: QualityOptions) -> Self {
        self.source_quality = Some(options);
        self
    }

    pub fn with_target_quality(mut self, options: QualityOptions) -> Self {
        self.target_quality = Some(options);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn quality_checker(
        &self,
        side: Side,
        adapter_name: String,
        schema: &ReconciledSchema,
        columns: crate::model::Schema,
    ) -> Result<Option<QualityChecker>> {
        let options = match side {
            Side::Source => self.source_quality.clone(),
            Side::Target => self.target_quality.clone(),
        };
        let mut options = match options {
            Some(options) => options,
            None => return Ok(None),
        };
        if options.keys.is_empty() && !schema.implicit_keys {
            options.keys = schema
                .keys
                .iter()
                .map(|pair| match side {
                    Side::Source => pair.source.clone(),
                    Side::Target => pair.target.clone(),
                })
                .collect();
        }
        QualityChecker::new(adapter_name, options, columns).map(Some)
    }

    /// Compare two sources under a mapping.
    ///
    /// Schema, mapping and connection problems are returned as `Err` before
    /// any row is compared. Anything that fails mid-stream ends the run with
    /// the partial aggregate tagged incomplete.
    pub fn compare(
        &mut self,
        source: &mut dyn SourceAdapter,
        target: &mut dyn SourceAdapter,
        mapping: &ColumnMapping,
    ) -> Result<RunReport> {
        let (source_name, target_name) = (source.describe(), target.describe());
        log::info!("Comparing {} with {}", source_name, target_name);

        let source_schema = source.schema()?;
        let target_schema = target.schema()?;
        let reconciled = reconcile(&source_schema, &target_schema, mapping, &self.options.strategy)?;
        log::info!(
            "Reconciled {} column pairs, keys: {}",
            reconciled.pairs.len(),
            reconciled.key_names().join(", ")
        );

        let mut checkers = [
            self.quality_checker(Side::Source, source_name.clone(), &reconciled, source_schema.clone())?,
            self.quality_checker(Side::Target, target_name.clone(), &reconciled, target_schema.clone())?,
        ];

        let mut header = ResultHeader::new(reconciled.pairs.clone(), reconciled.key_names());
        header.source.name = source_name;
        header.target.name = target_name;

        let mut feed = Feed::open(source.stream()?, target.stream()?, &self.options)?;
        self.progress.finish_schema("Schemas reconciled");

        let mut comparator = Comparator::new(reconciled, &self.options);
        let mut agg = ComparisonAggregator::new(self.options.max_reported_diffs);

        let outcome = self.drive(&mut feed, &mut comparator, &mut checkers, &mut agg);
        let status = match outcome {
            Ok(()) => RunStatus::Complete,
            Err(TabreconError::Cancelled) => {
                log::warn!("Run {} cancelled", header.run_id);
                RunStatus::Cancelled
            }
            Err(e) => {
                log::error!("Run {} stopped: {}", header.run_id, e);
                RunStatus::from_error(&e)
            }
        };

        header.source.rows = comparator.rows_seen(Side::Source);
        header.target.rows = comparator.rows_seen(Side::Target);
        header.source.skipped_rows = feed.skipped(Side::Source);
        header.target.skipped_rows = feed.skipped(Side::Target);
        // Release files, connections, threads and spill files before reporting
        drop(feed);
        drop(comparator);

        let mut quality = Vec::new();
        for side in [Side::Source, Side::Target] {
            if let Some(checker) = checkers[slot(side)].take() {
                let (skipped, paired) = match side {
                    Side::Source => (header.source.skipped_rows, header.target.rows),
                    Side::Target => (header.target.skipped_rows, header.source.rows),
                };
                quality.push(checker.finish(status.clone(), skipped, Some(paired)));
            }
        }

        let comparison = agg.finish(header, status);
        self.progress.finish_rows("Comparison finished");
        log::info!(
            "Compared {} source rows and {} target rows: {} matched, {} mismatched, {} missing in target, {} missing in source, {} duplicate keys",
            comparison.source.rows,
            comparison.target.rows,
            comparison.counts.matched,
            comparison.counts.mismatched,
            comparison.counts.missing_in_target,
            comparison.counts.missing_in_source,
            comparison.counts.duplicate_key
        );
        Ok(RunReport { comparison, quality })
    }

    fn drive(
        &mut self,
        feed: &mut Feed,
        comparator: &mut Comparator,
        checkers: &mut [Option<QualityChecker>; 2],
        agg: &mut ComparisonAggregator,
    ) -> Result<()> {
        // Index of the next chunk expected from each side
        let mut next_chunk = [0u64; 2];
        while let Some(side) = comparator.next_side() {
            if self.token.is_cancelled() {
                return Err(TabreconError::Cancelled);
            }
            let expected = next_chunk[slot(side)];
            match feed.next(side).map_err(|e| e.at_chunk(expected, None))? {
                Some(chunk) => {
                    next_chunk[slot(side)] = chunk.index + 1;
                    if let Some(checker) = checkers[slot(side)].as_mut() {
                        checker.observe(&chunk).map_err(|e| e.at_chunk(chunk.index, None))?;
                    }
                    comparator.push_chunk(side, &chunk, agg)?;
                    self.progress.update_rows(side, comparator.rows_seen(side));
                }
                None => comparator
                    .finish_side(side, agg)
                    .map_err(|e| e.at_chunk(expected, None))?,
            }
        }
        Ok(())
    }

    /// Run quality checks over a single source
    pub fn check(&mut self, adapter: &mut dyn SourceAdapter, options: QualityOptions) -> Result<QualityCheckResult> {
        let name = adapter.describe();
        log::info!("Checking {}", name);
        let schema = adapter.schema()?;
        let mut checker = QualityChecker::new(name, options, schema)?;
        let mut stream = adapter.stream()?;
        self.progress.finish_schema("Schema read");

        let mut outcome = Ok(());
        let mut expected = 0u64;
        loop {
            if self.token.is_cancelled() {
                outcome = Err(TabreconError::Cancelled);
                break;
            }
            let started = Instant::now();
            let chunk = match stream.next() {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    outcome = Err(e.at_chunk(expected, None));
                    break;
                }
                None => break,
            };
            expected = chunk.index + 1;
            if started.elapsed() > stream.options().timeout {
                outcome = Err(TabreconError::timeout(stream.name(), stream.options().timeout).at_chunk(chunk.index, None));
                break;
            }
            if let Err(e) = checker.observe(&chunk) {
                outcome = Err(e.at_chunk(chunk.index, None));
                break;
            }
            self.progress.update_rows(Side::Source, checker.rows());
        }

        let status = match outcome {
            Ok(()) => RunStatus::Complete,
            Err(TabreconError::Cancelled) => RunStatus::Cancelled,
            Err(e) => {
                log::error!("Quality check of {} stopped: {}", checker.dataset(), e);
                RunStatus::from_error(&e)
            }
        };
        let skipped = stream.skipped_rows();
        drop(stream);
        self.progress.finish_rows("Checks finished");
        Ok(checker.finish(status, skipped, None))
    }
}
