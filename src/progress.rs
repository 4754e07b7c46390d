//! Progress reporting utilities

use crate::result::Side;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Progress reporter for comparison and check runs
#[derive(Debug)]
pub struct ProgressReporter {
    pub schema_pb: Option<ProgressBar>,
    pub source_pb: Option<ProgressBar>,
    pub target_pb: Option<ProgressBar>,
    show_progress: bool,
    start_time: Instant,
}

impl ProgressReporter {
    /// Create progress reporter for a source/target comparison
    pub fn new_for_compare() -> Self {
        Self {
            schema_pb: Some(create_spinner("Reconciling schemas...")),
            source_pb: None,
            target_pb: None,
            show_progress: true,
            start_time: Instant::now(),
        }
    }

    /// Create progress reporter for a standalone quality check
    pub fn new_for_check() -> Self {
        Self {
            schema_pb: Some(create_spinner("Reading schema...")),
            source_pb: None,
            target_pb: None,
            show_progress: true,
            start_time: Instant::now(),
        }
    }

    /// Create minimal progress reporter (no progress bars)
    pub fn new_minimal() -> Self {
        Self {
            schema_pb: None,
            source_pb: None,
            target_pb: None,
            show_progress: false,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Lazily create the row counter for one side
    fn ensure_side_pb(&mut self, side: Side) -> Option<&ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let slot = match side {
            Side::Source => &mut self.source_pb,
            Side::Target => &mut self.target_pb,
        };
        if slot.is_none() {
            *slot = Some(create_row_counter(&format!("{} rows", side)));
        }
        slot.as_ref()
    }

    /// Finish schema work and prepare for row processing
    pub fn finish_schema(&mut self, message: &str) {
        if let Some(pb) = self.schema_pb.take() {
            pb.finish_with_message(message.to_string());
        }
    }

    /// Update rows read from one side
    pub fn update_rows(&mut self, side: Side, rows: u64) {
        if let Some(pb) = self.ensure_side_pb(side) {
            pb.set_position(rows);
        }
    }

    /// Finish row processing
    pub fn finish_rows(&mut self, message: &str) {
        for pb in [self.source_pb.take(), self.target_pb.take()].into_iter().flatten() {
            pb.finish_with_message(message.to_string());
        }
    }

    /// Finish all progress bars
    pub fn finish_all(&mut self, message: &str) {
        self.finish_schema(message);
        self.finish_rows(message);
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        // Ensure all progress bars are cleaned up silently
        for pb in [self.schema_pb.take(), self.source_pb.take(), self.target_pb.take()]
            .into_iter()
            .flatten()
        {
            pb.finish_and_clear();
        }
    }
}

/// Create a spinner progress bar
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.green} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Create a spinner that counts rows without a known total
fn create_row_counter(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos:>10} ({per_sec}) {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb
}
