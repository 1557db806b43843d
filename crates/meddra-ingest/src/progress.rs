//! Progress accounting and reporting
//!
//! [`ProgressTracker`] is pure bookkeeping for one file. Reporting goes
//! through a [`ProgressObserver`]: [`TracingObserver`] logs every batch,
//! [`ProgressBarObserver`] drives an `indicatif` bar on the terminal.

use indicatif::{ProgressBar, ProgressStyle};
use meddra_common::format::{format_bytes, format_duration};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::files::FileDescriptor;
use crate::pipeline::FileResult;

/// Progress of one operation
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    operation: String,
    total_items: u64,
    processed_items: u64,
    current_batch: usize,
    started_at: Instant,
}

impl ProgressTracker {
    pub fn new(total_items: u64, operation: impl Into<String>) -> Self {
        Self::with_start(total_items, operation, Instant::now())
    }

    /// Tracker whose clock started at `started_at`
    pub fn with_start(total_items: u64, operation: impl Into<String>, started_at: Instant) -> Self {
        Self {
            operation: operation.into(),
            total_items,
            processed_items: 0,
            current_batch: 0,
            started_at,
        }
    }

    /// Record a finished batch; `processed_so_far` is cumulative
    ///
    /// The processed count never decreases.
    pub fn update(&mut self, batch_number: usize, _batch_size: usize, processed_so_far: u64) {
        self.current_batch = batch_number;
        self.processed_items = self.processed_items.max(processed_so_far);
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    pub fn processed_items(&self) -> u64 {
        self.processed_items
    }

    pub fn current_batch(&self) -> usize {
        self.current_batch
    }

    /// Whole percent done, capped at 100; 100 when there is nothing to do
    pub fn percentage(&self) -> u8 {
        if self.total_items == 0 {
            return 100;
        }
        let percent = self.processed_items.saturating_mul(100) / self.total_items;
        percent.min(100) as u8
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Remaining time at the average rate so far
    pub fn eta(&self) -> Option<Duration> {
        self.eta_at(self.elapsed())
    }

    fn eta_at(&self, elapsed: Duration) -> Option<Duration> {
        if self.processed_items == 0 || elapsed.is_zero() {
            return None;
        }
        let rate = self.processed_items as f64 / elapsed.as_secs_f64();
        let remaining = self.total_items.saturating_sub(self.processed_items) as f64;
        Some(Duration::from_secs_f64(remaining / rate))
    }

    pub fn is_complete(&self) -> bool {
        self.processed_items >= self.total_items
    }

    /// `Progress: 40% - Batch 2 (4000/10000 records) - Elapsed: 1.2s - ETA: 1.8s`
    pub fn format_progress_message(&self) -> String {
        let elapsed = self.elapsed();
        let mut message = format!(
            "Progress: {}% - Batch {} ({}/{} records) - Elapsed: {}",
            self.percentage(),
            self.current_batch,
            self.processed_items,
            self.total_items,
            format_duration(elapsed)
        );
        if let Some(eta) = self.eta_at(elapsed).filter(|eta| !eta.is_zero()) {
            message.push_str(&format!(" - ETA: {}", format_duration(eta)));
        }
        message
    }
}

/// Receives pipeline progress events
pub trait ProgressObserver: Send + Sync {
    fn file_started(&self, _descriptor: &FileDescriptor) {}

    fn batch_completed(&self, file_type: &str, tracker: &ProgressTracker);

    fn file_finished(&self, _result: &FileResult) {}
}

/// Logs progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn file_started(&self, descriptor: &FileDescriptor) {
        info!(
            file_type = %descriptor.file_type,
            path = %descriptor.path.display(),
            size = %format_bytes(descriptor.size_bytes),
            lines = descriptor.line_count,
            "Processing file"
        );
    }

    fn batch_completed(&self, file_type: &str, tracker: &ProgressTracker) {
        info!(
            file_type,
            batch = tracker.current_batch(),
            processed = tracker.processed_items(),
            total = tracker.total_items(),
            percent = tracker.percentage(),
            "{}",
            tracker.format_progress_message()
        );
    }

    fn file_finished(&self, result: &FileResult) {
        if result.success {
            info!(
                file_type = %result.file_type,
                records = result.records_processed,
                batches = result.batches_processed,
                skipped_lines = result.reader_stats.skipped_lines(),
                elapsed = %format_duration(result.elapsed),
                "Completed file"
            );
        } else {
            warn!(
                file_type = %result.file_type,
                records = result.records_processed,
                error = %result
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                "File failed"
            );
        }
    }
}

/// Terminal progress bar, one bar per file
#[derive(Default)]
pub struct ProgressBarObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressBarObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, f: impl FnOnce(&mut Option<ProgressBar>)) {
        match self.bar.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

/// Create a record-count progress bar for one file
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

impl ProgressObserver for ProgressBarObserver {
    fn file_started(&self, descriptor: &FileDescriptor) {
        let bar = create_progress_bar(
            descriptor.line_count,
            &format!("{} ({})", descriptor.file_type, format_bytes(descriptor.size_bytes)),
        );
        self.with_bar(|slot| *slot = Some(bar));
    }

    fn batch_completed(&self, _file_type: &str, tracker: &ProgressTracker) {
        self.with_bar(|slot| {
            if let Some(bar) = slot {
                bar.set_position(tracker.processed_items());
            }
        });
    }

    fn file_finished(&self, result: &FileResult) {
        self.with_bar(|slot| {
            if let Some(bar) = slot.take() {
                if result.success {
                    bar.finish_with_message(format!(
                        "{}: {} records",
                        result.file_type, result.records_processed
                    ));
                } else {
                    bar.abandon_with_message(format!("{}: failed", result.file_type));
                }
            }
        });
    }
}
