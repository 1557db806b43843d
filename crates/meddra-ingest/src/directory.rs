//! Directory pipeline: every supported file in a directory, one at a time

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::error::{IngestError, Result};
use crate::files::{file_type_from_path, find_files};
use crate::pipeline::{FilePipeline, FileResult};

/// A file left out because no mapping exists for its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub file_type: String,
}

/// A file that was attempted and failed
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub file_type: String,
    /// Records committed before the failure
    pub records_committed: usize,
    pub error: IngestError,
}

/// Aggregate of a directory run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub files_found: usize,
    pub files_attempted: usize,
    pub files_succeeded: usize,
    /// Records of successfully loaded files
    pub total_records: usize,
    pub skipped: Vec<SkippedFile>,
    pub failures: Vec<FileFailure>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Fold one file result into the summary
    pub fn record(&mut self, result: FileResult) {
        self.files_attempted += 1;

        match result.error {
            None => {
                self.files_succeeded += 1;
                self.total_records += result.records_processed;
            },
            Some(error) => self.failures.push(FileFailure {
                path: result.path,
                file_type: result.file_type,
                records_committed: result.records_processed,
                error,
            }),
        }
    }

    pub fn skip(&mut self, path: PathBuf, file_type: String) {
        self.skipped.push(SkippedFile { path, file_type });
    }

    /// A run succeeds when no attempted file failed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Log the end-of-run summary
    pub fn log(&self) {
        info!(
            files_found = self.files_found,
            files_attempted = self.files_attempted,
            files_succeeded = self.files_succeeded,
            files_skipped = self.skipped.len(),
            total_records = self.total_records,
            "Processing summary: {}/{} files processed, {} records",
            self.files_succeeded,
            self.files_found,
            self.total_records
        );

        for failure in &self.failures {
            error!(
                path = %failure.path.display(),
                file_type = %failure.file_type,
                records_committed = failure.records_committed,
                error = %failure.error,
                "Failed file"
            );
        }
    }
}

/// Drives a [`FilePipeline`] over a directory
#[derive(Clone)]
pub struct DirectoryPipeline {
    files: FilePipeline,
    suffix: String,
}

impl DirectoryPipeline {
    pub fn new(files: FilePipeline, suffix: impl Into<String>) -> Self {
        Self {
            files,
            suffix: suffix.into(),
        }
    }

    /// Files that would be considered, sorted
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        find_files(dir, &self.suffix)
    }

    /// Load every supported file under `dir`
    ///
    /// Per-file failures are recorded in the summary and do not stop the
    /// run. An error is returned only when the directory cannot be listed.
    pub async fn process(&self, dir: &Path) -> Result<RunSummary> {
        let started = Instant::now();
        let files = self.discover(dir)?;

        let mut summary = RunSummary {
            files_found: files.len(),
            ..Default::default()
        };

        if files.is_empty() {
            warn!(dir = %dir.display(), suffix = %self.suffix, "No matching files found");
            summary.elapsed = started.elapsed();
            return Ok(summary);
        }

        info!(dir = %dir.display(), files = files.len(), "Found files to process");

        for path in files {
            let file_type = file_type_from_path(&path);

            if !self.files.registry().is_supported(&file_type) {
                info!(file_type = %file_type, "Skipping unsupported file type");
                summary.skip(path, file_type);
                continue;
            }

            let result = self.files.process(&path).await;
            summary.record(result);
        }

        summary.elapsed = started.elapsed();
        Ok(summary)
    }
}
