//! Single file pipeline
//!
//! ```text
//! Validating -> Reading -> { Normalizing -> Persisting }* -> Completed
//!                  |               |              |
//!                  +---------------+--------------+-------> Failed
//! ```
//!
//! Batches are persisted one at a time, in order. The first failing batch
//! stops the file; batches committed before it stay committed and are
//! counted in the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::ProcessingConfig;
use crate::error::IngestError;
use crate::files::{file_type_from_path, validate_file_path, FileDescriptor};
use crate::normalizer::{Clock, EnrichmentContext, RowNormalizer};
use crate::persister::BatchPersister;
use crate::progress::{ProgressObserver, ProgressTracker, TracingObserver};
use crate::reader::{ChunkedReader, ReaderOptions, ReaderStats};
use crate::registry::{SchemaMapping, SchemaRegistry};
use crate::storage::Storage;

/// Where a file is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStage {
    Validating,
    Reading,
    Normalizing,
    Persisting,
    Completed,
    Failed,
}

impl std::fmt::Display for FileStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileStage::Validating => "validating",
            FileStage::Reading => "reading",
            FileStage::Normalizing => "normalizing",
            FileStage::Persisting => "persisting",
            FileStage::Completed => "completed",
            FileStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of loading one file
#[derive(Debug)]
pub struct FileResult {
    pub path: PathBuf,
    pub file_type: String,
    pub success: bool,
    /// `Completed` or `Failed`
    pub stage: FileStage,
    /// Stage that was running when the file failed
    pub failed_at: Option<FileStage>,
    /// Records committed, including those of batches before a failure
    pub records_processed: usize,
    /// Batches committed
    pub batches_processed: usize,
    pub failed_batch: Option<usize>,
    pub reader_stats: ReaderStats,
    pub elapsed: Duration,
    pub error: Option<IngestError>,
}

impl FileResult {
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

impl std::fmt::Display for FileResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            None => write!(f, "Success: {} records processed", self.records_processed),
            Some(e) => write!(f, "Failed: {}", e),
        }
    }
}

/// Progress of the file currently being loaded
struct FileRun {
    stage: FileStage,
    records: usize,
    batches: usize,
    failed_batch: Option<usize>,
    reader_stats: ReaderStats,
}

/// Loads one file: reader -> normalizer -> persister -> tracker
#[derive(Clone)]
pub struct FilePipeline {
    registry: Arc<SchemaRegistry>,
    persister: BatchPersister,
    normalizer: RowNormalizer,
    reader_options: ReaderOptions,
    observer: Arc<dyn ProgressObserver>,
}

impl FilePipeline {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        storage: Arc<dyn Storage>,
        config: &ProcessingConfig,
    ) -> Self {
        let context = EnrichmentContext::new(config.language.clone(), config.version.clone());

        Self {
            registry,
            persister: BatchPersister::new(storage).with_timeout(config.persist_timeout),
            normalizer: RowNormalizer::new(context, config.null_markers()),
            reader_options: ReaderOptions::from_config(config),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Use `clock` for `created_at` / `updated_at`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.normalizer = self.normalizer.with_clock(clock);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn observer(&self) -> &Arc<dyn ProgressObserver> {
        &self.observer
    }

    /// Load `path`; failures are reported in the returned [`FileResult`]
    pub async fn process(&self, path: &Path) -> FileResult {
        let started = Instant::now();
        let file_type = file_type_from_path(path);

        let mut run = FileRun {
            stage: FileStage::Validating,
            records: 0,
            batches: 0,
            failed_batch: None,
            reader_stats: ReaderStats::default(),
        };

        let outcome = self.run(path, &file_type, &mut run).await;

        let result = FileResult {
            path: path.to_path_buf(),
            file_type,
            success: outcome.is_ok(),
            stage: if outcome.is_ok() {
                FileStage::Completed
            } else {
                FileStage::Failed
            },
            failed_at: outcome.is_err().then_some(run.stage),
            records_processed: run.records,
            batches_processed: run.batches,
            failed_batch: run.failed_batch,
            reader_stats: run.reader_stats,
            elapsed: started.elapsed(),
            error: outcome.err(),
        };

        self.observer.file_finished(&result);
        result
    }

    async fn run(
        &self,
        path: &Path,
        file_type: &str,
        run: &mut FileRun,
    ) -> Result<(), IngestError> {
        validate_file_path(path)?;
        let mapping = self.mapping_for(file_type)?;
        let descriptor = FileDescriptor::inspect(path)?;

        self.observer.file_started(&descriptor);
        let mut tracker =
            ProgressTracker::new(descriptor.line_count, format!("Processing {}", file_type));

        run.stage = FileStage::Reading;
        let mut reader = ChunkedReader::open(path, mapping.column_count(), &self.reader_options)?;

        loop {
            run.stage = FileStage::Reading;
            let next = reader.next_batch();
            run.reader_stats = reader.stats();
            let Some(batch) = next? else {
                break;
            };

            let batch_number = batch.batch_number;
            let batch_len = batch.len();

            run.stage = FileStage::Normalizing;
            let records = self.normalizer.normalize(batch);

            run.stage = FileStage::Persisting;
            let outcome = self.persister.persist(mapping, batch_number, &records).await;
            if let Some(error) = outcome.error {
                run.failed_batch = Some(batch_number);
                return Err(error);
            }

            run.records += outcome.records_processed;
            run.batches += 1;
            tracker.update(batch_number, batch_len, run.records as u64);
            self.observer.batch_completed(file_type, &tracker);
        }

        let stats = reader.stats();
        run.reader_stats = stats;
        if stats.skipped_lines() > 0 {
            warn!(
                file_type,
                too_many_fields = stats.too_many_fields,
                undecodable = stats.undecodable,
                "Skipped malformed lines"
            );
        }

        info!(
            file_type,
            records = run.records,
            batches = run.batches,
            "Finished reading file"
        );
        Ok(())
    }

    fn mapping_for(&self, file_type: &str) -> Result<&SchemaMapping, IngestError> {
        self.registry
            .lookup(file_type)
            .ok_or_else(|| IngestError::UnsupportedFileType {
                file_type: file_type.to_string(),
            })
    }
}
