//! Run coordination: connection check, single file or directory, dry runs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use meddra_common::format::format_bytes;

use crate::config::ProcessingConfig;
use crate::directory::{DirectoryPipeline, RunSummary};
use crate::error::{IngestError, Result};
use crate::files::{file_type_from_path, validate_file_path, FileDescriptor};
use crate::pipeline::{FilePipeline, FileResult};
use crate::progress::ProgressObserver;
use crate::registry::SchemaRegistry;
use crate::storage::{MemoryStorage, Storage};

/// What to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    File(PathBuf),
    Directory(PathBuf),
}

impl RunTarget {
    pub fn path(&self) -> &Path {
        match self {
            RunTarget::File(path) | RunTarget::Directory(path) => path,
        }
    }
}

/// Result of a completed run
#[derive(Debug)]
pub enum RunReport {
    File(FileResult),
    Directory(RunSummary),
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        match self {
            RunReport::File(result) => result.success,
            RunReport::Directory(summary) => summary.is_success(),
        }
    }

    pub fn total_records(&self) -> usize {
        match self {
            RunReport::File(result) if result.success => result.records_processed,
            RunReport::File(_) => 0,
            RunReport::Directory(summary) => summary.total_records,
        }
    }
}

/// Loads a file or directory into a storage backend
pub struct Runner {
    storage: Arc<dyn Storage>,
    files: FilePipeline,
    suffix: String,
}

impl Runner {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<SchemaRegistry>,
        config: &ProcessingConfig,
    ) -> Self {
        Self {
            files: FilePipeline::new(registry, Arc::clone(&storage), config),
            storage,
            suffix: config.file_suffix.clone(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.files = self.files.with_observer(observer);
        self
    }

    /// Check connectivity once, then load `target`
    pub async fn run(&self, target: &RunTarget) -> Result<RunReport> {
        if !self.storage.test_connection().await {
            return Err(IngestError::Connection(
                "database connection test failed".to_string(),
            ));
        }
        info!("Setup validation passed");

        match target {
            RunTarget::File(path) => self.run_file(path).await.map(RunReport::File),
            RunTarget::Directory(dir) => {
                let summary = DirectoryPipeline::new(self.files.clone(), self.suffix.clone())
                    .process(dir)
                    .await?;
                summary.log();
                Ok(RunReport::Directory(summary))
            },
        }
    }

    async fn run_file(&self, path: &Path) -> Result<FileResult> {
        info!(path = %path.display(), "Processing single file");

        let file_type = file_type_from_path(path);
        let registry = self.files.registry();
        if !registry.is_supported(&file_type) {
            let supported: Vec<String> = registry.all_supported_types().into_iter().collect();
            error!(
                file_type = %file_type,
                supported = %supported.join(", "),
                "Unsupported file type"
            );
            return Err(IngestError::UnsupportedFileType { file_type });
        }

        let result = self.files.process(path).await;
        if result.success {
            info!(records = result.records_processed, "Successfully processed file");
        } else {
            error!(
                error = %result.error_message().unwrap_or_default(),
                "Failed to process file"
            );
        }
        Ok(result)
    }
}

/// One file as seen by a dry run
#[derive(Debug, Clone)]
pub struct DryRunEntry {
    pub path: PathBuf,
    pub file_type: String,
    pub supported: bool,
    pub size_bytes: u64,
    pub line_count: u64,
    /// Records that would be loaded, for supported files that parsed
    pub records: Option<usize>,
    pub skipped_lines: u64,
    pub error: Option<String>,
}

/// Files a run would process, checked against the registry without a database
#[derive(Debug, Clone, Default)]
pub struct DryRunReport {
    pub entries: Vec<DryRunEntry>,
    /// Single file runs fail on an unsupported type
    pub require_supported: bool,
}

impl DryRunReport {
    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|entry| {
            entry.error.is_none() && (entry.supported || !self.require_supported)
        })
    }

    pub fn log(&self) {
        info!(files = self.entries.len(), "Dry run: no data will be written");
        for entry in &self.entries {
            if !entry.supported {
                warn!(
                    path = %entry.path.display(),
                    file_type = %entry.file_type,
                    "Would skip unsupported file type"
                );
                continue;
            }
            match &entry.error {
                None => info!(
                    path = %entry.path.display(),
                    file_type = %entry.file_type,
                    size = %format_bytes(entry.size_bytes),
                    lines = entry.line_count,
                    records = entry.records.unwrap_or(0),
                    skipped_lines = entry.skipped_lines,
                    "Would process file"
                ),
                Some(error) => error!(
                    path = %entry.path.display(),
                    file_type = %entry.file_type,
                    %error,
                    "File would fail"
                ),
            }
        }
    }
}

/// Parse `target` end to end into a discarding in-memory store
///
/// Every supported file goes through the same reader, normalizer and typed
/// row construction as a real run, so value errors show up here.
pub async fn dry_run(
    target: &RunTarget,
    registry: Arc<SchemaRegistry>,
    config: &ProcessingConfig,
) -> Result<DryRunReport> {
    let (paths, require_supported) = match target {
        RunTarget::File(path) => {
            validate_file_path(path)?;
            (vec![path.clone()], true)
        },
        RunTarget::Directory(dir) => (crate::files::find_files(dir, &config.file_suffix)?, false),
    };

    let storage = MemoryStorage::discarding();
    let files = FilePipeline::new(Arc::clone(&registry), Arc::new(storage), config);

    let mut report = DryRunReport {
        entries: Vec::with_capacity(paths.len()),
        require_supported,
    };

    for path in paths {
        report.entries.push(check_file(&files, &registry, path).await);
    }

    Ok(report)
}

/// Dry-run one file; a supported file that cannot be inspected is reported, not raised
async fn check_file(files: &FilePipeline, registry: &SchemaRegistry, path: PathBuf) -> DryRunEntry {
    let file_type = file_type_from_path(&path);
    let supported = registry.is_supported(&file_type);

    let descriptor = match FileDescriptor::inspect(&path) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            return DryRunEntry {
                path,
                file_type,
                supported,
                size_bytes: 0,
                line_count: 0,
                records: None,
                skipped_lines: 0,
                error: supported.then(|| e.to_string()),
            };
        },
    };

    let (records, skipped_lines, error) = if supported {
        let result = files.process(&path).await;
        (
            result.success.then_some(result.records_processed),
            result.reader_stats.skipped_lines(),
            result.error_message(),
        )
    } else {
        (None, 0, None)
    };

    DryRunEntry {
        path: descriptor.path,
        file_type: descriptor.file_type,
        supported,
        size_bytes: descriptor.size_bytes,
        line_count: descriptor.line_count,
        records,
        skipped_lines,
        error,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner(storage: &MemoryStorage) -> Runner {
        Runner::new(
            Arc::new(storage.clone()),
            Arc::new(SchemaRegistry::meddra().unwrap()),
            &ProcessingConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_connection_failure_aborts_before_any_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("intl_ord.asc"), "1$10005329$\n").unwrap();

        let storage = MemoryStorage::new();
        storage.set_available(false);

        let err = runner(&storage)
            .run(&RunTarget::Directory(dir.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Connection(_)));
        assert!(err.is_run_fatal());
        assert_eq!(storage.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_single_unsupported_file_fails_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("llt_history.asc");
        std::fs::write(&path, "1$2$\n").unwrap();

        let err = runner(&MemoryStorage::new())
            .run(&RunTarget::File(path))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFileType { ref file_type } if file_type == "llt_history.asc"));
    }

    #[tokio::test]
    async fn test_single_file_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("intl_ord.asc");
        std::fs::write(&path, "1$10005329$\n2$10010331$\n").unwrap();

        let storage = MemoryStorage::new();
        let report = runner(&storage).run(&RunTarget::File(path)).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_records(), 2);
        assert_eq!(storage.row_count("meddra_soc_intl_order"), 2);
    }

    #[tokio::test]
    async fn test_dry_run_reports_files_without_loading() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("intl_ord.asc"), "1$10005329$\n2$10010331$\n").unwrap();
        std::fs::write(dir.path().join("soc_hlgt.asc"), "x$y$\n").unwrap();
        std::fs::write(dir.path().join("extra.asc"), "1\n").unwrap();

        let report = dry_run(
            &RunTarget::Directory(dir.path().to_path_buf()),
            Arc::new(SchemaRegistry::meddra().unwrap()),
            &ProcessingConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.entries.len(), 3);
        let by_type = |t: &str| report.entries.iter().find(|e| e.file_type == t).unwrap();

        assert!(!by_type("extra.asc").supported);
        assert_eq!(by_type("intl_ord.asc").records, Some(2));
        assert_eq!(by_type("intl_ord.asc").line_count, 2);
        assert!(by_type("soc_hlgt.asc").error.is_some());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_uninspectable_file_is_reported_in_its_entry() {
        let dir = TempDir::new().unwrap();
        let registry = SchemaRegistry::meddra().unwrap();
        let files = FilePipeline::new(
            Arc::new(registry.clone()),
            Arc::new(MemoryStorage::discarding()),
            &ProcessingConfig::default(),
        );

        // Listed by discovery, gone by the time it is inspected
        let entry = check_file(&files, &registry, dir.path().join("pt.asc")).await;

        assert_eq!(entry.file_type, "pt.asc");
        assert!(entry.supported);
        assert!(entry.records.is_none());
        assert!(entry.error.unwrap().contains("file not found"));
    }

    #[tokio::test]
    async fn test_dry_run_single_unsupported_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readme.asc");
        std::fs::write(&path, "hello\n").unwrap();

        let report = dry_run(
            &RunTarget::File(path),
            Arc::new(SchemaRegistry::meddra().unwrap()),
            &ProcessingConfig::default(),
        )
        .await
        .unwrap();
        assert!(!report.is_success());
    }
}
