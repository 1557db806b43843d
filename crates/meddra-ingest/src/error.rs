//! Error types for MedDRA ingestion

use std::path::PathBuf;
use thiserror::Error;

use crate::registry::RegistryError;
use crate::storage::StorageError;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised while loading MedDRA files
///
/// File-level variants are converted into a failed `FileResult` by the file
/// pipeline; `Connection`, `Config` and `Registry` abort the whole run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unsupported file type: '{file_type}'")]
    UnsupportedFileType { file_type: String },

    #[error("Error accessing '{}': {reason}", .path.display())]
    FileAccess { path: PathBuf, reason: String },

    #[error("Could not decode '{}' with any of the attempted encodings: {}", .path.display(), .attempted.join(", "))]
    Decoding {
        path: PathBuf,
        attempted: Vec<String>,
    },

    #[error("Error reading '{}' at line {line}: {source}", .path.display())]
    Read {
        path: PathBuf,
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Error processing batch {batch_number} of {file_type}: {source}")]
    BatchPersistence {
        batch_number: usize,
        file_type: String,
        #[source]
        source: StorageError,
    },

    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl IngestError {
    /// Create a file access error
    pub fn file_access(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::FileAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error aborts the whole run rather than a single file
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Connection(_) | IngestError::Config(_) | IngestError::Registry(_)
        )
    }

    /// Batch number for batch persistence failures
    pub fn batch_number(&self) -> Option<usize> {
        match self {
            IngestError::BatchPersistence { batch_number, .. } => Some(*batch_number),
            _ => None,
        }
    }
}

impl From<meddra_common::CommonError> for IngestError {
    fn from(err: meddra_common::CommonError) -> Self {
        IngestError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoding_error_names_all_encodings() {
        let err = IngestError::Decoding {
            path: PathBuf::from("/data/llt.asc"),
            attempted: vec!["UTF-8".to_string(), "windows-1252".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("/data/llt.asc"));
        assert!(message.contains("UTF-8, windows-1252"));
    }

    #[test]
    fn test_batch_error_carries_batch_number() {
        let err = IngestError::BatchPersistence {
            batch_number: 7,
            file_type: "pt.asc".to_string(),
            source: StorageError::ScopeClosed,
        };
        assert_eq!(err.batch_number(), Some(7));
        assert!(err.to_string().contains("batch 7 of pt.asc"));
        assert!(!err.is_run_fatal());
    }

    #[test]
    fn test_connection_error_is_run_fatal() {
        assert!(IngestError::Connection("refused".to_string()).is_run_fatal());
        assert!(!IngestError::UnsupportedFileType {
            file_type: "x.asc".to_string()
        }
        .is_run_fatal());
    }
}
