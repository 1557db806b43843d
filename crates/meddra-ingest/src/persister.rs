//! Batch persistence: one unit of work per batch, all or nothing

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::normalizer::NormalizedRecord;
use crate::registry::SchemaMapping;
use crate::storage::{build_rows, Storage, StorageError};

/// Result of persisting one batch
#[derive(Debug)]
pub struct BatchOutcome {
    pub success: bool,
    pub records_processed: usize,
    pub error: Option<IngestError>,
    pub batch_number: usize,
    pub file_type: String,
}

impl BatchOutcome {
    fn succeeded(batch_number: usize, file_type: &str, records: usize) -> Self {
        Self {
            success: true,
            records_processed: records,
            error: None,
            batch_number,
            file_type: file_type.to_string(),
        }
    }

    fn failed(batch_number: usize, file_type: &str, source: StorageError) -> Self {
        Self {
            success: false,
            records_processed: 0,
            error: Some(IngestError::BatchPersistence {
                batch_number,
                file_type: file_type.to_string(),
                source,
            }),
            batch_number,
            file_type: file_type.to_string(),
        }
    }
}

/// Writes normalized batches through a [`Storage`] backend
#[derive(Clone)]
pub struct BatchPersister {
    storage: Arc<dyn Storage>,
    timeout: Option<Duration>,
}

impl BatchPersister {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            timeout: None,
        }
    }

    /// Roll back and fail a batch whose insert takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Persist one batch
    ///
    /// Rows are typed against the mapping before any scope is opened. Any
    /// failure afterwards rolls the scope back, so a failed batch leaves no
    /// rows behind.
    pub async fn persist(
        &self,
        mapping: &SchemaMapping,
        batch_number: usize,
        records: &[NormalizedRecord],
    ) -> BatchOutcome {
        let file_type = mapping.file_type();

        let rows = match build_rows(mapping, records) {
            Ok(rows) => rows,
            Err(e) => return BatchOutcome::failed(batch_number, file_type, e),
        };

        let mut scope = match self.storage.begin_scope().await {
            Ok(scope) => scope,
            Err(e) => return BatchOutcome::failed(batch_number, file_type, e),
        };

        let inserted = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, scope.insert_many(mapping, &rows))
                .await
                .unwrap_or(Err(StorageError::Timeout(limit))),
            None => scope.insert_many(mapping, &rows).await,
        };

        // The commit is awaited without a deadline: dropping it mid-flight
        // would leave the batch state unknown.
        let written = match inserted {
            Ok(_) => scope.commit().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                debug!(file_type, batch = batch_number, records = rows.len(), "Batch committed");
                BatchOutcome::succeeded(batch_number, file_type, rows.len())
            },
            Err(e) => {
                if let Err(rollback_err) = scope.rollback().await {
                    if !matches!(rollback_err, StorageError::ScopeClosed) {
                        warn!(
                            file_type,
                            batch = batch_number,
                            error = %rollback_err,
                            "Rollback failed"
                        );
                    }
                }
                BatchOutcome::failed(batch_number, file_type, e)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::SchemaRegistry;
    use crate::storage::MemoryStorage;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn records(values: &[(&str, &str)]) -> Vec<NormalizedRecord> {
        let now = Utc::now();
        values
            .iter()
            .map(|(hlt, pt)| NormalizedRecord {
                fields: vec![Some(hlt.to_string()), Some(pt.to_string())],
                created_at: now,
                updated_at: now,
                language: "en".to_string(),
                version: BigDecimal::from(28),
            })
            .collect()
    }

    fn hlt_pt() -> SchemaMapping {
        SchemaRegistry::meddra()
            .unwrap()
            .lookup("hlt_pt.asc")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_successful_batch_is_committed() {
        let storage = MemoryStorage::new();
        let persister = BatchPersister::new(Arc::new(storage.clone()));

        let outcome = persister
            .persist(&hlt_pt(), 1, &records(&[("10000001", "10000002"), ("10000001", "10000003")]))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.records_processed, 2);
        assert_eq!(outcome.file_type, "hlt_pt.asc");
        assert_eq!(storage.row_count("meddra_hlt_pref_comp"), 2);
        assert_eq!(storage.commits(), 1);
    }

    #[tokio::test]
    async fn test_invalid_value_fails_before_opening_scope() {
        let storage = MemoryStorage::new();
        let persister = BatchPersister::new(Arc::new(storage.clone()));

        let outcome = persister
            .persist(&hlt_pt(), 4, &records(&[("1", "2"), ("x", "3")]))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.records_processed, 0);
        let error = outcome.error.unwrap();
        assert_eq!(error.batch_number(), Some(4));
        assert!(error.to_string().contains("batch 4 of hlt_pt.asc"));
        assert_eq!(storage.total_rows(), 0);
        assert_eq!(storage.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_insert_failure_rolls_back() {
        let storage = MemoryStorage::new().fail_on_insert(1);
        let persister = BatchPersister::new(Arc::new(storage.clone()));

        let outcome = persister.persist(&hlt_pt(), 1, &records(&[("1", "2")])).await;

        assert!(!outcome.success);
        assert_eq!(storage.total_rows(), 0);
        assert_eq!(storage.rollbacks(), 1);
        assert_eq!(storage.open_scopes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rolls_back() {
        let storage = MemoryStorage::new().with_insert_delay(Duration::from_secs(30));
        let persister = BatchPersister::new(Arc::new(storage.clone()))
            .with_timeout(Some(Duration::from_secs(5)));

        let outcome = persister.persist(&hlt_pt(), 2, &records(&[("1", "2")])).await;

        assert!(!outcome.success);
        assert!(matches!(
            outcome.error,
            Some(IngestError::BatchPersistence {
                source: StorageError::Timeout(_),
                ..
            })
        ));
        assert_eq!(storage.total_rows(), 0);
        assert_eq!(storage.open_scopes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_commit_is_not_cut_off_by_timeout() {
        let storage = MemoryStorage::new().with_commit_delay(Duration::from_secs(30));
        let persister = BatchPersister::new(Arc::new(storage.clone()))
            .with_timeout(Some(Duration::from_secs(5)));

        let outcome = persister
            .persist(&hlt_pt(), 1, &records(&[("1", "2"), ("1", "3"), ("1", "4")]))
            .await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.records_processed, 3);
        assert_eq!(storage.row_count("meddra_hlt_pref_comp"), 3);
        assert_eq!(storage.commits(), 1);
        assert_eq!(storage.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_storage_fails_batch() {
        let storage = MemoryStorage::new();
        storage.set_available(false);
        let persister = BatchPersister::new(Arc::new(storage));

        let outcome = persister.persist(&hlt_pt(), 1, &records(&[("1", "2")])).await;
        assert!(!outcome.success);
    }
}
