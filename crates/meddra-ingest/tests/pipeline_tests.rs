//! Integration tests for the file pipeline
//!
//! These tests run the full read -> normalize -> persist path against the
//! in-memory storage backend:
//! - Batch partitioning and record counts
//! - Batch-level atomicity on failure
//! - Shared load timestamps within a batch
//! - Column ordering from custom mappings

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bigdecimal::BigDecimal;
use chrono::{TimeZone, Utc};
use meddra_ingest::config::ProcessingConfig;
use meddra_ingest::normalizer::FixedClock;
use meddra_ingest::pipeline::{FilePipeline, FileStage};
use meddra_ingest::registry::SchemaRegistry;
use meddra_ingest::storage::{MemoryStorage, SqlValue};
use meddra_ingest::IngestError;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn config(batch_size: usize) -> ProcessingConfig {
    ProcessingConfig {
        batch_size,
        ..Default::default()
    }
}

fn pipeline(storage: &MemoryStorage, batch_size: usize) -> FilePipeline {
    FilePipeline::new(
        Arc::new(SchemaRegistry::meddra().unwrap()),
        Arc::new(storage.clone()),
        &config(batch_size),
    )
}

fn soc_hlgt_rows(n: usize) -> String {
    (0..n)
        .map(|i| format!("{}${}$\n", 10_000_000 + i, 10_100_000 + i))
        .collect()
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn test_five_rows_in_batches_of_two() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "soc_hlgt.asc", &soc_hlgt_rows(5));

    let storage = MemoryStorage::new();
    let result = pipeline(&storage, 2).process(&path).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.batches_processed, 3);
    assert_eq!(result.records_processed, 5);
    assert_eq!(storage.commits(), 3);
    assert_eq!(storage.row_count("meddra_soc_hlgt_comp"), 5);
    assert_eq!(result.to_string(), "Success: 5 records processed");
}

#[tokio::test]
async fn test_batch_count_is_ceiling_of_rows_over_batch_size() {
    for (rows, batch_size) in [(1, 1), (10, 3), (12, 4), (7, 100)] {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "soc_hlgt.asc", &soc_hlgt_rows(rows));

        let storage = MemoryStorage::new();
        let result = pipeline(&storage, batch_size).process(&path).await;

        assert!(result.success);
        assert_eq!(result.batches_processed, rows.div_ceil(batch_size));
        assert_eq!(result.records_processed, rows);
    }
}

#[tokio::test]
async fn test_empty_file_succeeds_with_no_batches() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "hlt_pt.asc", "");

    let storage = MemoryStorage::new();
    let result = pipeline(&storage, 10).process(&path).await;

    assert!(result.success);
    assert_eq!(result.batches_processed, 0);
    assert_eq!(result.records_processed, 0);
    assert_eq!(storage.insert_calls(), 0);
}

// ============================================================================
// Normalization and enrichment
// ============================================================================

#[tokio::test]
async fn test_rows_carry_shared_timestamp_language_and_version() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "soc_hlgt.asc", &soc_hlgt_rows(3));

    let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap();
    let storage = MemoryStorage::new();
    let config = ProcessingConfig {
        language: "ja".to_string(),
        version: BigDecimal::from_str("27.1").unwrap(),
        ..config(10)
    };
    let result = FilePipeline::new(
        Arc::new(SchemaRegistry::meddra().unwrap()),
        Arc::new(storage.clone()),
        &config,
    )
    .with_clock(Arc::new(FixedClock(at)))
    .process(&path)
    .await;

    assert!(result.success);
    let rows = storage.rows("meddra_soc_hlgt_comp");
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row.created_at, at);
        assert_eq!(row.updated_at, at);
        assert_eq!(row.language, "ja");
        assert_eq!(row.version, BigDecimal::from_str("27.1").unwrap());
    }
}

#[tokio::test]
async fn test_empty_fields_are_stored_as_null() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        &dir,
        "meddra_release.asc",
        "28.0$English$$$$\n",
    );

    let storage = MemoryStorage::new();
    let result = pipeline(&storage, 10).process(&path).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        storage.value("meddra_release", 0, "meddra_version"),
        Some(SqlValue::Text(Some("28.0".to_string())))
    );
    assert_eq!(
        storage.value("meddra_release", 0, "null_field_a"),
        Some(SqlValue::Text(None))
    );
}

#[tokio::test]
async fn test_short_and_long_lines() {
    let dir = TempDir::new().unwrap();
    // Short line is padded, the line with an extra field is skipped
    let path = write_file(&dir, "hlt_pt.asc", "10000001$10000002$\n10000003\n1$2$3$4\n");

    let storage = MemoryStorage::new();
    let result = pipeline(&storage, 10).process(&path).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.records_processed, 2);
    assert_eq!(result.reader_stats.too_many_fields, 1);
    assert_eq!(
        storage.value("meddra_hlt_pref_comp", 1, "pt_code"),
        Some(SqlValue::Numeric(None))
    );
}

#[tokio::test]
async fn test_late_legacy_bytes_switch_the_whole_file_to_fallback() {
    let dir = TempDir::new().unwrap();
    let mut bytes = Vec::new();
    while bytes.len() < 70 * 1024 {
        bytes.extend_from_slice(b"28.0$English$$$$\n");
    }
    for _ in 0..3 {
        bytes.extend_from_slice(b"28.0$M\xE9ni\xE8re$$$$\n");
    }
    let path = dir.path().join("meddra_release.asc");
    std::fs::write(&path, &bytes).unwrap();

    let storage = MemoryStorage::new();
    let result = pipeline(&storage, 5000).process(&path).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.reader_stats.undecodable, 0);
    assert_eq!(result.records_processed as u64, result.reader_stats.lines_read);

    let last = storage.row_count("meddra_release") - 1;
    assert_eq!(
        storage.value("meddra_release", last, "language_version"),
        Some(SqlValue::Text(Some("Ménière".to_string())))
    );
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_failing_batch_leaves_none_of_its_rows() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "soc_hlgt.asc", &soc_hlgt_rows(6));

    // Second insert call fails: batch 1 commits, batch 2 rolls back
    let storage = MemoryStorage::new().fail_on_insert(2);
    let result = pipeline(&storage, 2).process(&path).await;

    assert!(!result.success);
    assert_eq!(result.failed_at, Some(FileStage::Persisting));
    assert_eq!(result.failed_batch, Some(2));
    assert_eq!(result.records_processed, 2);
    assert_eq!(storage.row_count("meddra_soc_hlgt_comp"), 2);
    assert_eq!(storage.commits(), 1);
    assert_eq!(storage.rollbacks(), 1);
    assert_eq!(storage.open_scopes(), 0);

    let error = result.error.unwrap();
    assert!(matches!(error, IngestError::BatchPersistence { .. }));
    assert_eq!(error.batch_number(), Some(2));
}

#[tokio::test]
async fn test_bad_numeric_in_later_batch_keeps_earlier_batches() {
    let dir = TempDir::new().unwrap();
    let mut contents = soc_hlgt_rows(4);
    contents.push_str("not-a-code$10000001$\n");
    contents.push_str(&soc_hlgt_rows(1));
    let path = write_file(&dir, "soc_hlgt.asc", &contents);

    let storage = MemoryStorage::new();
    let result = pipeline(&storage, 2).process(&path).await;

    assert!(!result.success);
    assert_eq!(result.failed_batch, Some(3));
    assert_eq!(result.records_processed, 4);
    assert_eq!(storage.row_count("meddra_soc_hlgt_comp"), 4);
}

#[tokio::test]
async fn test_value_too_long_for_varchar_fails_batch() {
    let dir = TempDir::new().unwrap();
    let long_abbrev = "ABCDEFG";
    let path = write_file(
        &dir,
        "soc.asc",
        &format!("10005329$Blood and lymphatic system disorders${}$$$$$$$$\n", long_abbrev),
    );

    let storage = MemoryStorage::new();
    let result = pipeline(&storage, 10).process(&path).await;

    assert!(!result.success);
    assert_eq!(storage.row_count("meddra_soc_term"), 0);
}

// ============================================================================
// Custom mappings
// ============================================================================

#[tokio::test]
async fn test_column_order_decides_where_values_land() {
    let registry = SchemaRegistry::from_json_str(
        r#"{
            "mappings": [{
                "file_type": "pair.asc",
                "table": "pairs",
                "fields": [
                    {"name": "first", "column_type": "text"},
                    {"name": "second", "column_type": "text"}
                ],
                "column_order": ["second", "first"]
            }]
        }"#,
    )
    .unwrap();

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "pair.asc", "left$right$\n");

    let storage = MemoryStorage::new();
    let result = FilePipeline::new(Arc::new(registry), Arc::new(storage.clone()), &config(10))
        .process(&path)
        .await;

    assert!(result.success, "{:?}", result.error);
    // The first field of the file goes to the first column of the order
    assert_eq!(
        storage.value("pairs", 0, "second"),
        Some(SqlValue::Text(Some("left".to_string())))
    );
    assert_eq!(
        storage.value("pairs", 0, "first"),
        Some(SqlValue::Text(Some("right".to_string())))
    );
}
