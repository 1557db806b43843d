//! MedDRA Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streaming loader for MedDRA ASCII distribution files (`*.asc`).
//!
//! Each file is read in fixed-size batches, cleaned of null markers, stamped
//! with language, version and load timestamps, and written to its table in
//! one transaction per batch.
//!
//! # Components
//!
//! - **registry**: file type to table mappings (13 built in, or JSON)
//! - **reader**: `$`-separated chunked reader with encoding fallback
//! - **normalizer**: null cleansing and metadata enrichment
//! - **persister**: typed rows, one atomic scope per batch
//! - **pipeline** / **directory**: one file, or every file in a directory
//! - **runner**: connection check, run modes and dry runs
//!
//! # Example
//!
//! ```no_run
//! use meddra_ingest::config::ProcessingConfig;
//! use meddra_ingest::registry::SchemaRegistry;
//! use meddra_ingest::runner::{RunTarget, Runner};
//! use meddra_ingest::storage::MemoryStorage;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = Runner::new(
//!         Arc::new(MemoryStorage::new()),
//!         Arc::new(SchemaRegistry::meddra()?),
//!         &ProcessingConfig::default(),
//!     );
//!     let report = runner.run(&RunTarget::Directory("./MedAscii".into())).await?;
//!     println!("{} records", report.total_records());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod files;
pub mod normalizer;
pub mod persister;
pub mod pipeline;
pub mod progress;
pub mod reader;
pub mod registry;
pub mod runner;
pub mod storage;

pub use error::{IngestError, Result};
pub use pipeline::{FilePipeline, FileResult};
pub use registry::SchemaRegistry;
pub use runner::{RunReport, RunTarget, Runner};
