//! MedDRA Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the MedDRA loader workspace.
//!
//! # Overview
//!
//! - **Logging**: tracing subscriber setup driven by `LOG_*` variables
//! - **Environment**: typed lookups of configuration variables
//! - **Formatting**: human-readable byte sizes and durations
//! - **Error Handling**: the common error type used by the helpers above
//!
//! # Example
//!
//! ```no_run
//! use meddra_common::env::env_or;
//! use meddra_common::format::format_bytes;
//!
//! fn batch_size() -> meddra_common::Result<usize> {
//!     env_or("MEDDRA_BATCH_SIZE", 5000)
//! }
//!
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! ```

pub mod env;
pub mod error;
pub mod format;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
