//! Configuration management
//!
//! Settings are read from the environment (after loading `.env`) and then
//! overridden by command-line arguments. Validation runs once everything is
//! merged.

use bigdecimal::{BigDecimal, Zero};
use meddra_common::env::{env_list, env_opt, env_or, env_required};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::normalizer::{NullMarkers, DEFAULT_NULL_MARKERS};
use crate::reader::resolve_encoding;
use crate::registry::validate_identifier;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default maximum database connections in the pool.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default schema holding the MedDRA tables.
pub const DEFAULT_DB_SCHEMA: &str = "meddra";

/// Default language tag.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Default number of rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// Default file encoding.
pub const DEFAULT_ENCODING: &str = "UTF-8";

/// Encodings tried, in order, when the configured one does not decode.
pub const DEFAULT_FALLBACK_ENCODINGS: [&str; 1] = ["windows-1252"];

/// Default field separator.
pub const DEFAULT_SEPARATOR: char = '$';

/// Default suffix of files picked up in directory mode.
pub const DEFAULT_FILE_SUFFIX: &str = ".asc";

/// Maximum length of a language tag (the column is varchar(8)).
const MAX_LANGUAGE_LEN: usize = 8;

/// Full loader configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub processing: ProcessingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub schema: String,
}

/// Processing configuration
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub version: BigDecimal,
    pub language: String,
    pub batch_size: usize,
    pub encoding: String,
    pub fallback_encodings: Vec<String>,
    pub separator: char,
    pub file_suffix: String,
    pub null_markers: Vec<String>,
    pub persist_timeout: Option<Duration>,
}

/// Values supplied on the command line; `None` keeps the configured value
#[derive(Debug, Clone, Default)]
pub struct ProcessingOverrides {
    pub version: Option<BigDecimal>,
    pub language: Option<String>,
    pub batch_size: Option<usize>,
    pub encoding: Option<String>,
    pub separator: Option<char>,
}

impl AppConfig {
    /// Load configuration from environment and defaults, apply overrides and validate
    pub fn load(overrides: ProcessingOverrides) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = AppConfig {
            database: DatabaseConfig::from_env()?,
            processing: ProcessingConfig::from_env()?.with_overrides(overrides),
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.processing.validate()
    }
}

impl DatabaseConfig {
    /// Environment variables:
    /// - `DATABASE_URL` (required)
    /// - `DB_MAX_CONNECTIONS`
    /// - `DB_CONNECT_TIMEOUT` (seconds)
    /// - `MEDDRA_DB_SCHEMA`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env_required("DATABASE_URL")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT", DEFAULT_DB_CONNECT_TIMEOUT_SECS)?,
            schema: env_or("MEDDRA_DB_SCHEMA", DEFAULT_DB_SCHEMA.to_string())?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(IngestError::Config("Database URL cannot be empty".to_string()));
        }

        if self.max_connections == 0 {
            return Err(IngestError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        validate_identifier(&self.schema)
            .map_err(|e| IngestError::Config(format!("Invalid database schema: {}", e)))
    }
}

impl ProcessingConfig {
    /// Load processing settings only, for runs that never touch the database
    pub fn load(overrides: ProcessingOverrides) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?.with_overrides(overrides);
        config.validate()?;

        Ok(config)
    }

    /// Environment variables, all optional:
    /// `MEDDRA_VERSION`, `MEDDRA_LANGUAGE`, `MEDDRA_BATCH_SIZE`,
    /// `MEDDRA_ENCODING`, `MEDDRA_FALLBACK_ENCODINGS` (comma separated),
    /// `MEDDRA_SEPARATOR`, `MEDDRA_FILE_SUFFIX`, `MEDDRA_NULL_MARKERS`
    /// (comma separated) and `MEDDRA_PERSIST_TIMEOUT` (seconds, 0 disables).
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let persist_timeout = env_opt::<u64>("MEDDRA_PERSIST_TIMEOUT")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            version: env_opt("MEDDRA_VERSION")?.unwrap_or(defaults.version),
            language: env_or("MEDDRA_LANGUAGE", defaults.language)?,
            batch_size: env_or("MEDDRA_BATCH_SIZE", defaults.batch_size)?,
            encoding: env_or("MEDDRA_ENCODING", defaults.encoding)?,
            fallback_encodings: env_list("MEDDRA_FALLBACK_ENCODINGS")?
                .unwrap_or(defaults.fallback_encodings),
            separator: env_or("MEDDRA_SEPARATOR", defaults.separator)?,
            file_suffix: env_or("MEDDRA_FILE_SUFFIX", defaults.file_suffix)?,
            null_markers: env_list("MEDDRA_NULL_MARKERS")?.unwrap_or(defaults.null_markers),
            persist_timeout,
        })
    }

    pub fn with_overrides(mut self, overrides: ProcessingOverrides) -> Self {
        if let Some(version) = overrides.version {
            self.version = version;
        }
        if let Some(language) = overrides.language {
            self.language = language;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(encoding) = overrides.encoding {
            self.encoding = encoding;
        }
        if let Some(separator) = overrides.separator {
            self.separator = separator;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::Config("batch_size must be positive".to_string()));
        }

        if self.version <= BigDecimal::zero() {
            return Err(IngestError::Config("version must be positive".to_string()));
        }

        let language_len = self.language.chars().count();
        if language_len == 0 || language_len > MAX_LANGUAGE_LEN {
            return Err(IngestError::Config(format!(
                "language must be 1 to {} characters, got '{}'",
                MAX_LANGUAGE_LEN, self.language
            )));
        }

        if matches!(self.separator, '\n' | '\r') {
            return Err(IngestError::Config(
                "separator cannot be a line break".to_string(),
            ));
        }

        if self.file_suffix.is_empty() {
            return Err(IngestError::Config("file suffix cannot be empty".to_string()));
        }

        for label in std::iter::once(&self.encoding).chain(&self.fallback_encodings) {
            resolve_encoding(label).map_err(IngestError::Config)?;
        }

        Ok(())
    }

    pub fn null_markers(&self) -> NullMarkers {
        NullMarkers::new(self.null_markers.iter().cloned())
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            // 28.0
            version: BigDecimal::new(280.into(), 1),
            language: DEFAULT_LANGUAGE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            encoding: DEFAULT_ENCODING.to_string(),
            fallback_encodings: DEFAULT_FALLBACK_ENCODINGS.iter().map(|s| s.to_string()).collect(),
            separator: DEFAULT_SEPARATOR,
            file_suffix: DEFAULT_FILE_SUFFIX.to_string(),
            null_markers: DEFAULT_NULL_MARKERS.iter().map(|s| s.to_string()).collect(),
            persist_timeout: None,
        }
    }
}
