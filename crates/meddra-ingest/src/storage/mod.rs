//! Storage backends
//!
//! The pipeline only sees two traits: [`Storage`] opens a [`UnitOfWork`],
//! and a unit of work inserts rows until it is committed or rolled back.
//! A unit of work that is dropped while still open is rolled back.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::normalizer::NormalizedRecord;
use crate::registry::{ColumnDef, ColumnType, SchemaMapping};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid value in row {row}, column '{column}': {reason}")]
    InvalidValue {
        row: usize,
        column: String,
        reason: String,
    },

    #[error("Batch write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unit of work is already committed or rolled back")]
    ScopeClosed,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A typed column value; `None` is SQL NULL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Integer(Option<i32>),
    BigInt(Option<i64>),
    Numeric(Option<BigDecimal>),
    Text(Option<String>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Integer(v) => v.is_none(),
            SqlValue::BigInt(v) => v.is_none(),
            SqlValue::Numeric(v) => v.is_none(),
            SqlValue::Text(v) => v.is_none(),
        }
    }
}

/// One row as written: source values in file order plus the reserved
/// ingestion columns
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRow {
    pub values: Vec<SqlValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub language: String,
    pub version: BigDecimal,
}

/// A scoped transactional write
#[async_trait]
pub trait UnitOfWork: Send {
    /// Insert rows into the mapping's table; returns the number of rows written
    async fn insert_many(
        &mut self,
        mapping: &SchemaMapping,
        rows: &[InsertRow],
    ) -> Result<u64, StorageError>;

    async fn commit(&mut self) -> Result<(), StorageError>;

    async fn rollback(&mut self) -> Result<(), StorageError>;
}

/// A storage backend
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin_scope(&self) -> Result<Box<dyn UnitOfWork>, StorageError>;

    /// Cheap round trip to check the backend is reachable
    async fn test_connection(&self) -> bool;
}

/// Coerce normalized records into typed rows for `mapping`
///
/// `row` in the returned error is 1-based within the batch.
pub fn build_rows(
    mapping: &SchemaMapping,
    records: &[NormalizedRecord],
) -> Result<Vec<InsertRow>, StorageError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let values = mapping
                .columns()
                .enumerate()
                .map(|(position, column)| {
                    let raw = record.fields.get(position).and_then(|f| f.as_deref());
                    coerce(column, raw).map_err(|reason| StorageError::InvalidValue {
                        row: index + 1,
                        column: column.name.clone(),
                        reason,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(InsertRow {
                values,
                created_at: record.created_at,
                updated_at: record.updated_at,
                language: record.language.clone(),
                version: record.version.clone(),
            })
        })
        .collect()
}

fn coerce(column: &ColumnDef, raw: Option<&str>) -> Result<SqlValue, String> {
    let Some(raw) = raw else {
        if !column.nullable {
            return Err("null value in non-nullable column".to_string());
        }
        return Ok(match column.column_type {
            ColumnType::Integer => SqlValue::Integer(None),
            ColumnType::BigInt => SqlValue::BigInt(None),
            ColumnType::Numeric => SqlValue::Numeric(None),
            ColumnType::Varchar(_) | ColumnType::Text => SqlValue::Text(None),
        });
    };

    match column.column_type {
        ColumnType::Integer => raw
            .trim()
            .parse::<i32>()
            .map(|v| SqlValue::Integer(Some(v)))
            .map_err(|e| format!("'{}' is not a valid integer: {}", raw, e)),
        ColumnType::BigInt => raw
            .trim()
            .parse::<i64>()
            .map(|v| SqlValue::BigInt(Some(v)))
            .map_err(|e| format!("'{}' is not a valid bigint: {}", raw, e)),
        ColumnType::Numeric => BigDecimal::from_str(raw.trim())
            .map(|v| SqlValue::Numeric(Some(v)))
            .map_err(|e| format!("'{}' is not a valid numeric: {}", raw, e)),
        ColumnType::Varchar(max) => {
            let len = raw.chars().count();
            if len > max as usize {
                Err(format!("value of {} characters exceeds varchar({})", len, max))
            } else {
                Ok(SqlValue::Text(Some(raw.to_string())))
            }
        },
        ColumnType::Text => Ok(SqlValue::Text(Some(raw.to_string()))),
    }
}
