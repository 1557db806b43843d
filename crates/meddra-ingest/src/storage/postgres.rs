//! PostgreSQL backend
//!
//! One transaction per unit of work. Rows are written with multi-row
//! `INSERT ... VALUES` statements, chunked so a statement never exceeds the
//! protocol's bind parameter limit.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use std::time::Duration;
use tracing::{debug, warn};

use super::{InsertRow, SqlValue, Storage, StorageError, UnitOfWork};
use crate::config::DatabaseConfig;
use crate::registry::SchemaMapping;

/// Maximum bind parameters in one PostgreSQL statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Columns appended to every insert after the source columns
const METADATA_COLUMNS: [&str; 4] = ["created_at", "updated_at", "language", "version"];

/// PostgreSQL storage backed by a connection pool
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
    schema: String,
}

impl PgStorage {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// Build a lazily connecting pool from configuration
    ///
    /// No connection is opened until the first query, so an unreachable
    /// server surfaces through [`Storage::test_connection`].
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy(&config.url)?;

        debug!(
            max_connections = config.max_connections,
            schema = %config.schema,
            "Database connection pool configured"
        );

        Ok(Self::new(pool, config.schema.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Close the pool, waiting for checked-out connections to be returned
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Database connection pool closed");
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin_scope(&self) -> Result<Box<dyn UnitOfWork>, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork {
            tx: Some(tx),
            schema: self.schema.clone(),
        }))
    }

    async fn test_connection(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Database connection test failed");
                false
            },
        }
    }
}

/// A single PostgreSQL transaction
///
/// Dropping an open unit of work rolls the transaction back.
pub struct PgUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
    schema: String,
}

impl PgUnitOfWork {
    fn insert_prefix(&self, mapping: &SchemaMapping) -> String {
        let mut columns: Vec<String> =
            mapping.column_order().iter().map(|c| quote_ident(c)).collect();
        columns.extend(METADATA_COLUMNS.iter().map(|c| quote_ident(c)));

        format!(
            "INSERT INTO {}.{} ({}) ",
            quote_ident(&self.schema),
            quote_ident(mapping.table()),
            columns.join(", ")
        )
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn insert_many(
        &mut self,
        mapping: &SchemaMapping,
        rows: &[InsertRow],
    ) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let prefix = self.insert_prefix(mapping);
        let chunk_size = rows_per_statement(mapping.column_count());
        let tx = self.tx.as_mut().ok_or(StorageError::ScopeClosed)?;

        let mut written = 0;
        for chunk in rows.chunks(chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);

            query_builder.push_values(chunk, |mut b, row| {
                for value in &row.values {
                    match value {
                        SqlValue::Integer(v) => {
                            b.push_bind(*v);
                        },
                        SqlValue::BigInt(v) => {
                            b.push_bind(*v);
                        },
                        SqlValue::Numeric(v) => {
                            b.push_bind(v.clone());
                        },
                        SqlValue::Text(v) => {
                            b.push_bind(v.clone());
                        },
                    }
                }
                b.push_bind(row.created_at)
                    .push_bind(row.updated_at)
                    .push_bind(row.language.clone())
                    .push_bind(row.version.clone());
            });

            let result = query_builder.build().execute(&mut **tx).await?;
            written += result.rows_affected();
        }

        debug!(table = mapping.table(), rows = written, "Inserted rows");
        Ok(written)
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        let tx = self.tx.take().ok_or(StorageError::ScopeClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        let tx = self.tx.take().ok_or(StorageError::ScopeClosed)?;
        tx.rollback().await?;
        Ok(())
    }
}

/// Rows per INSERT statement for a table with `source_columns` source columns
fn rows_per_statement(source_columns: usize) -> usize {
    let binds_per_row = source_columns + METADATA_COLUMNS.len();
    (MAX_BIND_PARAMS / binds_per_row).max(1)
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
