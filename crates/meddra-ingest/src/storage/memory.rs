//! In-memory backend
//!
//! Rows inserted through a unit of work are staged and only become visible
//! on commit. Used by tests and by dry runs, where [`MemoryStorage::discarding`]
//! validates every batch without keeping the rows.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{InsertRow, SqlValue, Storage, StorageError, UnitOfWork};
use crate::registry::SchemaMapping;

#[derive(Debug, Default)]
struct StoredTable {
    columns: Vec<String>,
    rows: Vec<InsertRow>,
    row_count: usize,
}

#[derive(Debug)]
struct MemoryState {
    tables: BTreeMap<String, StoredTable>,
    retain_rows: bool,
    available: bool,
    commits: usize,
    rollbacks: usize,
    open_scopes: usize,
    insert_calls: usize,
    fail_on_insert: Option<usize>,
    insert_delay: Option<Duration>,
    commit_delay: Option<Duration>,
}

/// Shared in-memory store; clones see the same tables
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                tables: BTreeMap::new(),
                retain_rows: true,
                available: true,
                commits: 0,
                rollbacks: 0,
                open_scopes: 0,
                insert_calls: 0,
                fail_on_insert: None,
                insert_delay: None,
                commit_delay: None,
            })),
        }
    }

    /// Store that counts committed rows but does not keep them
    pub fn discarding() -> Self {
        let storage = Self::new();
        storage.lock().retain_rows = false;
        storage
    }

    /// Fail the `call`-th `insert_many` (1-based, counted across all scopes)
    pub fn fail_on_insert(self, call: usize) -> Self {
        self.lock().fail_on_insert = Some(call);
        self
    }

    /// Delay every `insert_many` by `delay`
    pub fn with_insert_delay(self, delay: Duration) -> Self {
        self.lock().insert_delay = Some(delay);
        self
    }

    /// Delay the acknowledgement of every commit by `delay`; rows are
    /// visible before the delay starts
    pub fn with_commit_delay(self, delay: Duration) -> Self {
        self.lock().commit_delay = Some(delay);
        self
    }

    /// Toggle reachability as seen by `test_connection` and `begin_scope`
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Committed rows in `table`
    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.row_count)
    }

    /// Committed rows across all tables
    pub fn total_rows(&self) -> usize {
        self.lock().tables.values().map(|t| t.row_count).sum()
    }

    /// Committed rows of `table`, in insertion order
    pub fn rows(&self, table: &str) -> Vec<InsertRow> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Value of `column` in the `row`-th committed row of `table`
    pub fn value(&self, table: &str, row: usize, column: &str) -> Option<SqlValue> {
        let state = self.lock();
        let stored = state.tables.get(table)?;
        let index = stored.columns.iter().position(|c| c == column)?;
        stored.rows.get(row)?.values.get(index).cloned()
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    /// Units of work begun but neither committed nor rolled back
    pub fn open_scopes(&self) -> usize {
        self.lock().open_scopes
    }

    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin_scope(&self) -> Result<Box<dyn UnitOfWork>, StorageError> {
        let mut state = self.lock();
        if !state.available {
            return Err(StorageError::Unavailable("in-memory store is offline".to_string()));
        }
        state.open_scopes += 1;

        Ok(Box::new(MemoryUnitOfWork {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            open: true,
        }))
    }

    async fn test_connection(&self) -> bool {
        self.lock().available
    }
}

struct StagedInsert {
    table: String,
    columns: Vec<String>,
    rows: Vec<InsertRow>,
}

/// Staged writes against a [`MemoryStorage`]
pub struct MemoryUnitOfWork {
    state: Arc<Mutex<MemoryState>>,
    staged: Vec<StagedInsert>,
    open: bool,
}

impl MemoryUnitOfWork {
    fn close(&mut self, commit: bool) -> Result<(), StorageError> {
        if !self.open {
            return Err(StorageError::ScopeClosed);
        }
        self.open = false;

        let staged = std::mem::take(&mut self.staged);
        let mut state = lock_state(&self.state);
        state.open_scopes = state.open_scopes.saturating_sub(1);

        if !commit {
            state.rollbacks += 1;
            return Ok(());
        }

        let retain = state.retain_rows;
        for insert in staged {
            let table = state.tables.entry(insert.table).or_default();
            if table.columns.is_empty() {
                table.columns = insert.columns;
            }
            table.row_count += insert.rows.len();
            if retain {
                table.rows.extend(insert.rows);
            }
        }
        state.commits += 1;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn insert_many(
        &mut self,
        mapping: &SchemaMapping,
        rows: &[InsertRow],
    ) -> Result<u64, StorageError> {
        if !self.open {
            return Err(StorageError::ScopeClosed);
        }

        let delay = {
            let mut state = lock_state(&self.state);
            state.insert_calls += 1;
            if state.fail_on_insert == Some(state.insert_calls) {
                return Err(StorageError::Unavailable(format!(
                    "injected failure on insert {}",
                    state.insert_calls
                )));
            }
            state.insert_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.staged.push(StagedInsert {
            table: mapping.table().to_string(),
            columns: mapping.column_order().to_vec(),
            rows: rows.to_vec(),
        });
        Ok(rows.len() as u64)
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.close(true)?;

        let delay = lock_state(&self.state).commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.close(false)
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if self.open {
            let _ = self.close(false);
        }
    }
}
