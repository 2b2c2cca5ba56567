//! In-memory hosted database for testing

use async_trait::async_trait;
use serde_json::Value;
use spadesk_util::{AppError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::{Query, RemoteDatabase, Row};

/// Mock hosted database for unit/integration testing
#[derive(Default)]
pub struct MockDatabase {
    tables: Mutex<HashMap<String, Vec<Row>>>,

    /// Every call fails with a network error
    offline: AtomicBool,

    /// Writes fail with a non-retryable validation error
    reject_writes: AtomicBool,

    /// Inserts of an existing id fail like a unique key violation instead
    /// of merging
    strict_inserts: AtomicBool,

    selects: AtomicUsize,
    writes: AtomicUsize,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, Vec<Row>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the contents of a table
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables().insert(table.to_string(), rows);
    }

    /// Current contents of a table
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables().get(table).cloned().unwrap_or_default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn set_strict_inserts(&self, strict: bool) {
        self.strict_inserts.store(strict, Ordering::SeqCst);
    }

    pub fn select_calls(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(AppError::network("mock database offline"))
        } else {
            Ok(())
        }
    }

    fn check_write(&self) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(AppError::validation("mock database rejected write"));
        }
        Ok(())
    }
}

fn row_id(row: &Row) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl RemoteDatabase for MockDatabase {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(query.apply(self.rows(table)))
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<Row> {
        self.check_write()?;
        let id = row_id(row).ok_or_else(|| AppError::validation("row has no id"))?;

        let mut tables = self.tables();
        let rows = tables.entry(table.to_string()).or_default();
        let exists = rows.iter().any(|r| row_id(r).as_deref() == Some(id.as_str()));
        if exists && self.strict_inserts.load(Ordering::SeqCst) {
            return Err(
                AppError::database(format!("HTTP 409: duplicate key {} in {}", id, table))
                    .not_retryable(),
            );
        }
        rows.retain(|r| row_id(r).as_deref() != Some(id.as_str()));
        rows.push(row.clone());
        Ok(row.clone())
    }

    async fn update(&self, table: &str, id: &str, patch: &Row) -> Result<Row> {
        self.check_write()?;

        let mut tables = self.tables();
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| row_id(r).as_deref() == Some(id)))
            .ok_or_else(|| {
                AppError::database(format!("{} row {} not found", table, id)).not_retryable()
            })?;

        if let (Value::Object(target), Value::Object(changes)) = (&mut *row, patch) {
            for (key, value) in changes {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.check_write()?;
        if let Some(rows) = self.tables().get_mut(table) {
            rows.retain(|r| row_id(r).as_deref() != Some(id));
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
