//! Mock database clients for testing.
//!
//! Provides in-memory client implementations for headless testing: a plain
//! mock, a client that always fails, and a client whose executions block
//! until released, used to test scheduling without timing races.

use super::{ColumnInfo, DatabaseClient, QueryResult, Value};
use crate::error::{DeskError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A mock database client that returns predefined results.
///
/// Cloning yields a handle onto the same session state, so tests can keep a
/// handle after boxing the client into a connection.
#[derive(Clone)]
pub struct MockDatabaseClient {
    inner: Arc<MockState>,
}

struct MockState {
    open: AtomicBool,
    transactional: bool,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    in_tx: AtomicBool,
}

impl MockDatabaseClient {
    /// Creates a new mock database client.
    pub fn new() -> Self {
        Self::with_transactions(true)
    }

    /// Creates a mock client that reports no transaction support.
    pub fn without_transactions() -> Self {
        Self::with_transactions(false)
    }

    fn with_transactions(transactional: bool) -> Self {
        Self {
            inner: Arc::new(MockState {
                open: AtomicBool::new(true),
                transactional,
                begins: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
                in_tx: AtomicBool::new(false),
            }),
        }
    }

    /// Number of transactions started on this session.
    pub fn begin_count(&self) -> usize {
        self.inner.begins.load(Ordering::SeqCst)
    }

    /// Number of commits issued on this session.
    pub fn commit_count(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// Number of rollbacks issued on this session.
    pub fn rollback_count(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }
}

impl Default for MockDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        if !self.is_open() {
            return Err(DeskError::connection("session is closed"));
        }

        let sql_upper = sql.to_uppercase();

        if sql_upper.trim_start().starts_with("SELECT") {
            let columns = vec![ColumnInfo::new("result", "text")];
            let rows = vec![vec![Value::String(format!("Mock result for: {}", sql))]];

            Ok(QueryResult {
                columns,
                rows,
                execution_time: Duration::from_millis(1),
                row_count: 1,
                total_rows: Some(1),
                was_truncated: false,
            })
        } else {
            // Non-SELECT statements produce an empty result set.
            Ok(QueryResult {
                columns: vec![],
                rows: vec![],
                execution_time: Duration::from_millis(1),
                row_count: 0,
                total_rows: Some(0),
                was_truncated: false,
            })
        }
    }

    async fn begin_transaction(&self) -> Result<()> {
        if !self.inner.transactional {
            return Err(DeskError::transaction(
                "backend does not support transactions",
            ));
        }
        self.inner.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.in_tx.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.in_tx.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.in_tx.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        self.inner.transactional
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.inner.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A database client whose executions always fail.
#[derive(Clone)]
pub struct FailingDatabaseClient {
    message: String,
}

impl FailingDatabaseClient {
    /// Creates a failing client with a default error message.
    pub fn new() -> Self {
        Self::with_message("simulated database failure")
    }

    /// Creates a failing client with the given error message.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for FailingDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for FailingDatabaseClient {
    async fn execute_query(&self, _sql: &str) -> Result<QueryResult> {
        Err(DeskError::query(self.message.clone()))
    }

    async fn begin_transaction(&self) -> Result<()> {
        Err(DeskError::transaction(self.message.clone()))
    }

    async fn commit(&self) -> Result<()> {
        Err(DeskError::transaction(self.message.clone()))
    }

    async fn rollback(&self) -> Result<()> {
        Err(DeskError::transaction(self.message.clone()))
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A database client whose executions block until explicitly released.
///
/// Scheduling tests use this to pin a connection in the Running state
/// deterministically: submit a statement, observe queue behavior, then call
/// [`HeldDatabaseClient::release`] to let the execution finish.
#[derive(Clone)]
pub struct HeldDatabaseClient {
    inner: Arc<HeldState>,
}

struct HeldState {
    gate: Semaphore,
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
}

impl HeldDatabaseClient {
    /// Creates a held client with no releases pending.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HeldState {
                gate: Semaphore::new(0),
                started: Mutex::new(Vec::new()),
                finished: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Allows one blocked (or future) execution to complete.
    pub fn release(&self) {
        self.inner.gate.add_permits(1);
    }

    /// Statements that have entered execution, in order.
    pub fn started(&self) -> Vec<String> {
        self.inner.started.lock().unwrap().clone()
    }

    /// Statements that have completed, in order.
    pub fn finished(&self) -> Vec<String> {
        self.inner.finished.lock().unwrap().clone()
    }
}

impl Default for HeldDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseClient for HeldDatabaseClient {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        self.inner.started.lock().unwrap().push(sql.to_string());

        let permit = self
            .inner
            .gate
            .acquire()
            .await
            .map_err(|_| DeskError::connection("session is closed"))?;
        permit.forget();

        self.inner.finished.lock().unwrap().push(sql.to_string());

        let columns = vec![ColumnInfo::new("result", "text")];
        let rows = vec![vec![Value::String(sql.to_string())]];
        Ok(QueryResult::with_data(columns, rows))
    }

    async fn begin_transaction(&self) -> Result<()> {
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        self.inner.gate.close();
        Ok(())
    }
}
