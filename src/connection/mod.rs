//! Connection management for Querydesk.
//!
//! A [`Connection`] is one live database session shared by every tab that
//! selected it; the [`registry::ConnectionRegistry`] owns their lifecycle.

pub mod registry;

pub use registry::ConnectionRegistry;

use std::sync::{Arc, Mutex};

use crate::db::DatabaseClient;
use crate::error::{DeskError, Result};

/// Explicit transaction state of a connection.
///
/// At most one explicit transaction may be active per connection; everything
/// else (savepoints, nesting) is the database's business, not ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No explicit transaction open.
    #[default]
    None,
    /// An explicit transaction is open on this session.
    Active,
}

/// A live, named database session.
///
/// The execution core never opens or destroys these; it reads their state and
/// drives begin/commit/rollback through them. Statements are only ever
/// submitted through the scheduler, which serializes them per connection.
pub struct Connection {
    name: String,
    client: Box<dyn DatabaseClient>,
    tx: Mutex<TransactionState>,
}

impl Connection {
    /// Wraps a database client as a named connection.
    pub fn new(name: impl Into<String>, client: Box<dyn DatabaseClient>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            client,
            tx: Mutex::new(TransactionState::None),
        })
    }

    /// The unique connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying database client.
    pub fn client(&self) -> &dyn DatabaseClient {
        self.client.as_ref()
    }

    /// Whether the underlying session is still usable.
    pub fn is_open(&self) -> bool {
        self.client.is_open()
    }

    /// Whether the backend supports explicit transactions.
    pub fn supports_transactions(&self) -> bool {
        self.client.supports_transactions()
    }

    /// Whether an explicit transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        *self.tx.lock().unwrap() == TransactionState::Active
    }

    /// Starts an explicit transaction.
    ///
    /// Fails with a transaction error when one is already active or the
    /// backend lacks support. The Active slot is claimed before the client
    /// call and released again if that call fails, so two tabs racing on the
    /// same connection cannot both open a transaction.
    pub async fn begin_transaction(&self) -> Result<()> {
        if !self.supports_transactions() {
            return Err(DeskError::transaction(format!(
                "connection '{}' does not support transactions",
                self.name
            )));
        }

        {
            let mut tx = self.tx.lock().unwrap();
            if *tx == TransactionState::Active {
                return Err(DeskError::transaction(format!(
                    "connection '{}' already has an active transaction",
                    self.name
                )));
            }
            *tx = TransactionState::Active;
        }

        match self.client.begin_transaction().await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.tx.lock().unwrap() = TransactionState::None;
                Err(e)
            }
        }
    }

    /// Commits the active transaction.
    pub async fn commit(&self) -> Result<()> {
        self.end_transaction(true).await
    }

    /// Rolls back the active transaction.
    pub async fn rollback(&self) -> Result<()> {
        self.end_transaction(false).await
    }

    async fn end_transaction(&self, commit: bool) -> Result<()> {
        if !self.in_transaction() {
            return Err(DeskError::transaction(format!(
                "connection '{}' has no active transaction",
                self.name
            )));
        }

        let result = if commit {
            self.client.commit().await
        } else {
            self.client.rollback().await
        };

        if result.is_ok() {
            *self.tx.lock().unwrap() = TransactionState::None;
        }
        result
    }

    /// Closes the underlying session.
    pub async fn close(&self) -> Result<()> {
        *self.tx.lock().unwrap() = TransactionState::None;
        self.client.close().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
