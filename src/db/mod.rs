//! Database abstraction layer for Querydesk.
//!
//! Provides a trait-based interface for database clients, allowing different
//! backends to be used interchangeably. The execution core only ever talks to
//! `dyn DatabaseClient`; it never issues protocol-level calls itself.

mod mock;
mod postgres;
mod types;

pub use mock::{FailingDatabaseClient, HeldDatabaseClient, MockDatabaseClient};
pub use postgres::PostgresClient;
pub use types::{ColumnInfo, QueryResult, Row, Value};

use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    /// In-memory mock backend, used by tests and `--mock-db`.
    Mock,
}

impl DatabaseBackend {
    /// Returns the backend as a string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mock => "mock",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    /// Returns the default port for this backend.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mock => 0,
        }
    }

    /// Returns the URL scheme for this backend.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mock => "mock",
        }
    }
}

/// Creates a database client for the given backend and configuration.
///
/// This is the central factory function for database clients.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn DatabaseClient>> {
    match config.backend {
        DatabaseBackend::Postgres => {
            let client = PostgresClient::connect(config).await?;
            Ok(Box::new(client))
        }
        DatabaseBackend::Mock => Ok(Box::new(MockDatabaseClient::new())),
    }
}

/// Trait defining the interface for database clients.
///
/// One client represents one live database session. Statement execution is
/// synchronous from the caller's point of view; the scheduler is responsible
/// for keeping it off the interface thread and for never running two
/// statements on the same client concurrently.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Executes a SQL statement and returns the results.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Starts an explicit transaction on this session.
    async fn begin_transaction(&self) -> Result<()>;

    /// Commits the current transaction.
    async fn commit(&self) -> Result<()>;

    /// Rolls back the current transaction.
    async fn rollback(&self) -> Result<()>;

    /// Whether this backend supports explicit transactions.
    fn supports_transactions(&self) -> bool {
        true
    }

    /// Whether the session is still usable.
    fn is_open(&self) -> bool;

    /// Closes the database session.
    async fn close(&self) -> Result<()>;
}
