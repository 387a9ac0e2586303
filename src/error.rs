//! Error types for Querydesk.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for Querydesk operations.
///
/// A busy connection is deliberately not represented here: a token that finds
/// its target occupied ends up in the `Rejected` state, which is an outcome,
/// not a failure.
#[derive(Error, Debug)]
pub enum DeskError {
    /// Invalid input rejected before admission (empty statement, bad cursor).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database connection errors (host unreachable, auth failed, closed handle).
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors reported by the database client.
    #[error("Query error: {0}")]
    Query(String),

    /// Begin/commit/rollback attempted in an invalid transaction state.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A statement was cancelled while queued or running.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration errors (invalid config file, missing required fields).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, bugs).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeskError {
    /// Creates a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a transaction-state error with the given message.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Creates a cancellation error with the given message.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation Error",
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Transaction(_) => "Transaction Error",
            Self::Cancelled(_) => "Cancelled",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns true for cancellations, which are terminal but not alarming.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Result type alias using DeskError.
pub type Result<T> = std::result::Result<T, DeskError>;
