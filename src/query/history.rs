//! Audit log of executed statements.
//!
//! The [`QueryLog`] is a standard observer registered on every submitted
//! token. It records a whitespace-normalized copy of the statement together
//! with timing, row count and outcome, and mirrors each entry onto the
//! `tracing` output. Recording is fire-and-forget: a slow or full log never
//! blocks the scheduler.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::DeskError;
use crate::query::token::{QueryObserver, QueryToken};

/// Outcome recorded for a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Statement ran and returned a result set.
    Success,
    /// Statement ran and the database reported an error.
    Error,
    /// Statement never ran: the connection was busy.
    Rejected,
    /// Statement was cancelled while queued or running.
    Cancelled,
}

/// One audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct QueryLogEntry {
    /// Wall-clock time the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Name of the target connection.
    pub connection: String,
    /// Whitespace-normalized statement text.
    pub sql: String,
    /// Outcome of the statement.
    pub status: LogStatus,
    /// Result row count, present on success.
    pub row_count: Option<usize>,
    /// Execution time in milliseconds, present when the statement ran.
    pub duration_ms: Option<u64>,
    /// Error text, present on error.
    pub error: Option<String>,
}

impl QueryLogEntry {
    /// One-line rendering for status bars and headless output.
    pub fn display_line(&self) -> String {
        match self.status {
            LogStatus::Success => format!(
                "OK ({} rows, {} ms): {}",
                self.row_count.unwrap_or(0),
                self.duration_ms.unwrap_or(0),
                self.sql
            ),
            LogStatus::Error => format!(
                "ERROR ({} ms): {} -- {}",
                self.duration_ms.unwrap_or(0),
                self.sql,
                self.error.as_deref().unwrap_or("unknown error")
            ),
            LogStatus::Rejected => format!("BUSY: {}", self.sql),
            LogStatus::Cancelled => format!("CANCELLED: {}", self.sql),
        }
    }
}

/// In-memory audit log with bounded capacity (oldest entries evicted).
pub struct QueryLog {
    entries: Mutex<VecDeque<QueryLogEntry>>,
    capacity: usize,
    whitespace: Regex,
}

impl QueryLog {
    /// Creates a log retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            whitespace: Regex::new(r"\s+").expect("static regex"),
        }
    }

    /// Collapses internal whitespace runs so multi-line statements audit as
    /// one line.
    pub fn normalize(&self, sql: &str) -> String {
        self.whitespace.replace_all(sql.trim(), " ").into_owned()
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<QueryLogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Renders the log as pretty JSON (for headless output).
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.entries()).unwrap_or_else(|_| "[]".to_string())
    }

    fn record(&self, entry: QueryLogEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    fn entry_for(&self, token: &QueryToken, status: LogStatus) -> QueryLogEntry {
        QueryLogEntry {
            timestamp: Utc::now(),
            connection: token.connection().name().to_string(),
            sql: self.normalize(token.text()),
            status,
            row_count: token.row_count(),
            duration_ms: token.duration().map(|d| d.as_millis() as u64),
            error: token.error_message(),
        }
    }
}

impl QueryObserver for QueryLog {
    fn on_succeeded(&self, token: &QueryToken, row_count: usize, duration: Duration) {
        let entry = self.entry_for(token, LogStatus::Success);
        info!(
            connection = token.connection().name(),
            rows = row_count,
            elapsed_ms = duration.as_millis() as u64,
            "query succeeded: {}",
            entry.sql
        );
        self.record(entry);
    }

    fn on_failed(&self, token: &QueryToken, error: &DeskError) {
        let status = if error.is_cancellation() {
            LogStatus::Cancelled
        } else {
            LogStatus::Error
        };
        let entry = self.entry_for(token, status);

        if error.is_cancellation() {
            debug!(
                connection = token.connection().name(),
                "query cancelled: {}", entry.sql
            );
        } else {
            warn!(
                connection = token.connection().name(),
                "query failed: {} -- {}", entry.sql, error
            );
        }
        self.record(entry);
    }

    fn on_rejected(&self, token: &QueryToken) {
        // A cancelled-while-queued token and a busy rejection end in the same
        // state; the cancelled flag tells them apart for the audit trail.
        let status = if token.was_cancelled() {
            LogStatus::Cancelled
        } else {
            LogStatus::Rejected
        };
        let entry = self.entry_for(token, status);
        debug!(
            connection = token.connection().name(),
            "query not run ({:?}): {}", status, entry.sql
        );
        self.record(entry);
    }
}
