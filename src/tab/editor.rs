//! The query editor tab controller.
//!
//! Owns one text buffer, one chosen connection, and the tokens it has
//! submitted. Scheduler notifications arrive through a [`TabEvent`] channel:
//! the observer side is called synchronously from worker tasks and forwards
//! into the channel; the interface side drains it and updates status and
//! results. Rendering is someone else's job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::db::QueryResult;
use crate::error::{DeskError, Result};
use crate::query::scheduler::QueryScheduler;
use crate::query::token::{QueryObserver, QueryToken, TokenId};
use crate::tab::{Action, Tab};

/// Lifecycle notification forwarded to the tab's interface side.
#[derive(Debug, Clone)]
pub enum TabEvent {
    /// Execution is about to begin.
    Started(TokenId),
    /// Token left the queue and began running.
    Accepted(TokenId),
    /// Token finished with a result set.
    Succeeded {
        id: TokenId,
        row_count: usize,
        duration: Duration,
    },
    /// Token finished with an error.
    Failed { id: TokenId, error: String },
    /// Token never ran (busy target, or cancelled while queued).
    Rejected { id: TokenId, cancelled: bool },
}

impl TabEvent {
    fn token_id(&self) -> TokenId {
        match self {
            Self::Started(id) | Self::Accepted(id) => *id,
            Self::Succeeded { id, .. } | Self::Failed { id, .. } | Self::Rejected { id, .. } => *id,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Rejected { .. }
        )
    }
}

/// Observer half of the tab: forwards notifications into the event channel.
///
/// The channel is unbounded so the send never blocks a worker; order is
/// preserved per token because notifications are synchronous.
struct TabNotifier {
    tx: mpsc::UnboundedSender<TabEvent>,
}

impl QueryObserver for TabNotifier {
    fn on_started(&self, token: &QueryToken) {
        let _ = self.tx.send(TabEvent::Started(token.id()));
    }

    fn on_accepted(&self, token: &QueryToken) {
        let _ = self.tx.send(TabEvent::Accepted(token.id()));
    }

    fn on_succeeded(&self, token: &QueryToken, row_count: usize, duration: Duration) {
        let _ = self.tx.send(TabEvent::Succeeded {
            id: token.id(),
            row_count,
            duration,
        });
    }

    fn on_failed(&self, token: &QueryToken, error: &DeskError) {
        let _ = self.tx.send(TabEvent::Failed {
            id: token.id(),
            error: error.to_string(),
        });
    }

    fn on_rejected(&self, token: &QueryToken) {
        let _ = self.tx.send(TabEvent::Rejected {
            id: token.id(),
            cancelled: token.was_cancelled(),
        });
    }
}

/// Per-tab editor controller.
pub struct QueryEditorTab {
    buffer: String,
    cursor: usize,
    selection: Option<(usize, usize)>,
    connection: Arc<Connection>,
    scheduler: Arc<QueryScheduler>,
    file_path: Option<PathBuf>,
    modified: bool,
    tokens: Vec<Arc<QueryToken>>,
    status: String,
    last_result: Option<Arc<QueryResult>>,
    notifier: Arc<TabNotifier>,
    events: mpsc::UnboundedReceiver<TabEvent>,
}

impl QueryEditorTab {
    /// Creates an empty tab bound to a connection.
    pub fn new(connection: Arc<Connection>, scheduler: Arc<QueryScheduler>) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        Self {
            buffer: String::new(),
            cursor: 0,
            selection: None,
            connection,
            scheduler,
            file_path: None,
            modified: false,
            tokens: Vec::new(),
            status: String::new(),
            last_result: None,
            notifier: Arc::new(TabNotifier { tx }),
            events,
        }
    }

    /// The bound connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Rebinds the tab to another connection.
    ///
    /// Refused while the current connection holds an open transaction, so a
    /// tab cannot walk away from work it would otherwise commit or roll
    /// back elsewhere.
    pub fn set_connection(&mut self, connection: Arc<Connection>) -> Result<()> {
        if self.connection.in_transaction() {
            return Err(DeskError::transaction(format!(
                "connection '{}' has an open transaction; commit or roll back first",
                self.connection.name()
            )));
        }
        self.connection = connection;
        Ok(())
    }

    /// The buffer text.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Replaces the buffer text and marks the tab modified.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.buffer = text.into();
        self.cursor = self.cursor.min(self.buffer.len());
        self.selection = None;
        self.modified = true;
    }

    /// Moves the cursor (byte offset, clamped to the buffer).
    pub fn set_cursor(&mut self, offset: usize) {
        self.cursor = offset.min(self.buffer.len());
    }

    /// Selects a byte range of the buffer.
    pub fn select(&mut self, start: usize, end: usize) {
        let start = start.min(self.buffer.len());
        let end = end.min(self.buffer.len());
        self.selection = (start < end).then_some((start, end));
    }

    /// Clears the selection.
    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Current status line.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Result handle of the most recent successful statement.
    pub fn last_result(&self) -> Option<&Arc<QueryResult>> {
        self.last_result.as_ref()
    }

    /// Tokens submitted by this tab, oldest first.
    pub fn tokens(&self) -> &[Arc<QueryToken>] {
        &self.tokens
    }

    /// The statement that would run right now.
    ///
    /// The selection wins if present; otherwise the `;`-delimited statement
    /// surrounding the cursor; a buffer without top-level semicolons runs
    /// whole.
    pub fn statement_at_cursor(&self) -> String {
        if let Some((start, end)) = self.selection {
            return self.buffer[start..end].to_string();
        }

        let separators = top_level_semicolons(&self.buffer);
        if separators.is_empty() {
            return self.buffer.clone();
        }

        let start = separators
            .iter()
            .rev()
            .find(|&&pos| pos < self.cursor)
            .map(|&pos| pos + 1)
            .unwrap_or(0);
        let end = separators
            .iter()
            .find(|&&pos| pos >= self.cursor)
            .copied()
            .unwrap_or(self.buffer.len());

        self.buffer[start..end].trim().to_string()
    }

    /// Submits the statement at the cursor.
    ///
    /// `enqueue` lets the statement wait in line when the connection is busy
    /// instead of being rejected. Fails when the connection is closed or the
    /// statement is empty; everything after admission arrives as events.
    pub fn run(&mut self, enqueue: bool) -> Result<Arc<QueryToken>> {
        if !self.connection.is_open() {
            return Err(DeskError::connection(format!(
                "connection '{}' is not open",
                self.connection.name()
            )));
        }

        let statement = self.statement_at_cursor();
        let observer: Arc<dyn QueryObserver> = self.notifier.clone();
        let token = self
            .scheduler
            .submit(&statement, Arc::clone(&self.connection), enqueue, observer)?;

        self.tokens.push(Arc::clone(&token));
        Ok(token)
    }

    /// Cancels every token this tab still has in flight.
    pub fn cancel_pending(&self) {
        for token in &self.tokens {
            if !token.is_terminal() {
                token.cancel();
            }
        }
    }

    /// Drains queued events without blocking and applies them to tab state.
    /// Returns the number of events applied.
    pub fn process_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Waits until the given token's terminal event has been applied.
    ///
    /// Used by the headless runner; interactive front-ends poll
    /// [`Self::process_events`] from their event loop instead.
    pub async fn wait_for(&mut self, id: TokenId) {
        // The terminal event may already be queued behind others.
        loop {
            match self.events.recv().await {
                Some(event) => {
                    let done = event.token_id() == id && event.is_terminal();
                    self.apply(event);
                    if done {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    fn apply(&mut self, event: TabEvent) {
        match event {
            TabEvent::Started(_) => {}
            TabEvent::Accepted(_) => {
                self.status = "Running...".to_string();
            }
            TabEvent::Succeeded {
                id,
                row_count,
                duration,
            } => {
                self.status = format!(
                    "Query finished: {} rows in {} ms",
                    row_count,
                    duration.as_millis()
                );
                self.last_result = self
                    .tokens
                    .iter()
                    .find(|t| t.id() == id)
                    .and_then(|t| t.result());
            }
            TabEvent::Failed { error, .. } => {
                self.status = format!("Query failed: {error}");
            }
            TabEvent::Rejected { cancelled, .. } => {
                self.status = if cancelled {
                    "Query cancelled".to_string()
                } else {
                    format!("Connection '{}' is busy", self.connection.name())
                };
            }
        }
    }

    /// Starts an explicit transaction on the bound connection.
    pub async fn begin_transaction(&mut self) -> Result<()> {
        self.connection.begin_transaction().await?;
        self.status = format!("Transaction started on '{}'", self.connection.name());
        Ok(())
    }

    /// Commits the active transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.connection.commit().await?;
        self.status = "Transaction committed".to_string();
        Ok(())
    }

    /// Rolls back the active transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.connection.rollback().await?;
        self.status = "Transaction rolled back".to_string();
        Ok(())
    }

    /// Loads a file into the buffer.
    pub fn open_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeskError::validation(format!("Unable to open {}: {e}", path.display())))?;
        self.buffer = content;
        self.cursor = 0;
        self.selection = None;
        self.file_path = Some(path.to_path_buf());
        self.modified = false;
        Ok(())
    }

    /// Saves the buffer to its attached file.
    pub fn save(&mut self) -> Result<()> {
        let path = self
            .file_path
            .clone()
            .ok_or_else(|| DeskError::validation("no file attached to this tab"))?;
        self.save_as(&path)
    }

    /// Saves the buffer to a specific file and attaches it.
    pub fn save_as(&mut self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.buffer)
            .map_err(|e| DeskError::validation(format!("Unable to save {}: {e}", path.display())))?;
        self.file_path = Some(path.to_path_buf());
        self.modified = false;
        Ok(())
    }

    /// The attached file, if any.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }
}

impl Tab for QueryEditorTab {
    fn id(&self) -> String {
        match &self.file_path {
            Some(path) => format!("q {}", path.display()),
            None => "q".to_string(),
        }
    }

    fn title(&self) -> String {
        self.file_path
            .as_deref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Query editor".to_string())
    }

    fn is_saved(&self) -> bool {
        !self.modified
    }

    fn available_actions(&self) -> Vec<Action> {
        let mut actions = Vec::new();

        if self.connection.is_open() {
            actions.push(Action::Run);
            actions.push(Action::RunQueued);
        }

        if !self.is_saved() {
            actions.push(Action::Save);
        }

        if self.connection.in_transaction() {
            actions.push(Action::Commit);
            actions.push(Action::Rollback);
        } else {
            if self.connection.supports_transactions() && self.connection.is_open() {
                actions.push(Action::BeginTransaction);
            }
            actions.push(Action::SwitchConnection);
        }

        actions
    }
}

/// Byte positions of semicolons at the top level of the text: outside string
/// literals, quoted identifiers and line comments.
fn top_level_semicolons(text: &str) -> Vec<usize> {
    #[derive(PartialEq)]
    enum Ctx {
        Plain,
        SingleQuote,
        DoubleQuote,
        LineComment,
    }

    let mut positions = Vec::new();
    let mut ctx = Ctx::Plain;
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match ctx {
            Ctx::Plain => match b {
                b';' => positions.push(i),
                b'\'' => ctx = Ctx::SingleQuote,
                b'"' => ctx = Ctx::DoubleQuote,
                b'-' if bytes.get(i + 1) == Some(&b'-') => ctx = Ctx::LineComment,
                _ => {}
            },
            Ctx::SingleQuote => {
                if b == b'\'' {
                    // '' is an escaped quote inside the literal.
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 1;
                    } else {
                        ctx = Ctx::Plain;
                    }
                }
            }
            Ctx::DoubleQuote => {
                if b == b'"' {
                    ctx = Ctx::Plain;
                }
            }
            Ctx::LineComment => {
                if b == b'\n' {
                    ctx = Ctx::Plain;
                }
            }
        }
        i += 1;
    }

    positions
}

/// Splits a script into top-level statements, dropping empty fragments.
/// Used by the headless runner to execute a file statement by statement.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut start = 0;

    for pos in top_level_semicolons(text) {
        let fragment = text[start..pos].trim();
        if !fragment.is_empty() {
            statements.push(fragment.to_string());
        }
        start = pos + 1;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}
