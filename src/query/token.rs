//! Query tokens: one submitted statement and its lifecycle.
//!
//! A token is created by an editor tab, owned by the scheduler while it
//! executes, and consumed again by the tab once it reaches a terminal state.
//! Every state transition is announced synchronously to the registered
//! observers, in a fixed relative order: `on_started` then `on_accepted`
//! when the token leaves the queue and begins running, then exactly one of
//! `on_succeeded`/`on_failed`. A token that never runs gets `on_rejected`
//! and nothing else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::db::QueryResult;
use crate::error::{DeskError, Result};

/// Unique identifier for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(u64);

impl TokenId {
    /// Generates a new unique token ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the inner u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a token.
///
/// Reachable transitions: Pending→Running→{Succeeded,Failed},
/// Pending→Rejected (busy without the enqueue flag, or cancelled while
/// queued), Running→Failed (cancellation). Each state is entered at most
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Submitted, not yet running (possibly waiting in a queue).
    Pending,
    /// Executing on a worker.
    Running,
    /// Finished with a result set.
    Succeeded,
    /// Finished with an error (including cancellation of a running token).
    Failed,
    /// Never ran: busy target without the enqueue flag, or cancelled while
    /// still queued.
    Rejected,
}

impl TokenState {
    /// Whether this state ends the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Rejected)
    }
}

/// Observer interface for token lifecycle notifications.
///
/// Calls are synchronous; implementations that touch UI state must marshal
/// back to the interface side themselves (the editor tab forwards into a
/// channel). Implementations must not block.
pub trait QueryObserver: Send + Sync {
    /// Execution is about to begin; fires immediately before `on_accepted`.
    fn on_started(&self, token: &QueryToken) {
        let _ = token;
    }

    /// The token left the queue and began running. Fires exactly once per
    /// token that runs; never for rejected or queue-cancelled tokens.
    fn on_accepted(&self, token: &QueryToken) {
        let _ = token;
    }

    /// Execution finished with a result set.
    fn on_succeeded(&self, token: &QueryToken, row_count: usize, duration: Duration) {
        let _ = (token, row_count, duration);
    }

    /// Execution finished with an error (or was cancelled mid-run).
    fn on_failed(&self, token: &QueryToken, error: &DeskError) {
        let _ = (token, error);
    }

    /// The token never ran: busy target, or cancelled while queued.
    fn on_rejected(&self, token: &QueryToken) {
        let _ = token;
    }
}

struct TokenInner {
    state: TokenState,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    result: Option<Arc<QueryResult>>,
    error: Option<String>,
    cancelled: bool,
}

/// One submitted statement: text, target connection, enqueue flag, and
/// lifecycle state.
pub struct QueryToken {
    id: TokenId,
    text: String,
    connection: Arc<Connection>,
    enqueue_requested: bool,
    submitted_at: Instant,
    cancel: CancellationToken,
    observers: Mutex<Vec<Arc<dyn QueryObserver>>>,
    inner: Mutex<TokenInner>,
}

impl QueryToken {
    /// Creates a token in the Pending state.
    ///
    /// Fails with a validation error when the statement is empty after
    /// trimming.
    pub fn new(
        text: impl Into<String>,
        connection: Arc<Connection>,
        enqueue_requested: bool,
    ) -> Result<Arc<Self>> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(DeskError::validation("statement is empty"));
        }

        Ok(Arc::new(Self {
            id: TokenId::new(),
            text,
            connection,
            enqueue_requested,
            submitted_at: Instant::now(),
            cancel: CancellationToken::new(),
            observers: Mutex::new(Vec::new()),
            inner: Mutex::new(TokenInner {
                state: TokenState::Pending,
                started_at: None,
                finished_at: None,
                result: None,
                error: None,
                cancelled: false,
            }),
        }))
    }

    /// Registers an observer for lifecycle notifications.
    pub fn subscribe(&self, observer: Arc<dyn QueryObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    /// The token's unique identifier.
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// The statement text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The target connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Whether the token may wait in the queue when the target is busy.
    pub fn enqueue_requested(&self) -> bool {
        self.enqueue_requested
    }

    /// When the token was constructed.
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TokenState {
        self.inner.lock().unwrap().state
    }

    /// Whether the token has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether the token was cancelled (while queued or running).
    pub fn was_cancelled(&self) -> bool {
        self.inner.lock().unwrap().cancelled
    }

    /// Execution time, excluding queue wait. Present only for tokens that
    /// actually ran to a terminal state.
    pub fn duration(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        match (inner.started_at, inner.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Result set handle, present only after success.
    pub fn result(&self) -> Option<Arc<QueryResult>> {
        self.inner.lock().unwrap().result.clone()
    }

    /// Number of result rows, present only after success.
    pub fn row_count(&self) -> Option<usize> {
        self.inner
            .lock()
            .unwrap()
            .result
            .as_ref()
            .map(|r| r.row_count)
    }

    /// Error message, present only after failure.
    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }

    /// Cancels the token.
    ///
    /// A queued token goes terminal immediately (the scheduler's drain skips
    /// it); cancelling a running token is advisory and surfaces later as a
    /// cancellation failure. Terminal tokens ignore the call: no state change
    /// and no further notifications.
    pub fn cancel(&self) {
        enum Action {
            RejectQueued,
            SignalRunning,
            Nothing,
        }

        let action = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                TokenState::Pending => {
                    inner.state = TokenState::Rejected;
                    inner.cancelled = true;
                    Action::RejectQueued
                }
                TokenState::Running => {
                    inner.cancelled = true;
                    Action::SignalRunning
                }
                _ => Action::Nothing,
            }
        };

        match action {
            Action::RejectQueued => self.notify(|obs| obs.on_rejected(self)),
            Action::SignalRunning => self.cancel.cancel(),
            Action::Nothing => {}
        }
    }

    /// Cancellation signal for the execution worker.
    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Promotes the token to Running. Returns false when the token is no
    /// longer Pending (cancelled while queued), in which case the caller must
    /// not dispatch it.
    pub(crate) fn accept(&self) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != TokenState::Pending {
                return false;
            }
            inner.state = TokenState::Running;
            inner.started_at = Some(Instant::now());
        }
        self.notify(|obs| obs.on_started(self));
        self.notify(|obs| obs.on_accepted(self));
        true
    }

    /// Rejects a Pending token (busy target without the enqueue flag).
    pub(crate) fn reject(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != TokenState::Pending {
                return;
            }
            inner.state = TokenState::Rejected;
        }
        self.notify(|obs| obs.on_rejected(self));
    }

    /// Records a successful execution. Silently discards the result when the
    /// token is already terminal (cancelled mid-run).
    pub(crate) fn succeed(&self, result: QueryResult) {
        let (row_count, duration) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != TokenState::Running {
                return;
            }
            let finished = Instant::now();
            inner.state = TokenState::Succeeded;
            inner.finished_at = Some(finished);
            let row_count = result.row_count;
            inner.result = Some(Arc::new(result));
            let duration = finished.duration_since(inner.started_at.unwrap_or(finished));
            (row_count, duration)
        };
        self.notify(|obs| obs.on_succeeded(self, row_count, duration));
    }

    /// Records a failed execution (including cancellation of a running
    /// token). Silently ignored when the token is already terminal.
    pub(crate) fn fail(&self, error: DeskError) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != TokenState::Running {
                return;
            }
            inner.state = TokenState::Failed;
            inner.finished_at = Some(Instant::now());
            inner.cancelled |= error.is_cancellation();
            inner.error = Some(error.to_string());
        }
        self.notify(|obs| obs.on_failed(self, &error));
    }

    fn notify(&self, f: impl Fn(&Arc<dyn QueryObserver>)) {
        let observers = self.observers.lock().unwrap().clone();
        for obs in &observers {
            f(obs);
        }
    }
}

impl std::fmt::Debug for QueryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryToken")
            .field("id", &self.id)
            .field("connection", &self.connection.name())
            .field("state", &self.state())
            .field("enqueue_requested", &self.enqueue_requested)
            .finish()
    }
}
