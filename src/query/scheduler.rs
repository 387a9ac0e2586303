//! Process-wide query scheduler.
//!
//! Admission point for every statement the application runs. The scheduler
//! keeps one queue per connection (a running slot plus a pending FIFO),
//! dispatches executions onto worker tasks so the interface side never
//! blocks, and drives each token to a terminal state no matter what the
//! database client does. Nothing the client throws escapes this module: a
//! failure becomes a `Failed` token plus a notification.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::connection::Connection;
use crate::error::{DeskError, Result};
use crate::query::history::QueryLog;
use crate::query::queue::{Admission, ConnectionQueue};
use crate::query::token::{QueryObserver, QueryToken, TokenId};

/// Per-connection FIFO scheduler for statement execution.
///
/// One instance serves the whole application; it is handed to tabs at
/// construction rather than reached through a global.
pub struct QueryScheduler {
    queues: Mutex<HashMap<String, ConnectionQueue>>,
    audit: Arc<QueryLog>,
}

impl QueryScheduler {
    /// Creates a scheduler that records every outcome into `audit`.
    pub fn new(audit: Arc<QueryLog>) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            audit,
        })
    }

    /// The audit log this scheduler records into.
    pub fn audit(&self) -> &Arc<QueryLog> {
        &self.audit
    }

    /// Builds a token for the statement and admits it.
    ///
    /// The only error surfaced here is construction validation; everything
    /// that happens after admission is reported through the observer.
    pub fn submit(
        self: &Arc<Self>,
        text: &str,
        connection: Arc<Connection>,
        enqueue_requested: bool,
        observer: Arc<dyn QueryObserver>,
    ) -> Result<Arc<QueryToken>> {
        let token = QueryToken::new(text, connection, enqueue_requested)?;
        token.subscribe(observer);
        let audit: Arc<dyn QueryObserver> = self.audit.clone();
        token.subscribe(audit);
        self.enqueue(Arc::clone(&token));
        Ok(token)
    }

    /// Admits a token: run now, wait in line, or reject.
    ///
    /// Never blocks and never fails. The admission decision and the
    /// running-slot claim happen under one lock so two concurrent calls
    /// cannot both see a free slot.
    pub fn enqueue(self: &Arc<Self>, token: Arc<QueryToken>) {
        let admission = {
            let mut queues = self.queues.lock().unwrap();
            let queue = queues
                .entry(token.connection().name().to_string())
                .or_default();
            queue.admit(&token)
        };

        match admission {
            Admission::Dispatch => {
                if token.accept() {
                    self.dispatch(Arc::clone(&token));
                } else {
                    // Cancelled between admission and acceptance; give the
                    // slot back and let anything behind it run.
                    self.release(token.connection().name(), token.id());
                    self.drain(token.connection().name());
                }
            }
            Admission::Queued { position } => {
                debug!(
                    connection = token.connection().name(),
                    position, "statement queued"
                );
            }
            Admission::Busy => token.reject(),
        }
    }

    /// Cancels everything scheduled for a connection.
    ///
    /// Pending tokens go terminal without running; the running token, if any,
    /// receives a best-effort cancellation signal and its worker reports the
    /// cancellation failure.
    pub fn cancel_all(&self, connection: &Connection) {
        self.cancel_all_named(connection.name());
    }

    /// Cancels everything scheduled for every connection. Used at shutdown.
    pub fn shutdown(&self) {
        let names: Vec<String> = self.queues.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.cancel_all_named(&name);
        }
    }

    /// Number of tokens waiting in a connection's queue.
    pub fn pending_count(&self, connection: &Connection) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(connection.name())
            .map(|q| q.pending_count())
            .unwrap_or(0)
    }

    /// Whether a connection has no running and no pending statements.
    pub fn is_idle(&self, connection: &Connection) -> bool {
        self.queues
            .lock()
            .unwrap()
            .get(connection.name())
            .map(|q| q.is_idle())
            .unwrap_or(true)
    }

    fn cancel_all_named(&self, name: &str) {
        let (pending, running) = {
            let mut queues = self.queues.lock().unwrap();
            match queues.get_mut(name) {
                Some(queue) => (queue.take_pending(), queue.running().cloned()),
                None => (Vec::new(), None),
            }
        };

        for token in pending {
            token.cancel();
        }
        if let Some(token) = running {
            token.cancel();
        }
    }

    /// Spawns the execution worker for an accepted token.
    fn dispatch(self: &Arc<Self>, token: Arc<QueryToken>) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run_token(&token).await;
            scheduler.release(token.connection().name(), token.id());
            scheduler.drain(token.connection().name());
        });
    }

    /// Runs one statement to a terminal state.
    async fn run_token(&self, token: &Arc<QueryToken>) {
        let cancel = token.cancellation();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                // The abandoned call may still complete inside the client;
                // the token is terminal now, so any late result is discarded.
                token.fail(DeskError::cancelled("query cancelled"));
            }
            result = token.connection().client().execute_query(token.text()) => {
                match result {
                    Ok(query_result) => token.succeed(query_result),
                    Err(e) => token.fail(e),
                }
            }
        }
    }

    /// Releases the running slot held by a finished token.
    fn release(&self, name: &str, id: TokenId) {
        let mut queues = self.queues.lock().unwrap();
        if let Some(queue) = queues.get_mut(name) {
            queue.finish(id);
        }
    }

    /// Promotes the next pending token, if any, and dispatches it.
    fn drain(self: &Arc<Self>, name: &str) {
        loop {
            let next = {
                let mut queues = self.queues.lock().unwrap();
                match queues.get_mut(name) {
                    Some(queue) if queue.running().is_none() => queue.promote_next(),
                    _ => None,
                }
            };

            let Some(token) = next else { return };

            if token.accept() {
                self.dispatch(token);
                return;
            }

            // Went terminal between promotion and acceptance; free the slot
            // and look at the next one.
            self.release(name, token.id());
        }
    }
}
