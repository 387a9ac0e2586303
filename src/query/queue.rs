//! Per-connection queue state for the scheduler.
//!
//! Provides a pure state management layer for one connection's running slot
//! and pending FIFO, separated from the async dispatch machinery. This
//! enables unit testing of admission and drain logic without requiring a
//! runtime or live clients.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::query::token::{QueryToken, TokenId};

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The running slot was free; the token occupies it and must be
    /// dispatched by the caller.
    Dispatch,
    /// The connection is busy and the token asked to wait; it was appended
    /// at the given position (1-indexed).
    Queued { position: usize },
    /// The connection is busy and the token did not ask to wait.
    Busy,
}

/// Queue state for a single connection: one running slot plus a FIFO of
/// pending tokens.
///
/// At most one token occupies the running slot at any time; that is the
/// scheduler's core invariant, checked here with debug assertions because a
/// violation is a programming error, not a runtime condition.
#[derive(Default)]
pub struct ConnectionQueue {
    running: Option<Arc<QueryToken>>,
    pending: VecDeque<Arc<QueryToken>>,
}

impl ConnectionQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to admit a token.
    ///
    /// The decision and the running-slot claim happen together so callers
    /// can treat "check slot, else enqueue" as one step under their lock.
    pub fn admit(&mut self, token: &Arc<QueryToken>) -> Admission {
        if self.running.is_none() {
            self.running = Some(Arc::clone(token));
            return Admission::Dispatch;
        }

        if token.enqueue_requested() {
            self.pending.push_back(Arc::clone(token));
            Admission::Queued {
                position: self.pending.len(),
            }
        } else {
            Admission::Busy
        }
    }

    /// Releases the running slot held by the given token.
    pub fn finish(&mut self, id: TokenId) {
        debug_assert!(
            self.running.as_ref().map(|t| t.id()) == Some(id),
            "finish() for a token that does not hold the running slot"
        );
        if self.running.as_ref().map(|t| t.id()) == Some(id) {
            self.running = None;
        }
    }

    /// Pops the next pending token into the running slot.
    ///
    /// Tokens that went terminal while queued (cancelled) are dropped on the
    /// way; they already announced their rejection. Returns the token the
    /// caller must dispatch, if any.
    pub fn promote_next(&mut self) -> Option<Arc<QueryToken>> {
        debug_assert!(
            self.running.is_none(),
            "promote_next() while a token is still running"
        );
        while let Some(token) = self.pending.pop_front() {
            if token.is_terminal() {
                continue;
            }
            self.running = Some(Arc::clone(&token));
            return Some(token);
        }
        None
    }

    /// Removes and returns every pending token (used by cancel-all).
    pub fn take_pending(&mut self) -> Vec<Arc<QueryToken>> {
        self.pending.drain(..).collect()
    }

    /// The token currently holding the running slot.
    pub fn running(&self) -> Option<&Arc<QueryToken>> {
        self.running.as_ref()
    }

    /// Number of pending tokens, including any that were cancelled in place
    /// and not yet skipped by a drain.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is running and nothing is queued.
    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.pending.is_empty()
    }
}
