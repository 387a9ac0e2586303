//! Scheduling integration tests.
//!
//! Drives the scheduler through its public API with mock backends and
//! verifies the admission, ordering and cancellation contracts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use querydesk::connection::Connection;
use querydesk::db::{HeldDatabaseClient, MockDatabaseClient};
use querydesk::error::DeskError;
use querydesk::query::token::{QueryObserver, QueryToken, TokenId};
use querydesk::query::{QueryLog, QueryScheduler, TokenState};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Observer that counts notifications and forwards them onto a channel.
struct Probe {
    tx: mpsc::UnboundedSender<(TokenId, &'static str)>,
    seen: Mutex<Vec<(TokenId, &'static str)>>,
}

impl Probe {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(TokenId, &'static str)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                seen: Mutex::new(Vec::new()),
            }),
            rx,
        )
    }

    fn record(&self, id: TokenId, event: &'static str) {
        self.seen.lock().unwrap().push((id, event));
        let _ = self.tx.send((id, event));
    }

    fn events_for(&self, id: TokenId) -> Vec<&'static str> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(seen_id, _)| *seen_id == id)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl QueryObserver for Probe {
    fn on_started(&self, token: &QueryToken) {
        self.record(token.id(), "started");
    }
    fn on_accepted(&self, token: &QueryToken) {
        self.record(token.id(), "accepted");
    }
    fn on_succeeded(&self, token: &QueryToken, _row_count: usize, _duration: Duration) {
        self.record(token.id(), "succeeded");
    }
    fn on_failed(&self, token: &QueryToken, _error: &DeskError) {
        self.record(token.id(), "failed");
    }
    fn on_rejected(&self, token: &QueryToken) {
        self.record(token.id(), "rejected");
    }
}

async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<(TokenId, &'static str)>,
    id: TokenId,
    event: &str,
) {
    loop {
        let (got_id, got_event) = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("observer channel closed");
        if got_id == id && got_event == event {
            return;
        }
    }
}

fn scheduler() -> Arc<QueryScheduler> {
    QueryScheduler::new(Arc::new(QueryLog::new(100)))
}

#[tokio::test]
async fn simple_select_succeeds_with_row_count_and_duration() {
    let scheduler = scheduler();
    let conn = Connection::new("c", Box::new(MockDatabaseClient::new()));
    let (probe, mut rx) = Probe::new();

    let token = scheduler
        .submit("SELECT 1", Arc::clone(&conn), false, probe.clone())
        .unwrap();

    wait_for(&mut rx, token.id(), "succeeded").await;

    assert_eq!(token.state(), TokenState::Succeeded);
    assert_eq!(token.row_count(), Some(1));
    assert!(token.duration().unwrap() >= Duration::ZERO);
    assert_eq!(
        probe.events_for(token.id()),
        vec!["started", "accepted", "succeeded"]
    );
}

#[tokio::test]
async fn tokens_run_in_submission_order_one_at_a_time() {
    let scheduler = scheduler();
    let client = HeldDatabaseClient::new();
    let conn = Connection::new("c", Box::new(client.clone()));
    let (probe, mut rx) = Probe::new();

    let tokens: Vec<_> = (1..=5)
        .map(|i| {
            scheduler
                .submit(&format!("SELECT {i}"), Arc::clone(&conn), true, probe.clone())
                .unwrap()
        })
        .collect();

    for token in &tokens {
        // Exactly one statement has entered execution beyond those already
        // finished: the running slot is singular.
        client.release();
        wait_for(&mut rx, token.id(), "succeeded").await;
    }

    assert_eq!(
        client.started(),
        vec![
            "SELECT 1",
            "SELECT 2",
            "SELECT 3",
            "SELECT 4",
            "SELECT 5"
        ]
    );
    assert_eq!(client.started(), client.finished());
    assert!(scheduler.is_idle(&conn));
}

#[tokio::test]
async fn busy_without_enqueue_flag_rejects_synchronously() {
    let scheduler = scheduler();
    let client = HeldDatabaseClient::new();
    let conn = Connection::new("c", Box::new(client.clone()));
    let (probe, mut rx) = Probe::new();

    let t1 = scheduler
        .submit("SELECT 1", Arc::clone(&conn), false, probe.clone())
        .unwrap();
    let queued = scheduler
        .submit("SELECT 2", Arc::clone(&conn), true, probe.clone())
        .unwrap();
    let rejected = scheduler
        .submit("SELECT 3", Arc::clone(&conn), false, probe.clone())
        .unwrap();

    // Rejected before submit returned, queue length untouched.
    assert_eq!(rejected.state(), TokenState::Rejected);
    assert_eq!(scheduler.pending_count(&conn), 1);
    assert_eq!(probe.events_for(rejected.id()), vec!["rejected"]);

    // T1 and the queued token are unaffected.
    client.release();
    wait_for(&mut rx, t1.id(), "succeeded").await;
    client.release();
    wait_for(&mut rx, queued.id(), "succeeded").await;

    assert_eq!(client.started(), vec!["SELECT 1", "SELECT 2"]);
}

#[tokio::test]
async fn queued_token_stays_pending_until_predecessor_finishes() {
    let scheduler = scheduler();
    let client = HeldDatabaseClient::new();
    let conn = Connection::new("c", Box::new(client.clone()));
    let (probe, mut rx) = Probe::new();

    let slow = scheduler
        .submit("SELECT pg_sleep(60)", Arc::clone(&conn), false, probe.clone())
        .unwrap();
    let waiting = scheduler
        .submit("SELECT 2", Arc::clone(&conn), true, probe.clone())
        .unwrap();

    assert_eq!(waiting.state(), TokenState::Pending);
    assert_eq!(scheduler.pending_count(&conn), 1);
    // Nothing has fired for the waiter yet; acceptance comes with the drain.
    assert!(probe.events_for(waiting.id()).is_empty());

    // Completion of the slow statement promotes the waiter immediately.
    client.release();
    wait_for(&mut rx, slow.id(), "succeeded").await;
    wait_for(&mut rx, waiting.id(), "accepted").await;

    client.release();
    wait_for(&mut rx, waiting.id(), "succeeded").await;
}

#[tokio::test]
async fn cancelled_pending_token_never_starts() {
    let scheduler = scheduler();
    let client = HeldDatabaseClient::new();
    let conn = Connection::new("c", Box::new(client.clone()));
    let (probe, mut rx) = Probe::new();

    let t1 = scheduler
        .submit("SELECT 1", Arc::clone(&conn), false, probe.clone())
        .unwrap();
    let doomed = scheduler
        .submit("SELECT 2", Arc::clone(&conn), true, probe.clone())
        .unwrap();
    let t3 = scheduler
        .submit("SELECT 3", Arc::clone(&conn), true, probe.clone())
        .unwrap();

    doomed.cancel();
    wait_for(&mut rx, doomed.id(), "rejected").await;

    client.release();
    wait_for(&mut rx, t1.id(), "succeeded").await;
    client.release();
    wait_for(&mut rx, t3.id(), "succeeded").await;

    // The cancelled statement never reached the client, and no notification
    // beyond the rejection ever fired for it.
    assert_eq!(client.started(), vec!["SELECT 1", "SELECT 3"]);
    assert_eq!(probe.events_for(doomed.id()), vec!["rejected"]);
}

#[tokio::test]
async fn double_cancel_fires_no_extra_notifications() {
    let scheduler = scheduler();
    let client = HeldDatabaseClient::new();
    let conn = Connection::new("c", Box::new(client.clone()));
    let (probe, mut rx) = Probe::new();

    let t1 = scheduler
        .submit("SELECT 1", Arc::clone(&conn), false, probe.clone())
        .unwrap();
    let queued = scheduler
        .submit("SELECT 2", Arc::clone(&conn), true, probe.clone())
        .unwrap();

    queued.cancel();
    queued.cancel();
    wait_for(&mut rx, queued.id(), "rejected").await;
    queued.cancel();

    assert_eq!(probe.events_for(queued.id()), vec!["rejected"]);

    client.release();
    wait_for(&mut rx, t1.id(), "succeeded").await;
}

#[tokio::test]
async fn connections_execute_independently() {
    let scheduler = scheduler();
    let client_a = HeldDatabaseClient::new();
    let client_b = HeldDatabaseClient::new();
    let conn_a = Connection::new("a", Box::new(client_a.clone()));
    let conn_b = Connection::new("b", Box::new(client_b.clone()));
    let (probe, mut rx) = Probe::new();

    let ta = scheduler
        .submit("SELECT 'a'", Arc::clone(&conn_a), false, probe.clone())
        .unwrap();
    let tb = scheduler
        .submit("SELECT 'b'", Arc::clone(&conn_b), false, probe.clone())
        .unwrap();

    // Both run at once; neither waits for the other.
    assert_eq!(ta.state(), TokenState::Running);
    assert_eq!(tb.state(), TokenState::Running);

    client_b.release();
    wait_for(&mut rx, tb.id(), "succeeded").await;
    assert_eq!(ta.state(), TokenState::Running);

    client_a.release();
    wait_for(&mut rx, ta.id(), "succeeded").await;
}

#[tokio::test]
async fn cancel_all_rejects_pending_and_signals_running() {
    let scheduler = scheduler();
    let client = HeldDatabaseClient::new();
    let conn = Connection::new("c", Box::new(client.clone()));
    let (probe, mut rx) = Probe::new();

    let running = scheduler
        .submit("SELECT 1", Arc::clone(&conn), false, probe.clone())
        .unwrap();
    let p1 = scheduler
        .submit("SELECT 2", Arc::clone(&conn), true, probe.clone())
        .unwrap();
    let p2 = scheduler
        .submit("SELECT 3", Arc::clone(&conn), true, probe.clone())
        .unwrap();

    scheduler.cancel_all(&conn);

    wait_for(&mut rx, p1.id(), "rejected").await;
    wait_for(&mut rx, p2.id(), "rejected").await;
    wait_for(&mut rx, running.id(), "failed").await;

    assert!(running.was_cancelled());
    assert_eq!(scheduler.pending_count(&conn), 0);
    assert_eq!(client.started(), vec!["SELECT 1"]);
}
