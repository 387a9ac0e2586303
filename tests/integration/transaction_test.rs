//! Transaction gating integration tests.

use std::sync::Arc;

use querydesk::app::Workstation;
use querydesk::config::Config;
use querydesk::connection::Connection;
use querydesk::db::MockDatabaseClient;
use querydesk::error::DeskError;
use querydesk::tab::{Action, Tab};
use tokio_test::assert_ok;

#[tokio::test]
async fn begin_twice_fails_and_leaves_transaction_active() {
    let client = MockDatabaseClient::new();
    let conn = Connection::new("dev", Box::new(client.clone()));

    assert_ok!(conn.begin_transaction().await);

    let err = conn.begin_transaction().await.unwrap_err();
    assert!(matches!(err, DeskError::Transaction(_)));

    // State remains Active, and the client saw exactly one BEGIN.
    assert!(conn.in_transaction());
    assert_eq!(client.begin_count(), 1);

    assert_ok!(conn.commit().await);
    assert!(!conn.in_transaction());
}

#[tokio::test]
async fn commit_and_rollback_require_active_transaction() {
    let conn = Connection::new("dev", Box::new(MockDatabaseClient::new()));

    assert!(matches!(
        conn.commit().await.unwrap_err(),
        DeskError::Transaction(_)
    ));
    assert!(matches!(
        conn.rollback().await.unwrap_err(),
        DeskError::Transaction(_)
    ));
}

#[tokio::test]
async fn queries_flow_through_normal_queue_during_transaction() {
    let mut ws = Workstation::new(Config::default());
    ws.add_connection("dev", Box::new(MockDatabaseClient::new()));
    ws.new_tab("dev").unwrap();

    let tab = ws.active_tab_mut().unwrap();
    tab.begin_transaction().await.unwrap();
    tab.set_text("SELECT 1");

    let token = tab.run(false).unwrap();
    let id = token.id();
    tab.wait_for(id).await;

    assert_eq!(token.row_count(), Some(1));
    assert!(tab.connection().in_transaction());

    tab.commit().await.unwrap();
}

#[tokio::test]
async fn tab_cannot_switch_connection_mid_transaction() {
    let mut ws = Workstation::new(Config::default());
    ws.add_connection("dev", Box::new(MockDatabaseClient::new()));
    ws.add_connection("staging", Box::new(MockDatabaseClient::new()));
    ws.new_tab("dev").unwrap();

    let staging = ws.registry().get("staging").unwrap();
    let tab = ws.active_tab_mut().unwrap();

    tab.begin_transaction().await.unwrap();

    let err = tab.set_connection(Arc::clone(&staging)).unwrap_err();
    assert!(matches!(err, DeskError::Transaction(_)));
    assert_eq!(tab.connection().name(), "dev");

    // Available actions flip from begin to commit/rollback while active.
    let actions = tab.available_actions();
    assert!(actions.contains(&Action::Commit));
    assert!(actions.contains(&Action::Rollback));
    assert!(!actions.contains(&Action::BeginTransaction));
    assert!(!actions.contains(&Action::SwitchConnection));

    tab.rollback().await.unwrap();
    assert_ok!(tab.set_connection(staging));
    assert_eq!(tab.connection().name(), "staging");
}

#[tokio::test]
async fn transaction_is_shared_across_tabs_on_one_connection() {
    let mut ws = Workstation::new(Config::default());
    let client = MockDatabaseClient::new();
    ws.add_connection("dev", Box::new(client.clone()));

    let first = ws.new_tab("dev").unwrap();
    let second = ws.new_tab("dev").unwrap();

    ws.tab_mut(first).unwrap().begin_transaction().await.unwrap();

    // The second tab sees the same transaction and cannot start another.
    let tab = ws.tab_mut(second).unwrap();
    assert!(tab.connection().in_transaction());
    let err = tab.begin_transaction().await.unwrap_err();
    assert!(matches!(err, DeskError::Transaction(_)));

    // Either tab may end it.
    tab.commit().await.unwrap();
    assert!(!ws.tab(first).unwrap().connection().in_transaction());
    assert_eq!(client.begin_count(), 1);
    assert_eq!(client.commit_count(), 1);
}
