//! Live query execution tests.
//!
//! These require a running PostgreSQL database. Set DATABASE_URL to run
//! them; they skip silently otherwise.

use querydesk::config::ConnectionConfig;
use querydesk::connection::Connection;
use querydesk::db::{DatabaseClient, PostgresClient, Value};
use querydesk::query::{QueryLog, QueryScheduler, TokenState};
use std::sync::Arc;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a test client.
async fn get_test_client() -> Option<PostgresClient> {
    let url = get_test_database_url()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    PostgresClient::connect(&config).await.ok()
}

#[tokio::test]
async fn test_execute_simple_select() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = client
        .execute_query("SELECT 1 as num, 'hello' as greeting")
        .await
        .unwrap();

    assert_eq!(result.columns.len(), 2);
    assert_eq!(result.columns[0].name, "num");
    assert_eq!(result.columns[1].name, "greeting");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.row_count, 1);

    match &result.rows[0][0] {
        Value::Int(1) => {}
        other => panic!("Expected Int(1), got {:?}", other),
    }

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_scheduled_execution_against_live_database() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let scheduler = QueryScheduler::new(Arc::new(QueryLog::new(10)));
    let conn = Connection::new("live", Box::new(client));

    struct Quiet;
    impl querydesk::query::QueryObserver for Quiet {}

    let token = scheduler
        .submit("SELECT 1", Arc::clone(&conn), false, Arc::new(Quiet))
        .unwrap();

    // Poll until terminal; the worker runs on the runtime.
    for _ in 0..100 {
        if token.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    assert_eq!(token.state(), TokenState::Succeeded);
    assert_eq!(token.row_count(), Some(1));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_explicit_transaction_on_live_session() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let conn = Connection::new("live", Box::new(client));

    conn.begin_transaction().await.unwrap();
    assert!(conn.in_transaction());

    // Session-scoped: the same connection sees the open transaction.
    conn.client()
        .execute_query("SELECT txid_current()")
        .await
        .unwrap();

    conn.rollback().await.unwrap();
    assert!(!conn.in_transaction());

    conn.close().await.unwrap();
}
