//! Editor tab integration tests: the completion protocol as the tab sees it.

use pretty_assertions::assert_eq;

use querydesk::app::Workstation;
use querydesk::config::Config;
use querydesk::db::{FailingDatabaseClient, HeldDatabaseClient, MockDatabaseClient};
use querydesk::query::{LogStatus, TokenState};
use querydesk::tab::Tab;

fn mock_workstation() -> Workstation {
    let ws = Workstation::new(Config::default());
    ws.add_connection("dev", Box::new(MockDatabaseClient::new()));
    ws
}

#[tokio::test]
async fn success_reports_row_count_and_duration() {
    let mut ws = mock_workstation();
    ws.new_tab("dev").unwrap();

    let tab = ws.active_tab_mut().unwrap();
    tab.set_text("SELECT * FROM users");

    let token = tab.run(false).unwrap();
    let id = token.id();
    tab.wait_for(id).await;

    assert_eq!(token.state(), TokenState::Succeeded);
    assert!(tab.status().starts_with("Query finished: 1 rows"));
    assert_eq!(tab.last_result().unwrap().row_count, 1);
}

#[tokio::test]
async fn failure_shows_inline_error_and_audit_entry() {
    let ws = Workstation::new(Config::default());
    ws.add_connection(
        "dev",
        Box::new(FailingDatabaseClient::with_message("relation missing")),
    );
    let mut ws = ws;
    ws.new_tab("dev").unwrap();

    let tab = ws.active_tab_mut().unwrap();
    tab.set_text("SELECT * FROM missing");

    let token = tab.run(false).unwrap();
    let id = token.id();
    tab.wait_for(id).await;

    assert_eq!(token.state(), TokenState::Failed);
    assert!(tab.status().contains("relation missing"));

    let entries = ws.audit().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, LogStatus::Error);
    assert!(entries[0].error.as_ref().unwrap().contains("relation missing"));
}

#[tokio::test]
async fn rejection_reads_as_busy_not_as_error() {
    let ws = Workstation::new(Config::default());
    let client = HeldDatabaseClient::new();
    ws.add_connection("dev", Box::new(client.clone()));
    let mut ws = ws;
    ws.new_tab("dev").unwrap();

    let tab = ws.active_tab_mut().unwrap();
    tab.set_text("SELECT 1");

    let running = tab.run(false).unwrap();
    let bounced = tab.run(false).unwrap();

    assert_eq!(bounced.state(), TokenState::Rejected);
    tab.process_events();
    assert_eq!(tab.status(), "Connection 'dev' is busy");

    client.release();
    let id = running.id();
    tab.wait_for(id).await;

    let entries = ws.audit().entries();
    let statuses: Vec<LogStatus> = entries.iter().map(|e| e.status).collect();
    assert!(statuses.contains(&LogStatus::Rejected));
    assert!(statuses.contains(&LogStatus::Success));
}

#[tokio::test]
async fn audit_log_normalizes_statement_text() {
    let mut ws = mock_workstation();
    ws.new_tab("dev").unwrap();

    let tab = ws.active_tab_mut().unwrap();
    tab.set_text("SELECT *\n   FROM users\n   WHERE id = 1");

    let token = tab.run(false).unwrap();
    let id = token.id();
    tab.wait_for(id).await;

    let entries = ws.audit().entries();
    assert_eq!(entries[0].sql, "SELECT * FROM users WHERE id = 1");
}

#[tokio::test]
async fn multiple_statements_run_the_one_at_the_cursor() {
    let mut ws = mock_workstation();
    ws.new_tab("dev").unwrap();

    let tab = ws.active_tab_mut().unwrap();
    tab.set_text("INSERT INTO t VALUES (1); SELECT * FROM t; DELETE FROM t");
    tab.set_cursor(30);

    let token = tab.run(false).unwrap();
    assert_eq!(token.text(), "SELECT * FROM t");

    let id = token.id();
    tab.wait_for(id).await;
    assert_eq!(token.state(), TokenState::Succeeded);
}

#[tokio::test]
async fn tab_title_and_id_follow_the_attached_file() {
    let mut ws = mock_workstation();
    ws.new_tab("dev").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.sql");

    let tab = ws.active_tab_mut().unwrap();
    tab.set_text("SELECT 1;");
    assert_eq!(tab.title(), "Query editor");
    assert!(!tab.is_saved());

    tab.save_as(&path).unwrap();
    assert_eq!(tab.title(), "report.sql");
    assert!(tab.is_saved());
    assert_eq!(tab.id(), format!("q {}", path.display()));
}
