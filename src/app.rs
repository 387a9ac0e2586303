//! Application shell tying the pieces together.
//!
//! The [`Workstation`] owns the connection registry, the scheduler, the
//! audit log and the open tabs. Collaborators are built here and passed in
//! explicitly; nothing in the crate reaches for process-wide state.

use std::sync::Arc;

use crate::config::{Config, ConnectionConfig};
use crate::connection::{Connection, ConnectionRegistry};
use crate::db::DatabaseClient;
use crate::error::{DeskError, Result};
use crate::query::history::QueryLog;
use crate::query::scheduler::QueryScheduler;
use crate::query::token::QueryToken;
use crate::tab::{QueryEditorTab, Tab};

/// The assembled workbench: connections, scheduler, audit log and tabs.
pub struct Workstation {
    config: Config,
    registry: Arc<ConnectionRegistry>,
    scheduler: Arc<QueryScheduler>,
    tabs: Vec<QueryEditorTab>,
    active: usize,
}

impl Workstation {
    /// Builds an empty workstation from configuration.
    pub fn new(config: Config) -> Self {
        let log = Arc::new(QueryLog::new(config.editor.log_capacity));
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            scheduler: QueryScheduler::new(log),
            tabs: Vec::new(),
            active: 0,
        }
    }

    /// The loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The process-wide scheduler.
    pub fn scheduler(&self) -> &Arc<QueryScheduler> {
        &self.scheduler
    }

    /// The audit log.
    pub fn audit(&self) -> &Arc<QueryLog> {
        self.scheduler.audit()
    }

    /// Opens a connection from configuration and registers it.
    pub async fn open_connection(
        &self,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<Arc<Connection>> {
        self.registry.open(name, config).await
    }

    /// Registers an already-built client (mock backends, tests).
    pub fn add_connection(&self, name: &str, client: Box<dyn DatabaseClient>) -> Arc<Connection> {
        self.registry.insert(name, client)
    }

    /// Closes a connection, cancelling its scheduled work first.
    pub async fn close_connection(&self, name: &str) -> Result<()> {
        if let Some(conn) = self.registry.get(name) {
            self.scheduler.cancel_all(&conn);
        }
        self.registry.close(name).await
    }

    /// Opens a new editor tab bound to a named connection and makes it
    /// active. Returns the tab index.
    pub fn new_tab(&mut self, connection_name: &str) -> Result<usize> {
        let connection = self.registry.get(connection_name).ok_or_else(|| {
            DeskError::connection(format!("connection '{connection_name}' is not open"))
        })?;

        self.tabs
            .push(QueryEditorTab::new(connection, Arc::clone(&self.scheduler)));
        self.active = self.tabs.len() - 1;
        Ok(self.active)
    }

    /// Number of open tabs.
    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    /// Borrows a tab by index.
    pub fn tab(&self, index: usize) -> Option<&QueryEditorTab> {
        self.tabs.get(index)
    }

    /// Mutably borrows a tab by index.
    pub fn tab_mut(&mut self, index: usize) -> Option<&mut QueryEditorTab> {
        self.tabs.get_mut(index)
    }

    /// The active tab.
    pub fn active_tab(&self) -> Option<&QueryEditorTab> {
        self.tabs.get(self.active)
    }

    /// The active tab, mutably.
    pub fn active_tab_mut(&mut self) -> Option<&mut QueryEditorTab> {
        self.tabs.get_mut(self.active)
    }

    /// Makes a tab active.
    pub fn activate_tab(&mut self, index: usize) -> Result<()> {
        if index >= self.tabs.len() {
            return Err(DeskError::internal(format!("no tab at index {index}")));
        }
        self.active = index;
        Ok(())
    }

    /// Runs the statement at the active tab's cursor.
    pub fn run_active(&mut self, enqueue: bool) -> Result<Arc<QueryToken>> {
        let tab = self
            .tabs
            .get_mut(self.active)
            .ok_or_else(|| DeskError::internal("no active tab"))?;
        tab.run(enqueue)
    }

    /// Closes a tab. Unsaved tabs are refused (returns false) so the caller
    /// can ask the user; in-flight tokens of a closing tab are cancelled.
    pub fn close_tab(&mut self, index: usize) -> Result<bool> {
        let tab = self
            .tabs
            .get(index)
            .ok_or_else(|| DeskError::internal(format!("no tab at index {index}")))?;

        if !tab.confirm_close() {
            return Ok(false);
        }

        tab.cancel_pending();
        self.tabs.remove(index);
        if self.active >= self.tabs.len() && !self.tabs.is_empty() {
            self.active = self.tabs.len() - 1;
        }
        Ok(true)
    }

    /// Drains event channels of every tab. Returns the number of events
    /// applied; front-ends call this from their event loop.
    pub fn process_events(&mut self) -> usize {
        self.tabs.iter_mut().map(|t| t.process_events()).sum()
    }

    /// Cancels all scheduled work and closes every connection.
    pub async fn shutdown(&mut self) {
        for tab in &self.tabs {
            tab.cancel_pending();
        }
        self.scheduler.shutdown();
        self.registry.close_all().await;
    }
}
