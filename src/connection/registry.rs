//! Connection registry for database lifecycle.
//!
//! Owns every open [`Connection`] by name. The registry opens clients from
//! configuration and closes them on request or at shutdown; the execution
//! core only ever borrows `Arc<Connection>` handles from here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::db::DatabaseClient;
use crate::error::{DeskError, Result};

/// Registry of open connections, keyed by name.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a client for the given configuration and registers it.
    ///
    /// Fails when a connection with the same name is already open.
    pub async fn open(&self, name: &str, config: &ConnectionConfig) -> Result<Arc<Connection>> {
        if self.get(name).is_some() {
            return Err(DeskError::connection(format!(
                "connection '{name}' is already open"
            )));
        }

        let client = crate::db::connect(config).await?;
        Ok(self.insert(name, client))
    }

    /// Registers an already-built client under the given name.
    ///
    /// A connection with the same name is replaced in the map but not closed;
    /// callers that want replacement semantics should close it first.
    pub fn insert(&self, name: &str, client: Box<dyn DatabaseClient>) -> Arc<Connection> {
        let conn = Connection::new(name, client);
        self.connections
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::clone(&conn));
        conn
    }

    /// Looks up a connection by name.
    pub fn get(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections.lock().unwrap().get(name).cloned()
    }

    /// Returns the names of all open connections, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Whether the registry holds no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().unwrap().is_empty()
    }

    /// Removes and closes a connection.
    ///
    /// Scheduled work for the connection must be cancelled by the caller
    /// before closing (the application shell does this).
    pub async fn close(&self, name: &str) -> Result<()> {
        let conn = self
            .connections
            .lock()
            .unwrap()
            .remove(name)
            .ok_or_else(|| DeskError::connection(format!("connection '{name}' is not open")))?;

        conn.close().await
    }

    /// Closes every connection. Errors are logged, not propagated; shutdown
    /// keeps going.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Connection>> = {
            let mut map = self.connections.lock().unwrap();
            map.drain().map(|(_, conn)| conn).collect()
        };

        for conn in drained {
            if let Err(e) = conn.close().await {
                tracing::warn!("Error closing connection '{}': {}", conn.name(), e);
            }
        }
    }
}
