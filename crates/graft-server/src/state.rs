use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use graft_transport::{MemoryTransport, SqliteConfig, SqliteTransport, Transport};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

const MAX_NAMESPACE_LEN: usize = 64;

/// Shared state behind every handler: the configuration and one transport
/// per namespace, opened on first use.
pub struct AppState {
    config: ServerConfig,
    namespaces: RwLock<HashMap<String, Arc<dyn Transport>>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The transport for `name`, opening it if needed. Blocking: may create
    /// a database file.
    pub fn namespace(&self, name: &str) -> ServerResult<Arc<dyn Transport>> {
        validate_namespace(name)?;
        if let Some(transport) = self.namespaces.read().expect("lock poisoned").get(name) {
            return Ok(Arc::clone(transport));
        }

        let mut namespaces = self.namespaces.write().expect("lock poisoned");
        if let Some(transport) = namespaces.get(name) {
            return Ok(Arc::clone(transport));
        }
        let transport: Arc<dyn Transport> = match &self.config.storage_root {
            Some(root) => Arc::new(SqliteTransport::open(&SqliteConfig {
                base_path: root.clone(),
                scope: name.to_string(),
                ..SqliteConfig::default()
            })?),
            None => Arc::new(MemoryTransport::named(format!("memory:{name}"))),
        };
        info!(namespace = name, transport = transport.name(), "opened namespace");
        namespaces.insert(name.to_string(), Arc::clone(&transport));
        Ok(transport)
    }

    /// Names of the namespaces opened so far, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Flush every open namespace. Failures are logged and skipped.
    pub fn flush_all(&self) {
        let namespaces = self.namespaces.read().expect("lock poisoned");
        for (name, transport) in namespaces.iter() {
            if let Err(e) = transport.flush() {
                warn!(namespace = %name, error = %e, "flush on shutdown failed");
            }
        }
    }
}

fn validate_namespace(name: &str) -> ServerResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAMESPACE_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ServerError::InvalidNamespace(name.to_string()))
    }
}
