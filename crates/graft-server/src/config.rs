use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Directory of per-namespace SQLite files. `None` keeps every
    /// namespace in memory.
    pub storage_root: Option<PathBuf>,
    /// Largest accepted request body, in bytes.
    pub max_request_size: usize,
    /// Bearer token required on object routes. `None` allows anonymous access.
    pub auth_token: Option<String>,
    /// Recompute the hash of every uploaded fragment and reject mismatches.
    pub verify_uploads: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7878),
            storage_root: None,
            max_request_size: 100 * 1024 * 1024,
            auth_token: None,
            verify_uploads: true,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:7878".parse::<SocketAddr>().unwrap());
        assert_eq!(c.max_request_size, 100 * 1024 * 1024);
        assert!(c.storage_root.is_none());
        assert!(c.auth_token.is_none());
        assert!(c.verify_uploads);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ServerConfig::from_toml_str(
            r#"
            bind_addr = "0.0.0.0:9000"
            storage_root = "/var/lib/graft"
            "#,
        )
        .unwrap();
        assert_eq!(c.bind_addr.port(), 9000);
        assert_eq!(c.storage_root, Some(PathBuf::from("/var/lib/graft")));
        assert!(c.verify_uploads);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        assert!(matches!(
            ServerConfig::from_toml_str("bind_addr = 3"),
            Err(ServerError::Config(_))
        ));
    }
}
