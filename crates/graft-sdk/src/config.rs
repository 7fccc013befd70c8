use std::path::Path;

use graft_codec::{ComposerConfig, DecomposerConfig};
use graft_pool::PoolConfig;
use graft_transport::{RemoteConfig, SqliteConfig};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Everything needed to open a [`Graft`](crate::Graft) instance.
///
/// Every section is optional in TOML; missing keys take their defaults.
///
/// ```toml
/// [local]
/// base_path = ".graft"
///
/// [remote]
/// base_url = "https://objects.example.com"
/// namespace = "project-7"
///
/// [pool]
/// workers = 4
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraftConfig {
    pub decomposer: DecomposerConfig,
    pub composer: ComposerConfig,
    pub pool: PoolConfig,
    /// Local fragment cache.
    pub local: SqliteConfig,
    /// Object server to send to and receive from.
    pub remote: Option<RemoteConfig>,
}

impl GraftConfig {
    pub fn from_toml_str(s: &str) -> SdkResult<Self> {
        toml::from_str(s).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }
}
