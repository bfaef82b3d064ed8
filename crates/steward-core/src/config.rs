//! Writer configuration
//!
//! Loaded from TOML. Every section has defaults, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! service_admin_groups = ["5f2b..."]
//! variant_editor_groups = ["9c41..."]
//!
//! [delete_agent]
//! valid_protocols = ["CommandFeedV1", "CommandFeedV2", "PCFV2Batch", "CosmosDeleteSignalV2"]
//! valid_release_states = ["PreProd", "Prod"]
//!
//! [authorization_cache]
//! max_capacity = 10000
//! ttl_secs = 300
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use steward_validation::KindPolicy;
use uuid::Uuid;

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings shared by every entity writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Members bypass owner write-group checks and may alter production
    /// connection details
    pub service_admin_groups: Vec<Uuid>,
    /// Groups authorizing variant definition writes
    pub variant_editor_groups: Vec<Uuid>,
    /// Protocols and release states accepted for delete agents
    pub delete_agent: KindPolicy,
    pub authorization_cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            service_admin_groups: Vec::new(),
            variant_editor_groups: Vec::new(),
            delete_agent: KindPolicy::delete_agent(),
            authorization_cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WriterConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    #[must_use]
    pub fn with_service_admin_group(mut self, group: Uuid) -> Self {
        self.service_admin_groups.push(group);
        self
    }

    #[must_use]
    pub fn with_variant_editor_group(mut self, group: Uuid) -> Self {
        self.variant_editor_groups.push(group);
        self
    }
}

/// Principal group-membership cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub ttl_secs: u64,
}

impl CacheConfig {
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl_secs: 300,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for `steward_*` targets when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
