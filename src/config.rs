//! Node configuration loaded from TOML
//!
//! Nothing here affects consensus; network constants live in
//! [`ParameterSet`](crate::params::ParameterSet).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::NodeOptions;
use crate::params::NetworkType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanConfig {
    pub max_blocks: usize,
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub network: NetworkType,
    pub storage: StorageConfig,
    pub orphans: OrphanConfig,
    pub logging: LoggingConfig,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub prune_depth: u64,
}

fn default_tick_interval_secs() -> u64 {
    5
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Testnet,
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                data_dir: PathBuf::from("./kindle-data"),
            },
            orphans: OrphanConfig {
                max_blocks: 100,
                max_age_secs: 20 * 60,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            tick_interval_secs: default_tick_interval_secs(),
            prune_depth: 0,
        }
    }
}

impl NodeConfig {
    /// Load and check a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: NodeConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("tick_interval_secs must be positive".into()));
        }
        if self.storage.backend == StorageBackend::Sled && self.storage.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("sled backend needs a data_dir".into()));
        }
        Ok(())
    }

    pub fn node_options(&self) -> NodeOptions {
        NodeOptions {
            max_orphans: self.orphans.max_blocks,
            orphan_max_age_secs: self.orphans.max_age_secs,
            prune_depth: self.prune_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.network, NetworkType::Testnet);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = NodeConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network, config.network);
        assert_eq!(parsed.orphans.max_blocks, config.orphans.max_blocks);
    }

    #[test]
    fn test_load_valid_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("kindle.toml");
        std::fs::write(
            &path,
            r#"
network = "mainnet"
prune_depth = 288

[storage]
backend = "sled"
data_dir = "/var/lib/kindle"

[orphans]
max_blocks = 16
max_age_secs = 60

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.network, NetworkType::Mainnet);
        assert_eq!(config.storage.backend, StorageBackend::Sled);
        assert_eq!(config.tick_interval_secs, 5);
        assert_eq!(config.node_options().max_orphans, 16);
        assert_eq!(config.node_options().prune_depth, 288);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = NodeConfig::load("/nonexistent/path/kindle.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_zero_tick_rejected() {
        let mut config = NodeConfig::default();
        config.tick_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
