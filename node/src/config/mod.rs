use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ReadMode;

const SQLCHAIN_ROOT_DIR: &str = ".sqlchain";
const SQLCHAIN_CONFIG_FILE: &str = "sqlchain.toml";

pub const DEFAULT_PERIOD_MS: u64 = 10_000;
pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_UPDATE_TERMS: u64 = 0;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),
    #[error("Configuration file already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Configuration error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub node: NodeConfiguration,
    pub storage: StorageConfiguration,
    pub chain: ChainConfiguration,
    #[serde(default)]
    pub state: StateConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfiguration {
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfiguration {
    /// Blocks, transaction pool, irreversible marker and meta tables.
    pub chain_db_path: String,
    /// Tables written by client SQL through the speculative engine.
    pub state_db_path: String,
    pub create_if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfiguration {
    pub genesis_timestamp_ms: u64,
    pub period_ms: u64,
    /// Upper bound of a single wait in the production loop.
    pub tick_ms: u64,
    /// Cycles per leader term, 0 disables rotation.
    pub update_terms: u64,
    /// Ordered node ids. A node's position decides its production turns.
    pub peers: Vec<String>,
    pub leader: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateConfiguration {
    #[serde(default)]
    pub read_mode: ReadMode,
}

impl Configuration {
    pub fn try_load(path: PathBuf) -> Result<Configuration> {
        if !path.exists() {
            return Err(ConfigurationError::NotFound(path.display().to_string()));
        }
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|err| ConfigurationError::Other(err.into()))?;

        let configuration: Configuration = config
            .try_deserialize()
            .map_err(|err| ConfigurationError::Other(err.into()))?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn try_load_from_home_dir(node_name: &str) -> Result<Configuration> {
        Self::try_load(Self::config_file_path(node_name)?)
    }

    pub fn try_write(&self, path: PathBuf) -> Result<()> {
        if path.exists() {
            return Err(ConfigurationError::AlreadyExists(path.display().to_string()));
        }
        let config = toml::to_string(&self).map_err(|err| ConfigurationError::Other(err.into()))?;
        let mut file = std::fs::File::create(&path).map_err(|err| ConfigurationError::Other(err.into()))?;
        file.write_all(config.as_bytes())
            .map_err(|err| ConfigurationError::Other(err.into()))?;
        log::info!("Configuration written to {}", path.display());
        Ok(())
    }

    pub fn try_write_home_dir(&self, node_name: &str) -> Result<()> {
        let dir = Self::node_dir(node_name)?;
        std::fs::create_dir_all(&dir).map_err(|err| ConfigurationError::Other(err.into()))?;
        self.try_write(dir.join(SQLCHAIN_CONFIG_FILE))
    }

    pub fn validate(&self) -> Result<()> {
        let chain = &self.chain;
        if chain.period_ms == 0 {
            return Err(ConfigurationError::Invalid("period_ms must be positive".into()));
        }
        if chain.tick_ms == 0 {
            return Err(ConfigurationError::Invalid("tick_ms must be positive".into()));
        }
        if !chain.peers.contains(&self.node.node_id) {
            return Err(ConfigurationError::Invalid(format!(
                "node {} is not one of the peers",
                self.node.node_id
            )));
        }
        if !chain.peers.contains(&chain.leader) {
            return Err(ConfigurationError::Invalid(format!(
                "leader {} is not one of the peers",
                chain.leader
            )));
        }
        Ok(())
    }

    pub fn sqlchain_root_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(SQLCHAIN_ROOT_DIR))
            .ok_or_else(|| ConfigurationError::Other(anyhow::anyhow!("Home directory not found")))
    }

    pub fn node_dir(node_name: &str) -> Result<PathBuf> {
        Ok(Self::sqlchain_root_dir()?.join(node_name))
    }

    fn config_file_path(node_name: &str) -> Result<PathBuf> {
        Ok(Self::node_dir(node_name)?.join(SQLCHAIN_CONFIG_FILE))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn configuration(node_id: &str, peers: &[&str], genesis_ms: u64) -> Configuration {
        Configuration {
            node: NodeConfiguration {
                node_id: node_id.to_string(),
            },
            storage: StorageConfiguration {
                chain_db_path: crate::storage::sqlite::test_support::temp_db_path("chain"),
                state_db_path: crate::storage::sqlite::test_support::temp_db_path("state"),
                create_if_not_exists: true,
            },
            chain: ChainConfiguration {
                genesis_timestamp_ms: genesis_ms,
                period_ms: DEFAULT_PERIOD_MS,
                tick_ms: DEFAULT_TICK_MS,
                update_terms: DEFAULT_UPDATE_TERMS,
                peers: peers.iter().map(|p| p.to_string()).collect(),
                leader: peers[0].to_string(),
            },
            state: StateConfiguration::default(),
        }
    }
}
