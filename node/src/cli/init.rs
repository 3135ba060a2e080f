use clap::Parser;

use crate::config::{
    ChainConfiguration, Configuration, NodeConfiguration, StateConfiguration,
    StorageConfiguration, DEFAULT_PERIOD_MS, DEFAULT_TICK_MS, DEFAULT_UPDATE_TERMS,
};
use crate::utilities::time::ChainTime;

#[derive(Debug, Clone, Parser)]
pub struct InitCmd {
    #[arg(long, default_value = "default")]
    pub node_name: String,
    #[arg(long)]
    pub node_id: String,
    /// Ordered, comma separated node ids of all peers
    #[arg(long, value_delimiter = ',')]
    pub peers: Vec<String>,
    /// Base nominal leader, the first peer when omitted
    #[arg(long)]
    pub leader: Option<String>,
    /// Genesis time in unix milliseconds, now when omitted
    #[arg(long)]
    pub genesis_timestamp_ms: Option<u64>,
    #[arg(long, default_value_t = DEFAULT_PERIOD_MS)]
    pub period_ms: u64,
    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    pub tick_ms: u64,
    #[arg(long, default_value_t = DEFAULT_UPDATE_TERMS)]
    pub update_terms: u64,
}

impl InitCmd {
    pub fn execute(self) -> anyhow::Result<()> {
        if Configuration::try_load_from_home_dir(&self.node_name).is_ok() {
            anyhow::bail!("Configuration already exists for node {}", self.node_name);
        }

        let path = Configuration::node_dir(&self.node_name)?;
        println!("Creating sqlchain node configuration in: {}", path.display());

        let db_dir = path.join("db");
        std::fs::create_dir_all(&db_dir)?;
        let path_string = |name: &str| db_dir.join(name).to_string_lossy().into_owned();

        let leader = match self.leader {
            Some(leader) => leader,
            None => self
                .peers
                .first()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("At least one peer is required"))?,
        };

        let configuration = Configuration {
            node: NodeConfiguration {
                node_id: self.node_id,
            },
            storage: StorageConfiguration {
                chain_db_path: path_string("chain.sqlite"),
                state_db_path: path_string("state.sqlite"),
                create_if_not_exists: true,
            },
            chain: ChainConfiguration {
                genesis_timestamp_ms: self.genesis_timestamp_ms.unwrap_or_else(ChainTime::now),
                period_ms: self.period_ms,
                tick_ms: self.tick_ms,
                update_terms: self.update_terms,
                peers: self.peers,
                leader,
            },
            state: StateConfiguration::default(),
        };
        configuration.validate()?;
        configuration.try_write_home_dir(&self.node_name)?;
        println!("Configuration: {configuration:?}");
        Ok(())
    }
}
