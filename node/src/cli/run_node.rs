use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use crate::agreement::SoloAgreement;
use crate::config::Configuration;
use crate::core::node::Node;
use crate::core::shutdown::ShutdownManager;

#[derive(Debug, Clone, Parser)]
pub struct RunNodeCmd {
    #[arg(short, long)]
    pub config_file: String,
}

impl RunNodeCmd {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let conf = match Configuration::try_load(PathBuf::from(self.config_file.as_str())) {
            Ok(conf) => conf,
            Err(err) => anyhow::bail!("Error loading configuration file: {err}"),
        };

        let node = Arc::new(Node::start(conf, SoloAgreement::new())?);
        let (mut manager, mut shutdown_handle) = ShutdownManager::init();

        let shutdown = manager.subscribe();
        let runner = node.clone();
        manager.add_handle(tokio::spawn(async move { runner.run(shutdown).await }));

        let mut stream_int = signal(SignalKind::interrupt())?;
        let mut stream_term = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = stream_int.recv() => shutdown_handle.shutdown()?,
            _ = stream_term.recv() => shutdown_handle.shutdown()?,
        }

        manager.wait_external().await;
        manager.stop().await;

        match Arc::try_unwrap(node) {
            Ok(node) => node.close(true),
            Err(_) => anyhow::bail!("Node still in use after shutdown"),
        }
    }
}
