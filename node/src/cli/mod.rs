use clap::Parser;

pub mod init;
pub mod run_node;

#[derive(Parser, Debug, Clone)]
#[command(name = "sqlchain", about = "SQL chain node")]
pub struct Cli {
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Write a node configuration under ~/.sqlchain
    Init(init::InitCmd),
    /// Run a node from a configuration file
    RunNode(run_node::RunNodeCmd),
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.subcommand {
            Subcommand::Init(cmd) => cmd.execute(),
            Subcommand::RunNode(cmd) => cmd.execute().await,
        }
    }
}
