use clap::Parser;

use sqlchain::cli::Cli;
use sqlchain::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    Cli::parse().execute().await?;
    Ok(())
}
