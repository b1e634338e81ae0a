mod api;
mod cli;
mod credentials;
mod error;
mod server;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting pipeboard");
    cli.execute().await?;

    Ok(())
}
