//! couponq command-line entry point

use anyhow::{Context, Result};
use clap::Parser;
use couponq::state::Dispatch;
use couponq_cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    couponq::observability::init(&config.logging)?;

    let dispatch = Dispatch::connect(config)
        .await
        .context("Failed to connect to Redis")?;
    let result = run(&cli.command, &dispatch).await;
    dispatch.close();
    result
}
