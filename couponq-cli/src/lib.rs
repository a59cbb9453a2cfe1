//! couponq operator CLI
//!
//! Runs worker pools and inspects or repairs job queues in the store named
//! by the configuration file.

#![allow(clippy::module_name_repetitions)]

pub mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{JobsCommand, WorkerCommand};
use couponq::config::CouponqConfig;
use couponq::state::Dispatch;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "couponq")]
#[command(author, version, about = "Redis-backed job dispatch", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./couponq.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a worker pool with console handlers
    Worker(WorkerCommand),

    /// Queue management commands
    Jobs {
        /// Queue operation
        #[command(subcommand)]
        command: JobsCommand,
    },
}

impl Cli {
    /// Load configuration from `--config`, or from the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or a value is invalid.
    pub fn load_config(&self) -> Result<CouponqConfig> {
        match &self.config {
            Some(path) => CouponqConfig::load_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => CouponqConfig::load().context("Failed to load configuration"),
        }
    }
}

/// Run the parsed command against `dispatch`.
///
/// # Errors
///
/// Returns whatever error the command reports.
pub async fn run(command: &Commands, dispatch: &Dispatch) -> Result<()> {
    match command {
        Commands::Worker(cmd) => cmd.execute(dispatch).await,
        Commands::Jobs { command } => command.execute(dispatch).await,
    }
}
