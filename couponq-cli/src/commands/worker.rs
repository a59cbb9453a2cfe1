//! Worker pool command

use anyhow::Result;
use clap::Args;
use console::{style, Emoji};
use couponq::jobs::HandlerRegistry;
use couponq::state::Dispatch;
use tracing::info;

static ROCKET: Emoji = Emoji("🚀", ">");
static STOP: Emoji = Emoji("■", "x");

/// Run a worker pool until Ctrl+C
#[derive(Debug, Args)]
pub struct WorkerCommand {
    /// Number of worker tasks; defaults to `worker.concurrency`
    #[arg(short, long)]
    pub concurrency: Option<usize>,
}

impl WorkerCommand {
    /// Execute the worker command
    ///
    /// Every enabled class is handled by a console handler that logs the
    /// job and succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the Ctrl+C handler cannot be installed.
    pub async fn execute(&self, dispatch: &Dispatch) -> Result<()> {
        let classes = &dispatch.config().queues.classes;
        let registry = HandlerRegistry::console(classes);
        let concurrency = self
            .concurrency
            .unwrap_or(dispatch.config().worker.concurrency)
            .max(1);

        let pool = dispatch.worker_pool(registry).concurrency(concurrency).spawn();
        let names: Vec<&str> = classes.iter().map(|c| c.as_str()).collect();
        println!(
            "{} Started {} worker(s) on {}",
            ROCKET,
            style(concurrency).bold().cyan(),
            style(names.join(", ")).cyan()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());

        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, draining workers");
        pool.shutdown().await;
        println!("{} Workers stopped", STOP);
        Ok(())
    }
}
