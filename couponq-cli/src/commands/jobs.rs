//! Queue management commands

use anyhow::{Context, Result};
use clap::Subcommand;
use console::{style, Emoji};
use couponq::jobs::{ClassStats, Job, JobClass, JobId, Payload, QueueStats};
use couponq::state::Dispatch;
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::io::Write;
use std::time::Duration;

static SUCCESS: Emoji = Emoji("✓", "√");
static INFO: Emoji = Emoji("ℹ", "i");
static WARN: Emoji = Emoji("⚠", "!");

/// Queue management commands
#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// Show pending, processing and dead-letter counts per class
    Stats,

    /// Refresh queue counts until Ctrl+C
    Watch {
        /// Update interval in seconds
        #[arg(short, long, default_value = "2")]
        interval: u64,
    },

    /// Enqueue a job
    Enqueue {
        /// Job class (email, sms, cashback)
        class: JobClass,

        /// Payload as a JSON object
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Job ID; generated when omitted
        #[arg(long)]
        id: Option<String>,
    },

    /// Dead-letter queue operations
    Dlq {
        /// Dead-letter operation
        #[command(subcommand)]
        command: DlqCommand,
    },

    /// Requeue jobs whose worker lease has expired
    Reap,
}

/// Dead-letter queue operations
#[derive(Debug, Subcommand)]
pub enum DlqCommand {
    /// List dead-letter jobs
    List {
        /// Job class
        class: JobClass,

        /// Position of the first job to show
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Move one dead-letter job back to its queue
    Retry {
        /// Job class
        class: JobClass,

        /// Position in the dead-letter queue, as shown by `list`
        index: usize,
    },

    /// Move every dead-letter job back to its queue
    RetryAll {
        /// Job class
        class: JobClass,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Delete every dead-letter job
    Purge {
        /// Job class
        class: JobClass,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

fn confirm(prompt: &str) -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}

/// Parse a CLI payload argument into a job payload.
///
/// # Errors
///
/// Returns an error unless `raw` is a JSON object.
pub fn parse_payload(raw: &str) -> Result<Payload> {
    serde_json::from_str(raw).context("Payload must be a JSON object")
}

fn stats_row(label: &str, stats: ClassStats) -> String {
    format!(
        "  {:<10} {:>10} {:>12} {:>12}",
        label, stats.pending, stats.processing, stats.dead_letter
    )
}

/// Render queue counts as a table.
#[must_use]
pub fn render_stats(stats: &QueueStats) -> String {
    let mut out = vec![
        format!(
            "  {:<10} {:>10} {:>12} {:>12}",
            "Class", "Pending", "Processing", "Dead-letter"
        ),
        format!("  {}", "─".repeat(47)),
    ];
    for (class, class_stats) in &stats.classes {
        out.push(stats_row(class.as_str(), *class_stats));
    }
    out.push(format!("  {}", "─".repeat(47)));
    out.push(stats_row("total", stats.total));
    out.join("\n")
}

/// Render one dead-letter job as a list row.
#[must_use]
pub fn render_job_row(index: usize, job: &Job) -> String {
    let failed_at = job
        .failed_at
        .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M:%S").to_string());
    format!(
        "{:>5}  {:<22} {:>8}  {:<19}  {}",
        index,
        job.id,
        job.attempts,
        failed_at,
        job.error.as_deref().unwrap_or("-")
    )
}

impl JobsCommand {
    /// Execute the jobs command
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The store cannot be reached
    /// - The payload is not a JSON object
    /// - The class is not enabled in configuration
    pub async fn execute(&self, dispatch: &Dispatch) -> Result<()> {
        match self {
            Self::Stats => stats(dispatch).await,
            Self::Watch { interval } => watch(dispatch, *interval).await,
            Self::Enqueue { class, payload, id } => {
                enqueue(dispatch, *class, payload, id.as_deref()).await
            }
            Self::Dlq { command } => command.execute(dispatch).await,
            Self::Reap => reap(dispatch).await,
        }
    }
}

impl DlqCommand {
    /// Execute the dead-letter command
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or a dead-letter
    /// entry is not a job record.
    pub async fn execute(&self, dispatch: &Dispatch) -> Result<()> {
        let monitor = dispatch.monitor();
        match self {
            Self::List {
                class,
                offset,
                limit,
            } => {
                let jobs = monitor.list_dead_letter(*class, *offset, *limit).await?;
                println!("\n{} Dead-letter queue: {}", INFO, style(class).cyan());
                println!();
                println!(
                    "{:>5}  {:<22} {:>8}  {:<19}  {}",
                    "Index", "ID", "Attempts", "Failed at", "Error"
                );
                println!("{}", "─".repeat(80));
                if jobs.is_empty() {
                    println!("  {}", style("(No jobs to display)").dim());
                }
                for (i, job) in jobs.iter().enumerate() {
                    println!("{}", render_job_row(offset + i, job));
                }
                println!();
            }
            Self::Retry { class, index } => {
                if monitor.requeue_dead_letter(*class, *index).await? {
                    println!("{} Requeued dead-letter job {} of {}", SUCCESS, index, style(class).cyan());
                } else {
                    println!(
                        "{} No dead-letter job at index {} for {}",
                        WARN,
                        index,
                        style(class).cyan()
                    );
                }
            }
            Self::RetryAll { class, force } => {
                if !force && !confirm(&format!("Retry ALL dead-letter jobs for {class}?"))? {
                    println!("Cancelled.");
                    return Ok(());
                }
                let count = monitor.requeue_all_dead_letter(*class).await?;
                println!("{} Requeued {} {} job(s)", SUCCESS, style(count).green(), class);
            }
            Self::Purge { class, force } => {
                if !force
                    && !confirm(&format!(
                        "Permanently delete ALL dead-letter jobs for {class}? This cannot be undone"
                    ))?
                {
                    println!("Cancelled.");
                    return Ok(());
                }
                let count = monitor.purge_dead_letter(*class).await?;
                println!("{} Purged {} {} job(s)", SUCCESS, style(count).red(), class);
            }
        }
        Ok(())
    }
}

async fn stats(dispatch: &Dispatch) -> Result<()> {
    let stats = dispatch.monitor().stats().await?;
    println!("\n{} Queue Statistics", INFO);
    println!();
    println!("{}", render_stats(&stats));
    println!();
    Ok(())
}

async fn watch(dispatch: &Dispatch, interval: u64) -> Result<()> {
    let monitor = dispatch.monitor();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        let stats = monitor.stats().await?;

        print!("\x1B[2J\x1B[1;1H");
        std::io::stdout().flush()?;
        println!("{}", style("Job Queue Monitor").bold().cyan());
        println!("{}", "=".repeat(49));
        println!();
        println!("{}", render_stats(&stats));
        println!();
        println!(
            "{}",
            style(format!(
                "Last updated: {}  (Ctrl+C to stop)",
                chrono::Local::now().format("%H:%M:%S")
            ))
            .dim()
        );
    }
}

async fn enqueue(dispatch: &Dispatch, class: JobClass, payload: &str, id: Option<&str>) -> Result<()> {
    let payload = parse_payload(payload)?;
    let id = dispatch
        .producer()
        .enqueue(class, payload, id.map(JobId::from))
        .await
        .with_context(|| format!("Failed to enqueue {class} job"))?;
    println!("{} Enqueued {} job {}", SUCCESS, class, style(id).cyan());
    Ok(())
}

async fn reap(dispatch: &Dispatch) -> Result<()> {
    let monitor = dispatch.monitor();
    let mut total = 0;
    for &class in monitor.classes() {
        let count = monitor.reap_expired_leases(class).await?;
        if count > 0 {
            println!("  {:<10} {}", class.as_str(), style(count).yellow());
        }
        total += count;
    }
    println!("{} Requeued {} job(s) with expired leases", SUCCESS, total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use couponq::config::CouponqConfig;

    fn dispatch() -> Dispatch {
        Dispatch::in_memory(CouponqConfig::default())
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(r#"{"to":"a@b.com"}"#).unwrap()["to"], "a@b.com");
        assert!(parse_payload("[1,2]").is_err());
        assert!(parse_payload("not json").is_err());
    }

    #[test]
    fn test_render_stats_includes_totals() {
        let mut stats = QueueStats::default();
        let email = ClassStats {
            pending: 3,
            processing: 1,
            dead_letter: 2,
        };
        stats.classes.insert(JobClass::Email, email);
        stats.total = email;

        let table = render_stats(&stats);
        assert!(table.contains("email"));
        assert!(table.contains("total"));
        assert!(table.lines().any(|l| l.contains('3') && l.contains('2')));
    }

    #[tokio::test]
    async fn test_enqueue_then_stats() {
        let dispatch = dispatch();
        let cmd = JobsCommand::Enqueue {
            class: JobClass::Sms,
            payload: r#"{"mobile":"+910000000000"}"#.into(),
            id: Some("sms_cli".into()),
        };
        cmd.execute(&dispatch).await.unwrap();
        JobsCommand::Stats.execute(&dispatch).await.unwrap();

        let stats = dispatch.monitor().stats().await.unwrap();
        assert_eq!(stats.class(JobClass::Sms).pending, 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_payload() {
        let cmd = JobsCommand::Enqueue {
            class: JobClass::Email,
            payload: "42".into(),
            id: None,
        };
        assert!(cmd.execute(&dispatch()).await.is_err());
    }

    #[tokio::test]
    async fn test_forced_purge_and_retry_all_skip_prompt() {
        let dispatch = dispatch();
        let mut job = Job::new("email_1".into(), JobClass::Email, Payload::new());
        job.record_failure("boom");
        let dlq = dispatch.keys().dead_letter(JobClass::Email);
        for _ in 0..2 {
            dispatch.store().rpush(&dlq, &job.to_entry().unwrap()).await.unwrap();
        }

        DlqCommand::RetryAll {
            class: JobClass::Email,
            force: true,
        }
        .execute(&dispatch)
        .await
        .unwrap();
        assert_eq!(dispatch.monitor().stats().await.unwrap().class(JobClass::Email).pending, 2);

        dispatch.store().rpush(&dlq, &job.to_entry().unwrap()).await.unwrap();
        DlqCommand::Purge {
            class: JobClass::Email,
            force: true,
        }
        .execute(&dispatch)
        .await
        .unwrap();
        assert_eq!(dispatch.monitor().stats().await.unwrap().class(JobClass::Email).dead_letter, 0);
    }

    #[tokio::test]
    async fn test_retry_out_of_range_is_not_an_error() {
        DlqCommand::Retry {
            class: JobClass::Cashback,
            index: 5,
        }
        .execute(&dispatch())
        .await
        .unwrap();
    }
}
