//! Logging setup
//!
//! Installs a `tracing` subscriber with an `EnvFilter`. `RUST_LOG` wins when
//! set; otherwise the configured level is used.

use crate::config::{LogFormat, LoggingSettings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Resolve `Auto` to a concrete format for this build.
#[must_use]
pub const fn effective_format(format: LogFormat) -> LogFormat {
    match format {
        LogFormat::Auto if cfg!(debug_assertions) => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Json,
        other => other,
    }
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging from settings.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
///
/// # Example
///
/// ```rust,no_run
/// use couponq::config::LoggingSettings;
/// use couponq::observability;
///
/// # fn main() -> anyhow::Result<()> {
/// observability::init(&LoggingSettings::default())?;
/// tracing::info!("Worker starting");
/// # Ok(())
/// # }
/// ```
pub fn init(settings: &LoggingSettings) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(filter(&settings.level));

    match effective_format(settings.format) {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()?,
        LogFormat::Pretty | LogFormat::Auto => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?,
    }

    Ok(())
}
