use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::models::LoggingSettings;

/// Install the global subscriber.
///
/// The file layer writes daily-rotated logs under `log_dir`; the console layer
/// writes to stderr so command output on stdout stays clean. Either may be
/// disabled in settings.
///
/// # Returns
/// The file writer's guard when file logging is on. Hold it until exit or
/// buffered lines are lost.
pub fn setup_logging(settings: &LoggingSettings, log_dir: &Utf8Path) -> Result<Option<WorkerGuard>> {
    let env_filter = build_filter(&settings.level)?;

    let (file_layer, guard) = if settings.file {
        if !log_dir.exists() {
            fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
        }

        let file_appender = rolling::daily(log_dir, &settings.prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = settings.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logging was already initialized")?;

    tracing::info!(
        "Logging initialized: level={}, console={}, file={}, dir={}",
        settings.level,
        settings.console,
        settings.file,
        log_dir
    );

    Ok(guard)
}

/// `RUST_LOG` wins over the configured level when set.
fn build_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {}", level))
}
