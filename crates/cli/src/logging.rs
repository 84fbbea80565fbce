//! Console and per-subject file logging

use anyhow::{Context as _, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const SUBJECT_LOG_FILE: &str = "seg_hipp.log";

/// Install the global subscriber
///
/// `RUST_LOG` overrides the level chosen by `verbose`. With a `log_dir`
/// every event is also appended to `<log_dir>/seg_hipp.log`; keep the
/// returned guard alive until exit so the file is flushed.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
    };

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(filter());

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, SUBJECT_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to set tracing subscriber")?;
    Ok(guard)
}
