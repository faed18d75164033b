//! Tracing subscriber setup.
//!
//! Logs go to stderr and to a daily-rolling file. The filter comes from
//! `AION_LOG` and defaults to `info`.

use crate::tracing_layer::DiagnosticsLayer;
use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "AION_LOG";
const LOG_FILE_PREFIX: &str = "aion.log";

/// Filter from `AION_LOG`, falling back to `info`.
pub fn build_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_tracing(log_dir: &Path, diagnostics: Option<DiagnosticsLayer>) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(build_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(diagnostics)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!("[Logging] Writing logs to {}", log_dir.display());
    Ok(guard)
}
