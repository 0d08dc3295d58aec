//! Tracing subscriber setup
//!
//! Events go to a rolling file through a non-blocking writer. Text mode also
//! mirrors to stdout; JSON mode writes the file only and carries the current
//! span. `RUST_LOG`, when set and valid, replaces the configured filter.

use std::fs;

use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{AppConfig, LogRotation};

/// Install the global subscriber. The returned guard flushes buffered file
/// output on drop and must live as long as the process.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<WorkerGuard> {
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log dir {}", config.log_dir))?;
    let filter = build_filter(&config.log_level)?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender(config));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .with(fmt::layer().with_target(false))
            .try_init()
    };
    installed.context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn file_appender(config: &AppConfig) -> RollingFileAppender {
    let (dir, file) = (&config.log_dir, &config.log_file);
    match config.rotation {
        LogRotation::Never => rolling::never(dir, file),
        LogRotation::Hourly => rolling::hourly(dir, file),
        LogRotation::Daily => rolling::daily(dir, file),
    }
}

fn build_filter(log_level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level: LevelFilter = log_level
        .trim()
        .parse()
        .with_context(|| format!("Invalid log_level: {}", log_level))?;
    Ok(EnvFilter::new(filter_directives(level)))
}

/// `level` for this crate; dependencies (sqlx logs every statement at info)
/// never go above warn
fn filter_directives(level: LevelFilter) -> String {
    let deps = level.min(LevelFilter::WARN);
    format!(
        "{},{}={}",
        deps.to_string().to_lowercase(),
        env!("CARGO_CRATE_NAME"),
        level.to_string().to_lowercase()
    )
}
