//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Shared primitives and utilities for the broker runtime."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "CAMPUS_LOG";
const DEFAULT_PREFIX: &str = "campus";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Available log formats for broker processes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialise tracing for one broker role (`campusd-primary`, `campusd-faculty`, ...).
///
/// The filter comes from `CAMPUS_LOG`, then `RUST_LOG`, then `config.level`.
/// Stdout always receives `config.format`; with `config.file` set, every role
/// also writes a daily rolling JSON file named after it, so the processes of one
/// deployment can share a log directory.
pub fn init_tracing(role: &str, config: &LoggingConfig) -> Result<()> {
    let filter = resolve_filter(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        &config.level,
    );

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(stdout_guard);
    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = if config.file {
        std::fs::create_dir_all(&config.directory)?;
        let appender = daily(&config.directory, log_file_name(config, role));
        let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(file_guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        role,
        log_dir = %config.directory.display(),
        format = ?config.format,
        file = config.file,
        "tracing initialised"
    );
    Ok(())
}

/// Base name of the rolling log file for `role`; the appender adds the date.
pub fn log_file_name(config: &LoggingConfig, role: &str) -> String {
    let prefix = config.file_prefix.as_deref().unwrap_or(DEFAULT_PREFIX);
    format!("{prefix}-{role}.log")
}

fn resolve_filter(campus: Option<String>, rust_log: Option<String>, level: &str) -> EnvFilter {
    for (source, directive) in [(LOG_ENV, campus), (EnvFilter::DEFAULT_ENV, rust_log)] {
        let Some(directive) = directive.filter(|d| !d.trim().is_empty()) else {
            continue;
        };
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("invalid {source} directive ({err}); ignoring it"),
        }
    }
    EnvFilter::try_new(level).unwrap_or_else(|err| {
        eprintln!("invalid logging.level {level:?} ({err}); defaulting to info");
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_carries_prefix_and_role() {
        let mut config = LoggingConfig::default();
        assert_eq!(log_file_name(&config, "campusd-standby"), "campus-campusd-standby.log");
        config.file_prefix = Some("east".into());
        assert_eq!(log_file_name(&config, "campusd-primary"), "east-campusd-primary.log");
    }

    #[test]
    fn campus_directive_wins_over_rust_log() {
        let filter = resolve_filter(Some("campus_client=trace".into()), Some("warn".into()), "info");
        assert_eq!(filter.to_string(), "campus_client=trace");
    }

    #[test]
    fn invalid_or_blank_directives_fall_through() {
        let filter = resolve_filter(Some("  ".into()), Some("campus_broker=loud".into()), "debug");
        assert_eq!(filter.to_string(), "debug");
        let filter = resolve_filter(None, None, "campus_broker=loud");
        assert_eq!(filter.to_string(), "info");
    }
}
