//! Tracing subscriber setup
//!
//! Environment variables take precedence over [`LoggingConfig`]:
//! - `POLICY_LOG`: filter directive (`debug`, `policy_compiler=trace`, ...)
//! - `POLICY_LOG_JSON`: `1` for JSON lines, `0` for compact text

use crate::config::LoggingConfig;
use std::env;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Later calls are no-ops.
///
/// Writes to `config.file` when set (appending), stderr otherwise. A file
/// that cannot be opened falls back to stderr.
pub fn init_tracing(config: &LoggingConfig) {
    let json = env::var("POLICY_LOG_JSON")
        .ok()
        .map_or_else(|| config.format == "json", |v| v != "0");
    let level = env::var("POLICY_LOG").unwrap_or_else(|_| config.level.clone());

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let file = config.file.as_ref().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("Unable to open log file '{}': {e}", path.display()))
            .ok()
    });
    let (writer, guard) = match file {
        Some(f) => tracing_appender::non_blocking(f),
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    if TRACE_GUARD.set(guard).is_err() {
        return;
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_writer(writer);

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file: Some(dir.path().join("policy.log")),
            ..LoggingConfig::default()
        };
        init_tracing(&config);
        init_tracing(&config);
        tracing::info!(check = true, "logging_ready");
        assert!(dir.path().join("policy.log").exists());
    }
}
