// logging.rs — Logging setup using `tracing` + `tracing-subscriber`
//
// Priority for determining the log level:
// 1. `--log-level` CLI flag (if provided)
// 2. `-v` / `--verbose` (debug)
// 3. `STENCILOPT_LOG` environment variable (e.g. "info", "debug")
// 4. default to `warn`
//
// Events go to stderr so stdout stays clean for `--emit` output.

use anyhow::{anyhow, Result};
use tracing_subscriber::fmt;

pub const LOG_ENV_VAR: &str = "STENCILOPT_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>, verbose: bool) -> Result<()> {
    let level = resolve_level(cli_level, verbose, std::env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init()
        .map_err(|e| anyhow!("cannot install log subscriber: {e}"))
}

fn resolve_level(cli_level: Option<LogLevel>, verbose: bool, env: Option<&str>) -> tracing::Level {
    match (cli_level, verbose) {
        (Some(lvl), _) => level_from_log_level(lvl),
        (None, true) => tracing::Level::DEBUG,
        (None, false) => env
            .and_then(parse_level_str)
            .unwrap_or(tracing::Level::WARN),
    }
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn flag_beats_verbose_and_env() {
        assert_eq!(resolve_level(Some(LogLevel::Error), true, Some("trace")), Level::ERROR);
    }

    #[test]
    fn verbose_beats_env() {
        assert_eq!(resolve_level(None, true, Some("error")), Level::DEBUG);
    }

    #[test]
    fn env_then_default() {
        assert_eq!(resolve_level(None, false, Some(" Info ")), Level::INFO);
        assert_eq!(resolve_level(None, false, Some("loud")), Level::WARN);
        assert_eq!(resolve_level(None, false, None), Level::WARN);
    }
}
