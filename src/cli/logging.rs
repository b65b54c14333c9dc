//! Log subscriber setup for the binary.
//!
//! Events go to stderr so the JSON printed by commands on stdout stays
//! machine-readable.

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Chooses the filter directives. A non-empty `RUST_LOG` wins over the
/// `--log-level` flag.
pub fn filter_directives(rust_log: Option<String>, cli_level: &str) -> String {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| cli_level.to_string())
}

/// Builds the filter for the given directives.
pub fn build_filter(directives: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .with_context(|| format!("invalid log filter '{}'", directives))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails on an unparsable filter or when a subscriber is already set.
pub fn init_logging(cli_level: &str) -> anyhow::Result<()> {
    let directives = filter_directives(std::env::var("RUST_LOG").ok(), cli_level);
    let filter = build_filter(&directives)?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_cli_level() {
        let directives = filter_directives(Some("taskpool=trace".to_string()), "info");
        assert_eq!(directives, "taskpool=trace");
    }

    #[test]
    fn test_cli_level_used_without_rust_log() {
        assert_eq!(filter_directives(None, "debug"), "debug");
        assert_eq!(filter_directives(Some("  ".to_string()), "warn"), "warn");
    }

    #[test]
    fn test_build_filter_accepts_levels_and_targets() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("taskpool::scheduler=debug,warn").is_ok());
    }
}
