//! Logging initialization

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Pick the filter directive: `RUST_LOG` wins, then `--debug`, then the
/// configured level.
pub fn filter_directive(debug: bool, rust_log: Option<String>, level: &str) -> String {
    match rust_log.filter(|s| !s.trim().is_empty()) {
        Some(directive) => directive,
        None if debug => "debug".to_string(),
        None => level.to_string(),
    }
}

/// Initialize the global subscriber. Logs go to stderr, or to `log_file`
/// without ANSI codes when one is given.
pub fn init_logging(debug: bool, level: &str, log_file: Option<&Path>) -> Result<()> {
    let directive = filter_directive(debug, std::env::var("RUST_LOG").ok(), level);
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter {:?}", directive))?;

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_writer(Mutex::new(file))
                .with_env_filter(filter)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
    Ok(())
}
