//! CLI command handling module
//!
//! Handles all CLI subcommands and argument parsing.

mod commands;
mod logging;

pub use commands::{ConfigSubcommand, crd_yaml, handle_config_command};
pub use logging::{filter_directive, init_logging};
