//! CLI command handlers

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::config::{self, ConfigLoader, paths};
use crate::models::HelmRelease;

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Get configuration value
    Get {
        /// Configuration key (e.g., "controller.workers", "defaults.timeout")
        key: Option<String>,
    },
    /// List all configuration
    List,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

/// Handle configuration subcommands
pub fn handle_config_command(cmd: ConfigSubcommand) -> Result<()> {
    match cmd {
        ConfigSubcommand::Get { key: Some(key) } => {
            let config = ConfigLoader::load().context("Failed to load configuration")?;
            println!("{}", config::get_config_value(&config, &key)?);
        }
        ConfigSubcommand::Get { key: None } | ConfigSubcommand::List => {
            let config = ConfigLoader::load().context("Failed to load configuration")?;
            let yaml =
                serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
            print!("{}", yaml);
        }
        ConfigSubcommand::Path => {
            println!("{}", paths::config_path().display());
        }
        ConfigSubcommand::Validate => {
            ConfigLoader::validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// CRD manifest for HelmRelease as YAML
pub fn crd_yaml() -> Result<String> {
    use kube::CustomResourceExt;
    serde_yaml::to_string(&HelmRelease::crd()).context("Failed to serialize CRD")
}
