//! Configuration loading and merging logic
//!
//! Precedence, highest first: environment overrides, the config file,
//! built-in defaults. Fields missing from the file keep their defaults.

use std::path::Path;

use anyhow::{Context, Result};

use super::{paths, schema::Config};

/// Environment variables that override file settings.
pub const ENV_NAMESPACE: &str = "HELMSYNC_NAMESPACE";
pub const ENV_HELM_BINARY: &str = "HELMSYNC_HELM_BINARY";
pub const ENV_LOG_LEVEL: &str = "HELMSYNC_LOG_LEVEL";
pub const ENV_WORKERS: &str = "HELMSYNC_WORKERS";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with all layers merged
    pub fn load() -> Result<Config> {
        let path = paths::config_path();
        let config = if path.exists() {
            Self::load_file(&path)?
        } else {
            Self::load_defaults()
        };
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Load configuration from a file
    pub fn load_file(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load and check the merged configuration
    pub fn validate() -> Result<Config> {
        let config = Self::load().context("Failed to load configuration")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Load default configuration
    pub fn load_defaults() -> Config {
        Config::default()
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_overrides<F>(mut config: Config, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            config.watch_namespace = namespace;
        }

        if let Some(binary) = lookup(ENV_HELM_BINARY) {
            config.helm_binary = binary.into();
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            config.logger.level = level;
        }

        if let Some(workers) = lookup(ENV_WORKERS) {
            config.controller.workers = workers
                .parse()
                .with_context(|| format!("{} must be a number, got {:?}", ENV_WORKERS, workers))?;
        }

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(config: &Config, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            paths::ensure_dir(parent)?;
        }

        let yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration to YAML")?;

        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
