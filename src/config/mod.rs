//! Configuration system for helmsync
//!
//! A single YAML file layered over built-in defaults, with environment
//! overrides on top. See [`loader`] for precedence.

pub mod loader;
pub mod paths;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{Config, ControllerConfig, DefaultsConfig, LoggerConfig, StatusRetryConfig};

/// Configuration keys accepted by [`get_config_value`], in display order.
pub const CONFIG_KEYS: &[&str] = &[
    "watchNamespace",
    "helmBinary",
    "chartCacheDir",
    "controller.workers",
    "controller.requeueInterval",
    "controller.errorRequeueInterval",
    "controller.httpTimeout",
    "defaults.timeout",
    "defaults.maxHistory",
    "defaults.wait",
    "statusRetry.maxAttempts",
    "statusRetry.initialDelayMs",
    "statusRetry.maxDelayMs",
    "statusRetry.backoffMultiplier",
    "logger.level",
];

/// Get a configuration value by key (dot notation)
pub fn get_config_value(config: &Config, key: &str) -> anyhow::Result<String> {
    match key {
        "watchNamespace" => Ok(config.watch_namespace.clone()),
        "helmBinary" => Ok(config.helm_binary.display().to_string()),
        "chartCacheDir" => Ok(config.chart_cache_dir.display().to_string()),
        "controller.workers" => Ok(config.controller.workers.to_string()),
        "controller.requeueInterval" => Ok(config.controller.requeue_interval.clone()),
        "controller.errorRequeueInterval" => Ok(config.controller.error_requeue_interval.clone()),
        "controller.httpTimeout" => Ok(config.controller.http_timeout.clone()),
        "defaults.timeout" => Ok(config.defaults.timeout.clone()),
        "defaults.maxHistory" => Ok(config.defaults.max_history.to_string()),
        "defaults.wait" => Ok(config.defaults.wait.to_string()),
        "statusRetry.maxAttempts" => Ok(config.status_retry.max_attempts.to_string()),
        "statusRetry.initialDelayMs" => Ok(config.status_retry.initial_delay_ms.to_string()),
        "statusRetry.maxDelayMs" => Ok(config.status_retry.max_delay_ms.to_string()),
        "statusRetry.backoffMultiplier" => Ok(config.status_retry.backoff_multiplier.to_string()),
        "logger.level" => Ok(config.logger.level.clone()),
        _ => Err(anyhow::anyhow!("Unknown configuration key: {}", key)),
    }
}
