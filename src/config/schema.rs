//! Configuration schema definitions
//!
//! Defines the structure of configuration files using serde for serialization.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::ReleaseDefaults;
use crate::models::duration::parse_duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Namespace to watch; empty watches all namespaces
    #[serde(default)]
    pub watch_namespace: String,

    /// Helm binary used for mutations and chart pulls
    #[serde(default = "default_helm_binary")]
    pub helm_binary: PathBuf,

    /// Directory holding unpacked charts
    #[serde(default = "default_chart_cache_dir")]
    pub chart_cache_dir: PathBuf,

    #[serde(default)]
    pub controller: ControllerConfig,

    /// Fallbacks for optional HelmRelease fields
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Backoff for conflicting status writes
    #[serde(default)]
    pub status_retry: StatusRetryConfig,

    #[serde(default)]
    pub logger: LoggerConfig,
}

/// Controller loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Records reconciled concurrently
    #[serde(default = "default_workers")]
    pub workers: u16,

    /// Delay before a successfully reconciled record is probed for drift
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval: String,

    /// Delay before a failed pass is retried
    #[serde(default = "default_error_requeue_interval")]
    pub error_requeue_interval: String,

    /// Timeout for fetching ExternalURL values documents
    #[serde(default = "default_http_timeout")]
    pub http_timeout: String,
}

/// Release defaults, applied when a HelmRelease leaves a field unset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsConfig {
    #[serde(default = "default_timeout")]
    pub timeout: String,

    #[serde(default = "default_max_history")]
    pub max_history: u32,

    #[serde(default = "default_true")]
    pub wait: bool,
}

/// Conflict retry policy for status writes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusRetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub backoff_multiplier: f64,
}

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggerConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_helm_binary() -> PathBuf {
    PathBuf::from("helm")
}

fn default_chart_cache_dir() -> PathBuf {
    std::env::temp_dir().join("helmsync").join("charts")
}

fn default_workers() -> u16 {
    10
}

fn default_requeue_interval() -> String {
    "5m".to_string()
}

fn default_error_requeue_interval() -> String {
    "30s".to_string()
}

fn default_http_timeout() -> String {
    "30s".to_string()
}

fn default_timeout() -> String {
    "300s".to_string()
}

fn default_max_history() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_initial_delay_ms() -> u64 {
    10
}

fn default_retry_max_delay_ms() -> u64 {
    1000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_namespace: String::new(),
            helm_binary: default_helm_binary(),
            chart_cache_dir: default_chart_cache_dir(),
            controller: ControllerConfig::default(),
            defaults: DefaultsConfig::default(),
            status_retry: StatusRetryConfig::default(),
            logger: LoggerConfig::default(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            requeue_interval: default_requeue_interval(),
            error_requeue_interval: default_error_requeue_interval(),
            http_timeout: default_http_timeout(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_history: default_max_history(),
            wait: default_true(),
        }
    }
}

impl Default for StatusRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_retry_initial_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            backoff_multiplier: default_retry_multiplier(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    pub fn requeue_interval(&self) -> Result<Duration> {
        parse_duration(&self.requeue_interval)
            .with_context(|| format!("controller.requeueInterval {:?}", self.requeue_interval))
    }

    pub fn error_requeue_interval(&self) -> Result<Duration> {
        parse_duration(&self.error_requeue_interval).with_context(|| {
            format!(
                "controller.errorRequeueInterval {:?}",
                self.error_requeue_interval
            )
        })
    }

    pub fn http_timeout(&self) -> Result<Duration> {
        parse_duration(&self.http_timeout)
            .with_context(|| format!("controller.httpTimeout {:?}", self.http_timeout))
    }
}

impl DefaultsConfig {
    pub fn to_release_defaults(&self) -> Result<ReleaseDefaults> {
        let timeout = parse_duration(&self.timeout)
            .with_context(|| format!("defaults.timeout {:?}", self.timeout))?;
        Ok(ReleaseDefaults {
            timeout,
            max_history: self.max_history,
            wait: self.wait,
        })
    }
}

impl Config {
    /// Check values serde cannot: durations parse and counts are positive.
    pub fn validate(&self) -> Result<()> {
        self.controller.requeue_interval()?;
        self.controller.error_requeue_interval()?;
        self.controller.http_timeout()?;
        self.defaults.to_release_defaults()?;
        if self.controller.workers == 0 {
            anyhow::bail!("controller.workers must be greater than 0");
        }
        if self.status_retry.max_attempts == 0 {
            anyhow::bail!("statusRetry.maxAttempts must be greater than 0");
        }
        if self.status_retry.backoff_multiplier < 1.0 {
            anyhow::bail!("statusRetry.backoffMultiplier must be at least 1.0");
        }
        if self.helm_binary.as_os_str().is_empty() {
            anyhow::bail!("helmBinary must not be empty");
        }
        Ok(())
    }

    /// Namespace to watch, `None` for all namespaces.
    pub fn watch_namespace(&self) -> Option<&str> {
        Some(self.watch_namespace.as_str()).filter(|ns| !ns.is_empty())
    }
}
