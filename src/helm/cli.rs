//! `ReleaseClient` backed by the `helm` binary
//!
//! Reads go straight to Helm's storage Secrets; mutations shell out to
//! `helm` so that chart rendering, hooks and `--wait` behave exactly as they
//! do for a human operator.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::storage::{SecretStorage, parse_release_json};
use super::{
    GetOptions, HistoryOptions, Release, ReleaseClient, RollbackOptions, TestOptions,
    UninstallOptions, UpgradeOptions,
};
use crate::error::{Error, Result};
use crate::models::Values;
use crate::models::duration::format_duration;

pub struct HelmCli {
    binary: PathBuf,
    storage: SecretStorage,
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>, storage: SecretStorage) -> Self {
        Self {
            binary: binary.into(),
            storage,
        }
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>> {
        debug!(binary = %self.binary.display(), args = ?args, "Running helm");
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::helm(format!("failed to run {}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let verb = args.first().map(String::as_str).unwrap_or("command");
            return Err(Error::helm(format!("helm {} failed: {}", verb, stderr.trim())));
        }
        Ok(output.stdout)
    }
}

/// Arguments for `helm upgrade`, minus the values file.
pub fn upgrade_args(chart_path: &Path, name: &str, opts: &UpgradeOptions) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        name.to_string(),
        chart_path.display().to_string(),
        "--namespace".to_string(),
        opts.namespace.clone(),
        "--output".to_string(),
        "json".to_string(),
        "--timeout".to_string(),
        format_duration(opts.timeout),
    ];
    if opts.install {
        args.push("--install".to_string());
        args.push("--create-namespace".to_string());
    }
    if opts.dry_run {
        args.push("--dry-run".to_string());
    }
    if opts.force {
        args.push("--force".to_string());
    }
    if opts.reset_values {
        args.push("--reset-values".to_string());
    } else if opts.reuse_values {
        args.push("--reuse-values".to_string());
    }
    if opts.skip_crds {
        args.push("--skip-crds".to_string());
    }
    if opts.max_history > 0 {
        args.push("--history-max".to_string());
        args.push(opts.max_history.to_string());
    }
    if opts.wait {
        args.push("--wait".to_string());
    }
    args
}

pub fn rollback_args(name: &str, opts: &RollbackOptions) -> Vec<String> {
    let mut args = vec![
        "rollback".to_string(),
        name.to_string(),
        "--namespace".to_string(),
        opts.namespace.clone(),
        "--timeout".to_string(),
        format_duration(opts.timeout),
    ];
    if opts.wait {
        args.push("--wait".to_string());
    }
    if opts.disable_hooks {
        args.push("--no-hooks".to_string());
    }
    if opts.recreate {
        args.push("--recreate-pods".to_string());
    }
    if opts.force {
        args.push("--force".to_string());
    }
    args
}

pub fn test_args(name: &str, opts: &TestOptions) -> Vec<String> {
    let mut args = vec![
        "test".to_string(),
        name.to_string(),
        "--namespace".to_string(),
        opts.namespace.clone(),
        "--timeout".to_string(),
        format_duration(opts.timeout),
    ];
    if !opts.cleanup {
        args.push("--logs".to_string());
    }
    args
}

#[async_trait]
impl ReleaseClient for HelmCli {
    async fn get(&self, name: &str, opts: &GetOptions) -> Result<Option<Release>> {
        let releases = self.storage.list(name, &opts.namespace).await?;
        let found = if opts.version == 0 {
            releases.into_iter().next()
        } else {
            releases.into_iter().find(|r| r.version == opts.version)
        };
        Ok(found)
    }

    async fn history(&self, name: &str, opts: &HistoryOptions) -> Result<Vec<Release>> {
        let mut releases = self.storage.list(name, &opts.namespace).await?;
        if opts.max > 0 {
            releases.truncate(opts.max as usize);
        }
        Ok(releases)
    }

    async fn upgrade(
        &self,
        chart_path: &Path,
        name: &str,
        values: &Values,
        opts: &UpgradeOptions,
    ) -> Result<Release> {
        let mut values_file = tempfile::Builder::new()
            .prefix("helmsync-values-")
            .suffix(".yaml")
            .tempfile()?;
        values_file.write_all(values.to_yaml_string()?.as_bytes())?;
        values_file.flush()?;

        let mut args = upgrade_args(chart_path, name, opts);
        args.push("--values".to_string());
        args.push(values_file.path().display().to_string());

        let stdout = self.run(&args).await?;
        let release = parse_release_json(&stdout)?;
        if !opts.dry_run {
            info!(
                release = name,
                namespace = %opts.namespace,
                revision = release.version,
                "Helm upgrade applied"
            );
        }
        Ok(release)
    }

    async fn test(&self, name: &str, opts: &TestOptions) -> Result<()> {
        self.run(&test_args(name, opts)).await.map(|_| ())
    }

    async fn rollback(&self, name: &str, opts: &RollbackOptions) -> Result<Release> {
        self.run(&rollback_args(name, opts)).await?;
        let get = GetOptions {
            namespace: opts.namespace.clone(),
            version: 0,
        };
        self.get(name, &get)
            .await?
            .ok_or_else(|| Error::not_found(format!("release {} after rollback", name)))
    }

    async fn uninstall(&self, name: &str, opts: &UninstallOptions) -> Result<()> {
        let mut args = vec![
            "uninstall".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            opts.namespace.clone(),
            "--timeout".to_string(),
            format_duration(opts.timeout),
        ];
        if opts.keep_history {
            args.push("--keep-history".to_string());
        }
        self.run(&args).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_upgrade_args_for_first_install() {
        let opts = UpgradeOptions {
            namespace: "apps".to_string(),
            install: true,
            skip_crds: true,
            max_history: 10,
            wait: true,
            timeout: Duration::from_secs(300),
            ..Default::default()
        };
        let args = upgrade_args(Path::new("/cache/nginx"), "apps-web", &opts);
        assert_eq!(
            args,
            [
                "upgrade",
                "apps-web",
                "/cache/nginx",
                "--namespace",
                "apps",
                "--output",
                "json",
                "--timeout",
                "300s",
                "--install",
                "--create-namespace",
                "--skip-crds",
                "--history-max",
                "10",
                "--wait",
            ]
        );
    }

    #[test]
    fn test_upgrade_args_reset_wins_over_reuse() {
        let opts = UpgradeOptions {
            namespace: "apps".to_string(),
            dry_run: true,
            reuse_values: true,
            reset_values: true,
            ..Default::default()
        };
        let args = upgrade_args(Path::new("chart"), "web", &opts);
        assert!(args.contains(&"--dry-run".to_string()));
        assert!(args.contains(&"--reset-values".to_string()));
        assert!(!args.contains(&"--reuse-values".to_string()));
        assert!(!args.contains(&"--install".to_string()));
    }

    #[test]
    fn test_test_args_collect_logs_only_without_cleanup() {
        let mut opts = TestOptions {
            namespace: "apps".to_string(),
            timeout: Duration::from_secs(120),
            cleanup: true,
        };
        assert_eq!(
            test_args("apps-web", &opts),
            ["test", "apps-web", "--namespace", "apps", "--timeout", "120s"]
        );

        opts.cleanup = false;
        assert_eq!(test_args("apps-web", &opts).last().map(String::as_str), Some("--logs"));
    }

    #[test]
    fn test_rollback_args() {
        let opts = RollbackOptions {
            namespace: "apps".to_string(),
            timeout: Duration::from_secs(60),
            wait: true,
            disable_hooks: true,
            recreate: false,
            force: true,
        };
        assert_eq!(
            rollback_args("web", &opts),
            [
                "rollback",
                "web",
                "--namespace",
                "apps",
                "--timeout",
                "60s",
                "--wait",
                "--no-hooks",
                "--force",
            ]
        );
    }
}
