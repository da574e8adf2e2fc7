//! Chart fetching
//!
//! Charts are pulled with `helm pull --untar` into a local cache, one
//! directory per repository, chart and version. A cached chart is reused
//! as long as its `Chart.yaml` is present.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::{Client, ResourceExt};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{ChartState, HelmRelease};

/// Produces an unpacked chart for a HelmRelease.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn fetch(&self, hr: &HelmRelease) -> Result<ChartState>;
}

/// A chart counts as changed until its version has been attempted.
pub fn chart_changed(hr: &HelmRelease, revision: &str) -> bool {
    hr.status
        .as_ref()
        .and_then(|s| s.last_attempted_revision.as_deref())
        != Some(revision)
}

pub struct HelmPullChartSource {
    binary: PathBuf,
    cache_dir: PathBuf,
    client: Client,
}

impl HelmPullChartSource {
    pub fn new(binary: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            binary: binary.into(),
            cache_dir: cache_dir.into(),
            client,
        }
    }

    async fn credentials(&self, hr: &HelmRelease) -> Result<Option<(String, String)>> {
        let Some(secret_ref) = &hr.spec.chart.secret_ref else {
            return Ok(None);
        };
        let namespace = hr.namespace().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        let secret = api.get_opt(&secret_ref.name).await?.ok_or_else(|| {
            Error::chart(format!(
                "repository credentials Secret {}/{} not found",
                namespace, secret_ref.name
            ))
        })?;

        let data = secret.data.unwrap_or_default();
        let field = |key: &str| -> Result<String> {
            let bytes = data.get(key).ok_or_else(|| {
                Error::chart(format!("Secret {} has no {} key", secret_ref.name, key))
            })?;
            String::from_utf8(bytes.0.clone())
                .map_err(|_| Error::chart(format!("Secret {} key {} is not UTF-8", secret_ref.name, key)))
        };
        Ok(Some((field("username")?, field("password")?)))
    }

    async fn pull(&self, hr: &HelmRelease, target: &Path) -> Result<()> {
        let chart = &hr.spec.chart;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let staging = tempfile::tempdir_in(&self.cache_dir)?;

        let mut args = vec![
            "pull".to_string(),
            chart.name.clone(),
            "--repo".to_string(),
            chart.repository.clone(),
            "--version".to_string(),
            chart.version.clone(),
            "--untar".to_string(),
            "--untardir".to_string(),
            staging.path().display().to_string(),
        ];
        if let Some((username, password)) = self.credentials(hr).await? {
            args.extend(["--username".to_string(), username, "--password".to_string(), password]);
        }

        debug!(chart = %chart.name, version = %chart.version, repo = %chart.repository, "Pulling chart");
        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::chart(format!("failed to run {}: {}", self.binary.display(), e)))?;
        if !output.status.success() {
            return Err(Error::chart(format!(
                "helm pull {} {} failed: {}",
                chart.name,
                chart.version,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Another pass may have won the race; its copy is as good as ours.
        if let Err(e) = tokio::fs::rename(staging.path().join(&chart.name), target).await {
            if !target.join("Chart.yaml").exists() {
                return Err(Error::Io(e));
            }
        }
        info!(chart = %chart.name, version = %chart.version, "Chart fetched");
        Ok(())
    }
}

/// Cache directory for one chart version.
pub fn cache_path(cache_dir: &Path, repository: &str, name: &str, version: &str) -> PathBuf {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect()
    };
    cache_dir
        .join(sanitize(repository))
        .join(format!("{}-{}", sanitize(name), sanitize(version)))
}

#[async_trait]
impl ChartSource for HelmPullChartSource {
    async fn fetch(&self, hr: &HelmRelease) -> Result<ChartState> {
        let chart = &hr.spec.chart;
        let path = cache_path(&self.cache_dir, &chart.repository, &chart.name, &chart.version);
        if !path.join("Chart.yaml").exists() {
            self.pull(hr, &path).await?;
        } else {
            debug!(path = %path.display(), "Using cached chart");
        }

        Ok(ChartState {
            chart_path: path,
            revision: chart.version.clone(),
            changed: chart_changed(hr, &chart.version),
        })
    }
}
