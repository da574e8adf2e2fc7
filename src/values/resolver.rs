//! Backends for values sources

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::Client;
use kube::api::Api;
use reqwest::StatusCode;

use crate::error::{Error, Result};

/// Lookups behind `valuesFrom` entries.
///
/// Every method returns `Ok(None)` when the source does not exist and an
/// error for any other failure.
#[async_trait]
pub trait ValuesResolver: Send + Sync {
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;

    /// Secret data, decoded as UTF-8 text.
    async fn secret(&self, namespace: &str, name: &str)
    -> Result<Option<BTreeMap<String, String>>>;

    async fn fetch_url(&self, url: &str) -> Result<Option<String>>;

    /// Read `file` relative to the unpacked chart at `chart_path`.
    async fn read_chart_file(&self, chart_path: &Path, file: &str) -> Result<Option<String>>;
}

/// Resolver backed by the cluster API, plain HTTP(S) and the local disk.
pub struct KubeValuesResolver {
    client: Client,
    http: reqwest::Client,
}

impl KubeValuesResolver {
    pub fn new(client: Client, http_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| Error::http(format!("failed to create HTTP client: {}", e)))?;
        tracing::debug!(timeout = ?http_timeout, "Created values resolver");
        Ok(Self { client, http })
    }
}

#[async_trait]
impl ValuesResolver for KubeValuesResolver {
    async fn config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let Some(cm) = api.get_opt(name).await? else {
            return Ok(None);
        };
        Ok(Some(cm.data.unwrap_or_default()))
    }

    async fn secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(name).await? else {
            return Ok(None);
        };

        let mut data = BTreeMap::new();
        for (key, bytes) in secret.data.unwrap_or_default() {
            let text = String::from_utf8(bytes.0).map_err(|_| {
                Error::values(format!(
                    "key {} of Secret {}/{} is not valid UTF-8",
                    key, namespace, name
                ))
            })?;
            data.insert(key, text);
        }
        Ok(Some(data))
    }

    async fn fetch_url(&self, url: &str) -> Result<Option<String>> {
        tracing::debug!(url = url, "Fetching values");
        let resp = self.http.get(url).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(Some(resp.text().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(Error::http(format!(
                "unexpected status {} fetching {}",
                status, url
            ))),
        }
    }

    async fn read_chart_file(&self, chart_path: &Path, file: &str) -> Result<Option<String>> {
        let relative = Path::new(file);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::values(format!(
                "chart file {:?} must be a relative path inside the chart",
                file
            )));
        }

        let path = chart_path.join(relative);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
