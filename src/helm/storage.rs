//! Helm storage Secrets
//!
//! Helm 3 stores every revision of a release in a Secret named
//! `sh.helm.release.v1.<name>.v<version>`, labelled `owner=helm,name=<name>`.
//! The `release` key holds base64 text of an (optionally gzipped) JSON record.

use std::io::Read;

use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube::api::{Api, ListParams};
use serde::Deserialize;

use super::{Release, ReleaseStatus};
use crate::error::{Error, Result};
use crate::models::Values;

#[derive(Debug, Deserialize)]
struct StoredRelease {
    name: String,
    #[serde(default)]
    namespace: String,
    version: u64,
    #[serde(default)]
    info: Option<StoredInfo>,
    #[serde(default)]
    chart: Option<StoredChart>,
    #[serde(default)]
    config: Option<serde_json::Value>,
    #[serde(default)]
    manifest: String,
}

#[derive(Debug, Deserialize)]
struct StoredInfo {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct StoredChart {
    metadata: StoredChartMetadata,
}

#[derive(Debug, Deserialize)]
struct StoredChartMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

/// Parse a release record as Helm writes it (storage) or prints it (`-o json`).
pub fn parse_release_json(bytes: &[u8]) -> Result<Release> {
    let stored: StoredRelease = serde_json::from_slice(bytes)
        .map_err(|e| Error::helm(format!("failed to parse release JSON: {}", e)))?;

    let (chart_name, chart_version) = stored
        .chart
        .map(|c| (c.metadata.name, c.metadata.version))
        .unwrap_or_default();

    Ok(Release {
        name: stored.name,
        namespace: stored.namespace,
        version: stored.version,
        status: stored
            .info
            .map(|i| ReleaseStatus::from(i.status.as_str()))
            .unwrap_or(ReleaseStatus::Unknown),
        chart_name,
        chart_version,
        manifest: stored.manifest,
        config: stored
            .config
            .filter(|c| !c.is_null())
            .map(Values::from)
            .unwrap_or_else(Values::empty_map),
    })
}

/// Decode the `release` payload of a Helm storage Secret.
pub fn decode_release(payload: &[u8]) -> Result<Release> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| Error::helm(format!("failed to decode base64 release data: {}", e)))?;

    // Gzip magic bytes (0x1f, 0x8b, 0x08)
    let is_gzipped =
        decoded.len() >= 3 && decoded[0] == 0x1f && decoded[1] == 0x8b && decoded[2] == 0x08;

    let decompressed = if is_gzipped {
        let mut decoder = flate2::read::GzDecoder::new(&decoded[..]);
        let mut buf = Vec::new();
        decoder
            .read_to_end(&mut buf)
            .map_err(|e| Error::helm(format!("failed to decompress release data: {}", e)))?;
        buf
    } else {
        decoded
    };

    parse_release_json(&decompressed)
}

/// Read-only view of the Helm storage Secrets in a cluster.
#[derive(Clone)]
pub struct SecretStorage {
    client: Client,
}

impl SecretStorage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// All stored revisions of `name` in `namespace`, newest first.
    pub async fn list(&self, name: &str, namespace: &str) -> Result<Vec<Release>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&format!("owner=helm,name={}", name));
        let secrets = api.list(&lp).await?;

        let mut releases = Vec::with_capacity(secrets.items.len());
        for secret in secrets.items {
            let Some(payload) = secret.data.as_ref().and_then(|d| d.get("release")) else {
                tracing::debug!(
                    secret = secret.metadata.name.as_deref().unwrap_or_default(),
                    "Skipping Helm storage Secret without release key"
                );
                continue;
            };
            releases.push(decode_release(&payload.0)?);
        }

        releases.sort_by(|a, b| b.version.cmp(&a.version));
        tracing::debug!(
            release = name,
            namespace = namespace,
            revisions = releases.len(),
            "Loaded release history from storage"
        );
        Ok(releases)
    }
}
