//! HelmRelease record access for status writes

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};
use crate::models::HelmRelease;

/// Field manager recorded on status patches.
pub const FIELD_MANAGER: &str = "helmsync-controller";

/// Read and status-write access to HelmRelease records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<HelmRelease>;

    /// Write `hr.status`, guarded by `hr.metadata.resourceVersion`.
    ///
    /// A stale resource version fails with a conflict error. The spec is
    /// never written. Returns the record as stored.
    async fn write_status(&self, hr: &HelmRelease) -> Result<HelmRelease>;

    /// Set `metadata.finalizers`, guarded the same way as status writes.
    async fn write_finalizers(&self, hr: &HelmRelease, finalizers: Vec<String>)
    -> Result<HelmRelease>;
}

/// `StatusStore` against the cluster API.
#[derive(Clone)]
pub struct KubeStatusStore {
    client: Client,
}

impl KubeStatusStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusStore for KubeStatusStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<HelmRelease> {
        let api: Api<HelmRelease> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn write_status(&self, hr: &HelmRelease) -> Result<HelmRelease> {
        let namespace = hr
            .namespace()
            .ok_or_else(|| Error::internal("HelmRelease without namespace"))?;
        let api: Api<HelmRelease> = Api::namespaced(self.client.clone(), &namespace);

        // A merge patch carrying resourceVersion is rejected with 409 when stale.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": hr.resource_version() },
            "status": hr.status,
        });
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let updated = api
            .patch_status(&hr.name_any(), &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| match e {
                kube::Error::Api(resp) if resp.code == 409 => Error::conflict(resp.message),
                other => Error::Kube(other),
            })?;

        tracing::debug!(
            name = %hr.name_any(),
            namespace = %namespace,
            resource_version = ?updated.resource_version(),
            "Wrote HelmRelease status"
        );
        Ok(updated)
    }

    async fn write_finalizers(
        &self,
        hr: &HelmRelease,
        finalizers: Vec<String>,
    ) -> Result<HelmRelease> {
        let namespace = hr
            .namespace()
            .ok_or_else(|| Error::internal("HelmRelease without namespace"))?;
        let api: Api<HelmRelease> = Api::namespaced(self.client.clone(), &namespace);

        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": hr.resource_version(),
                "finalizers": finalizers,
            }
        });
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.patch(&hr.name_any(), &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| match e {
                kube::Error::Api(resp) if resp.code == 409 => Error::conflict(resp.message),
                other => Error::Kube(other),
            })
    }
}
