//! Cluster access for UpgradeResult records

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ListParams, Patch, PostParams};
use kube::Api;
use maya_common::crd::{UpgradeResult, UpgradeResultStatus};
use maya_common::kube_utils::{merge_patch_params, LazyClient};

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Trait abstracting UpgradeResult API calls
///
/// Writes rely on the API server's resource version checks; a conflict
/// surfaces as an error and is not retried here.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UpgradeResultClient: Send + Sync {
    /// List records in a namespace matching a label selector
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<UpgradeResult>>;

    /// Get a record by name
    async fn get(&self, namespace: &str, name: &str) -> Result<UpgradeResult>;

    /// Create a record, honouring `metadata.generateName`
    async fn create(&self, namespace: &str, record: &UpgradeResult) -> Result<UpgradeResult>;

    /// Replace a record's metadata and spec
    async fn replace(&self, namespace: &str, record: &UpgradeResult) -> Result<UpgradeResult>;

    /// Overwrite a record's status
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &UpgradeResultStatus,
    ) -> Result<UpgradeResult>;
}

/// [`UpgradeResultClient`] backed by the `upgraderesults.openebs.io` CRD
pub struct KubeUpgradeResultClient {
    client: Arc<LazyClient>,
}

impl KubeUpgradeResultClient {
    /// Create a client sharing the given handle
    pub fn new(client: Arc<LazyClient>) -> Self {
        Self { client }
    }

    async fn api(&self, namespace: &str) -> Result<Api<UpgradeResult>> {
        Ok(Api::namespaced(self.client.get().await?, namespace))
    }
}

#[async_trait]
impl UpgradeResultClient for KubeUpgradeResultClient {
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<UpgradeResult>> {
        let list = self
            .api(namespace)
            .await?
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(maya_common::Error::from)?;
        Ok(list.items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<UpgradeResult> {
        self.api(namespace)
            .await?
            .get_opt(name)
            .await
            .map_err(maya_common::Error::from)?
            .ok_or_else(|| maya_common::Error::not_found("UpgradeResult", name).into())
    }

    async fn create(&self, namespace: &str, record: &UpgradeResult) -> Result<UpgradeResult> {
        let created = self
            .api(namespace)
            .await?
            .create(&PostParams::default(), record)
            .await
            .map_err(maya_common::Error::from)?;
        Ok(created)
    }

    async fn replace(&self, namespace: &str, record: &UpgradeResult) -> Result<UpgradeResult> {
        let name = record.metadata.name.clone().unwrap_or_default();
        let replaced = self
            .api(namespace)
            .await?
            .replace(&name, &PostParams::default(), record)
            .await
            .map_err(maya_common::Error::from)?;
        Ok(replaced)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &UpgradeResultStatus,
    ) -> Result<UpgradeResult> {
        let patch = serde_json::json!({ "status": status });
        let patched = self
            .api(namespace)
            .await?
            .patch_status(name, &merge_patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(maya_common::Error::from)?;
        Ok(patched)
    }
}
