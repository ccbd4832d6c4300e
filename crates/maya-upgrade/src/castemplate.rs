//! CAS template lookup

use std::sync::Arc;

use async_trait::async_trait;
use kube::Api;
use maya_common::crd::CasTemplate;
use maya_common::kube_utils::LazyClient;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Result, UpgradeError};

/// Read access to the cluster-wide CAS template catalog
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CasTemplateStore: Send + Sync {
    /// Fetch a template by name
    ///
    /// Blank names are rejected without a cluster call. A missing template
    /// is `TemplateNotFound`; other failures propagate without retry.
    async fn get(&self, name: &str) -> Result<CasTemplate>;
}

/// [`CasTemplateStore`] backed by the `castemplates.openebs.io` CRD
pub struct KubeCasTemplateStore {
    client: Arc<LazyClient>,
}

impl KubeCasTemplateStore {
    /// Create a store sharing the given client handle
    pub fn new(client: Arc<LazyClient>) -> Self {
        Self { client }
    }
}

/// Reject blank template names
pub fn check_template_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(maya_common::Error::validation_for_field(
            "casTemplate",
            "cas template name must not be empty",
        )
        .into());
    }
    Ok(name)
}

#[async_trait]
impl CasTemplateStore for KubeCasTemplateStore {
    async fn get(&self, name: &str) -> Result<CasTemplate> {
        let name = check_template_name(name)?;
        let api: Api<CasTemplate> = Api::all(self.client.get().await?);
        let template = api
            .get_opt(name)
            .await
            .map_err(maya_common::Error::from)?
            .ok_or_else(|| UpgradeError::TemplateNotFound {
                name: name.to_string(),
            })?;
        debug!(template = %name, tasks = template.run_tasks().len(), "fetched cas template");
        Ok(template)
    }
}
