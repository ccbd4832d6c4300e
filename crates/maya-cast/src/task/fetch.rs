//! Loading run-task specs from the cluster

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use maya_common::crd::{RunTask, RunTaskSpec};
use maya_common::kube_utils::LazyClient;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::EngineError;

/// Looks up run-task specs by namespace and name
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskSpecFetcher: Send + Sync {
    /// Fetch a run-task spec, failing with `RunTaskNotFound` when absent
    async fn fetch(&self, namespace: &str, name: &str) -> Result<RunTaskSpec, EngineError>;
}

/// Fetches `RunTask` resources, falling back to legacy ConfigMap run-tasks
pub struct KubeTaskSpecFetcher {
    client: Arc<LazyClient>,
}

impl KubeTaskSpecFetcher {
    /// Create a fetcher using the shared client
    pub fn new(client: Arc<LazyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskSpecFetcher for KubeTaskSpecFetcher {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<RunTaskSpec, EngineError> {
        let client = self.client.get().await?;

        let tasks: Api<RunTask> = Api::namespaced(client.clone(), namespace);
        if let Some(task) = tasks
            .get_opt(name)
            .await
            .map_err(maya_common::Error::from)?
        {
            return Ok(task.spec);
        }

        let config_maps: Api<ConfigMap> = Api::namespaced(client, namespace);
        match config_maps
            .get_opt(name)
            .await
            .map_err(maya_common::Error::from)?
        {
            Some(cm) => {
                debug!(task = %name, namespace = %namespace, "using legacy ConfigMap run-task");
                Ok(RunTaskSpec::from_legacy_data(&cm.data.unwrap_or_default())?)
            }
            None => Err(EngineError::RunTaskNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
        }
    }
}

/// Fetcher that remembers every spec it has returned
///
/// One upgrade run builds an engine per resource from the same template, so
/// each run-task is looked up once. Failures are not cached.
pub struct CachedTaskSpecFetcher {
    inner: Arc<dyn TaskSpecFetcher>,
    cache: Mutex<HashMap<(String, String), RunTaskSpec>>,
}

impl CachedTaskSpecFetcher {
    /// Wrap a fetcher
    pub fn new(inner: Arc<dyn TaskSpecFetcher>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &(String, String)) -> Option<RunTaskSpec> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl TaskSpecFetcher for CachedTaskSpecFetcher {
    async fn fetch(&self, namespace: &str, name: &str) -> Result<RunTaskSpec, EngineError> {
        let key = (namespace.to_string(), name.to_string());
        if let Some(spec) = self.cached(&key) {
            return Ok(spec);
        }
        let spec = self.inner.fetch(namespace, name).await?;
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, spec.clone());
        Ok(spec)
    }
}
