//! Drives the CAST engine over every resource of an upgrade config
//!
//! Resources are upgraded one at a time in declared order. The CAS template,
//! the run-task specs and the owning job are resolved once per run. Under
//! the default policy the first failure stops the run; with
//! `continue_on_error` the remaining resources are still attempted, except
//! after an ambiguous record or a cancellation, which always stop.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Api;
use maya_cast::{
    CachedTaskSpecFetcher, EngineBuilder, KubeTaskExecutor, KubeTaskSpecFetcher, TaskExecutor,
    TaskSpecFetcher,
};
use maya_common::crd::{CasTemplate, ResourceRef};
use maya_common::kube_utils::LazyClient;
use maya_common::retry::{retry_when, RetryConfig};
use maya_common::ErrorKind;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[cfg(test)]
use mockall::automock;

use crate::castemplate::{CasTemplateStore, KubeCasTemplateStore};
use crate::config::UpgradeConfig;
use crate::result::{
    GetOrCreateRequest, KubeUpgradeResultClient, UpgradeResultClient, UpgradeResultRecorder,
    UpgradeResultRegistry,
};
use crate::{Result, UpgradeError};

/// Environment variable naming the pod running the upgrade
pub const POD_NAME_ENV: &str = "POD_NAME";

/// Environment variable naming the namespace of that pod
pub const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";

/// The pod running this upgrade
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodIdentity {
    /// Pod name
    pub name: String,
    /// Pod namespace, also where UpgradeResults are written
    pub namespace: String,
}

impl PodIdentity {
    /// Build from optional values, reporting every missing one
    pub fn new(name: Option<String>, namespace: Option<String>) -> Result<Self> {
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let namespace = namespace
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        match (name, namespace) {
            (Some(name), Some(namespace)) => Ok(Self { name, namespace }),
            (name, namespace) => {
                let missing: Vec<&str> = [
                    name.is_none().then_some(POD_NAME_ENV),
                    namespace.is_none().then_some(POD_NAMESPACE_ENV),
                ]
                .into_iter()
                .flatten()
                .collect();
                Err(UpgradeError::pod_identity(format!(
                    "missing {}",
                    missing.join(" and ")
                )))
            }
        }
    }
}

impl std::fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reads owner references of pods
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Owner references of the pod
    async fn owner_references(&self, namespace: &str, name: &str) -> Result<Vec<OwnerReference>>;
}

/// [`PodClient`] talking to the API server
pub struct KubePodClient {
    client: Arc<LazyClient>,
}

impl KubePodClient {
    /// Create a pod client sharing the given handle
    pub fn new(client: Arc<LazyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn owner_references(&self, namespace: &str, name: &str) -> Result<Vec<OwnerReference>> {
        let pods: Api<Pod> = Api::namespaced(self.client.get().await?, namespace);
        let pod = retry_when(
            &RetryConfig::with_max_attempts(3),
            "get_pod",
            || async { pods.get(name).await.map_err(maya_common::Error::from) },
            maya_common::Error::is_retryable,
        )
        .await
        .result?;
        Ok(pod.metadata.owner_references.unwrap_or_default())
    }
}

/// The single owner of the pod, normally its Job
pub fn job_owner(pod: &PodIdentity, owners: Vec<OwnerReference>) -> Result<OwnerReference> {
    let count = owners.len();
    let mut owners = owners.into_iter();
    match (owners.next(), count) {
        (Some(owner), 1) => Ok(owner),
        (None, _) => Err(UpgradeError::pod_identity(format!("pod {pod} has no owner"))),
        _ => Err(UpgradeError::pod_identity(format!(
            "pod {pod} has {count} owners, expected exactly one"
        ))),
    }
}

/// Cluster collaborators of the executor
#[derive(Clone)]
pub struct Collaborators {
    /// CAS template catalog
    pub templates: Arc<dyn CasTemplateStore>,
    /// Pod owner lookup
    pub pods: Arc<dyn PodClient>,
    /// UpgradeResult API
    pub results: Arc<dyn UpgradeResultClient>,
    /// Run-task specs
    pub tasks: Arc<dyn TaskSpecFetcher>,
    /// Task executor handed to every engine
    pub executor: Arc<dyn TaskExecutor>,
}

impl Collaborators {
    /// Collaborators backed by one shared cluster client
    pub fn kube(client: Arc<LazyClient>) -> Self {
        Self {
            templates: Arc::new(KubeCasTemplateStore::new(client.clone())),
            pods: Arc::new(KubePodClient::new(client.clone())),
            results: Arc::new(KubeUpgradeResultClient::new(client.clone())),
            tasks: Arc::new(KubeTaskSpecFetcher::new(client.clone())),
            executor: Arc::new(KubeTaskExecutor::new(client)),
        }
    }
}

/// A resource whose upgrade failed
#[derive(Debug)]
pub struct ResourceFailure {
    /// The resource
    pub resource: ResourceRef,
    /// Category of the failure
    pub kind: ErrorKind,
    /// The failure
    pub error: UpgradeError,
}

/// Outcome of an executor run
#[derive(Debug, Default)]
pub struct ExecutorReport {
    /// Resources upgraded successfully
    pub succeeded: Vec<ResourceRef>,
    /// Resources whose upgrade failed
    pub failed: Vec<ResourceFailure>,
    /// Resources not attempted because the run stopped early
    pub skipped: Vec<ResourceRef>,
}

impl ExecutorReport {
    /// Whether every resource was upgraded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Runs the upgrade of every resource of an upgrade config
pub struct Executor {
    config: UpgradeConfig,
    pod: PodIdentity,
    templates: Arc<dyn CasTemplateStore>,
    pods: Arc<dyn PodClient>,
    registry: Arc<UpgradeResultRegistry>,
    tasks: Arc<dyn TaskSpecFetcher>,
    task_executor: Arc<dyn TaskExecutor>,
    template: OnceCell<CasTemplate>,
    owner: OnceCell<OwnerReference>,
}

impl Executor {
    /// Create an executor for a config that passes validation
    ///
    /// An invalid config is rejected here, before any cluster access.
    pub fn new(config: UpgradeConfig, pod: PodIdentity, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pod,
            templates: collaborators.templates,
            pods: collaborators.pods,
            registry: Arc::new(UpgradeResultRegistry::new(collaborators.results)),
            tasks: Arc::new(CachedTaskSpecFetcher::new(collaborators.tasks)),
            task_executor: collaborators.executor,
            template: OnceCell::new(),
            owner: OnceCell::new(),
        })
    }

    /// Upgrade every resource in order under the configured failure policy
    ///
    /// Failing to resolve the owning job or the CAS template fails the whole
    /// run. Per-resource failures are collected in the report.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ExecutorReport> {
        let owner = self.owner().await?;
        let template = self.template().await?;
        info!(
            template = %self.config.cas_template,
            owner = %owner.name,
            resources = self.config.resources.len(),
            continue_on_error = self.config.continue_on_error,
            "starting upgrade"
        );

        let mut report = ExecutorReport::default();
        let mut resources = self.config.resources.iter();

        for resource in resources.by_ref() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UpgradeError::Cancelled),
                result = self.upgrade(resource, template, owner, cancel) => result,
            };

            match result {
                Ok(()) => {
                    info!(resource = %resource, "resource upgraded");
                    report.succeeded.push(resource.clone());
                }
                Err(err) => {
                    let kind = err.kind();
                    error!(resource = %resource, kind = %kind, error = %err, "resource upgrade failed");
                    report.failed.push(ResourceFailure {
                        resource: resource.clone(),
                        kind,
                        error: err,
                    });
                    if !self.config.continue_on_error || always_stops(kind) {
                        break;
                    }
                }
            }
        }

        report.skipped = resources.cloned().collect();
        if !report.skipped.is_empty() {
            warn!(skipped = report.skipped.len(), "upgrade stopped before every resource was attempted");
        }
        Ok(report)
    }

    async fn owner(&self) -> Result<&OwnerReference> {
        self.owner
            .get_or_try_init(|| async {
                let owners = self
                    .pods
                    .owner_references(&self.pod.namespace, &self.pod.name)
                    .await?;
                job_owner(&self.pod, owners)
            })
            .await
    }

    async fn template(&self) -> Result<&CasTemplate> {
        self.template
            .get_or_try_init(|| self.templates.get(&self.config.cas_template))
            .await
    }

    async fn upgrade(
        &self,
        resource: &ResourceRef,
        template: &CasTemplate,
        owner: &OwnerReference,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = GetOrCreateRequest::builder()
            .namespace(self.pod.namespace.clone())
            .owner(owner.clone())
            .data(self.config.data.clone())
            .resource(resource.clone())
            .tasks(template.run_tasks().to_vec())
            .build()?;
        let record = self.registry.get_or_create(&request).await?;
        let recorder = UpgradeResultRecorder::new(self.registry.clone(), &record)?;

        let mut engine = EngineBuilder::new()
            .with_template(template.clone())
            .with_unit(resource.clone())
            .with_runtime_data(self.config.data.clone())
            .with_upgrade_result(record)
            .with_task_fetcher(self.tasks.clone())
            .with_task_executor(self.task_executor.clone())
            .with_progress(Arc::new(recorder))
            .build()?;

        let output = engine.run(cancel).await?;
        if !output.failed_non_fatal.is_empty() {
            warn!(resource = %resource, tasks = ?output.failed_non_fatal, "non-fatal tasks failed");
        }
        if !output.output.is_empty() {
            info!(resource = %resource, output = %output.output, "cas template output");
        }
        Ok(())
    }
}

fn always_stops(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::AmbiguousUpgradeResult | ErrorKind::Cancelled)
}
