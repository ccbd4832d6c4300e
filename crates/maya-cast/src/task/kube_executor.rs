//! Default task executor: runs a run-task against the Kubernetes API
//!
//! The rendered `meta` header selects the action and the target:
//!
//! ```yaml
//! id: readpool
//! apiVersion: openebs.io/v1alpha1
//! kind: StoragePoolClaim
//! action: get
//! runNamespace: openebs
//! objectName: pool-1
//! ```
//!
//! Tasks without a meta header behave like `action: output`.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PostParams};
use maya_common::kube_utils::{build_api_resource, merge_patch_params, LazyClient};
use serde::Deserialize;
use tracing::{debug, info};

use super::executor::{ExecOutput, TaskExecutor, TaskInvocation};
use crate::error::TaskExecError;

/// Operation performed by a run-task
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    /// Read one object
    Get,
    /// List objects matching `options` as a label selector
    List,
    /// Create the object in the task body
    Put,
    /// Merge-patch an object with the task body
    Patch,
    /// Delete one object
    Delete,
    /// Return the rendered body unchanged
    #[default]
    Output,
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::List => write!(f, "list"),
            Self::Put => write!(f, "put"),
            Self::Patch => write!(f, "patch"),
            Self::Delete => write!(f, "delete"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Parsed meta header of a run-task
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskMeta {
    /// Identifier of the task within its template
    #[serde(default)]
    pub id: Option<String>,
    /// apiVersion of the target object
    #[serde(default)]
    pub api_version: String,
    /// Kind of the target object
    #[serde(default)]
    pub kind: String,
    /// Operation to perform
    #[serde(default)]
    pub action: TaskAction,
    /// Namespace of the target; cluster-scoped when unset
    #[serde(default)]
    pub run_namespace: Option<String>,
    /// Name of the target object
    #[serde(default)]
    pub object_name: Option<String>,
    /// Label selector for list actions
    #[serde(default)]
    pub options: Option<String>,
    /// Skip the task
    #[serde(default)]
    pub disable: bool,
}

impl TaskMeta {
    /// Parse a rendered meta header
    pub fn parse(rendered: &str) -> Result<Self, TaskExecError> {
        if rendered.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(rendered)
            .map_err(|e| TaskExecError::generic(format!("invalid task meta: {e}")))
    }

    fn object_name(&self) -> Result<&str, TaskExecError> {
        self.object_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| TaskExecError::generic(format!("objectName is required for {} tasks", self.action)))
    }

    fn require_target(&self) -> Result<(), TaskExecError> {
        if self.api_version.trim().is_empty() || self.kind.trim().is_empty() {
            return Err(TaskExecError::generic(format!(
                "apiVersion and kind are required for {} tasks",
                self.action
            )));
        }
        Ok(())
    }
}

/// Executes run-tasks as Kubernetes API calls on dynamic objects
pub struct KubeTaskExecutor {
    client: Arc<LazyClient>,
}

impl KubeTaskExecutor {
    /// Create an executor using the shared client
    pub fn new(client: Arc<LazyClient>) -> Self {
        Self { client }
    }

    async fn api(&self, meta: &TaskMeta) -> Result<Api<DynamicObject>, TaskExecError> {
        meta.require_target()?;
        let client = self
            .client
            .get()
            .await
            .map_err(|e| TaskExecError::generic(e.to_string()))?;
        let ar = build_api_resource(&meta.api_version, &meta.kind);
        Ok(match meta.run_namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) => Api::namespaced_with(client, ns, &ar),
            None => Api::all_with(client, &ar),
        })
    }
}

#[async_trait]
impl TaskExecutor for KubeTaskExecutor {
    async fn execute(&self, invocation: &TaskInvocation) -> Result<ExecOutput, TaskExecError> {
        let meta = match &invocation.meta {
            Some(m) => TaskMeta::parse(m)?,
            None => TaskMeta::default(),
        };

        if meta.disable {
            debug!(task = %invocation.task, "task disabled, skipping");
            return Ok(ExecOutput::empty());
        }

        debug!(task = %invocation.task, action = %meta.action, kind = %meta.kind, "executing task");

        match meta.action {
            TaskAction::Output => Ok(ExecOutput::raw(invocation.body.clone())),
            TaskAction::Get => {
                let api = self.api(&meta).await?;
                let obj = api.get(meta.object_name()?).await?;
                Ok(ExecOutput::raw(to_json(&obj)?))
            }
            TaskAction::List => {
                let api = self.api(&meta).await?;
                let mut params = ListParams::default();
                if let Some(selector) = meta.options.as_deref().filter(|s| !s.trim().is_empty()) {
                    params = params.labels(selector);
                }
                let list = api.list(&params).await?;
                let mut doc = serde_json::Map::new();
                doc.insert(
                    "items".to_string(),
                    serde_json::to_value(&list.items)
                        .map_err(|e| TaskExecError::generic(e.to_string()))?,
                );
                Ok(ExecOutput::raw(to_json(&doc)?))
            }
            TaskAction::Put => {
                let api = self.api(&meta).await?;
                let obj: DynamicObject = serde_yaml::from_str(&invocation.body)
                    .map_err(|e| TaskExecError::generic(format!("invalid object in task body: {e}")))?;
                let created = api.create(&PostParams::default(), &obj).await?;
                info!(task = %invocation.task, kind = %meta.kind, "created object");
                Ok(ExecOutput::raw(to_json(&created)?))
            }
            TaskAction::Patch => {
                let api = self.api(&meta).await?;
                let patch: serde_json::Value = serde_yaml::from_str(&invocation.body)
                    .map_err(|e| TaskExecError::generic(format!("invalid patch in task body: {e}")))?;
                let patched = api
                    .patch(
                        meta.object_name()?,
                        &merge_patch_params(),
                        &Patch::Merge(&patch),
                    )
                    .await?;
                info!(task = %invocation.task, kind = %meta.kind, "patched object");
                Ok(ExecOutput::raw(to_json(&patched)?))
            }
            TaskAction::Delete => {
                let api = self.api(&meta).await?;
                api.delete(meta.object_name()?, &DeleteParams::default())
                    .await?;
                info!(task = %invocation.task, kind = %meta.kind, "deleted object");
                Ok(ExecOutput::empty())
            }
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, TaskExecError> {
    serde_json::to_string(value).map_err(|e| TaskExecError::generic(e.to_string()))
}
