//! Get-or-create of UpgradeResult records and per-task progress updates
//!
//! A record is keyed by four labels: the upgrade job name and the kind,
//! name and namespace of the upgraded resource. At most one record may carry
//! a given key; finding more is an error that is never resolved
//! automatically.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use maya_cast::ProgressSink;
use maya_common::crd::{
    DataItem, ResourceRef, ResourceState, ResultConfig, StateSlot, TaskProgress, TaskUpdate,
    UpgradeResult, UpgradeResultSpec,
};
use maya_common::kube_utils::{controller_owner_reference, label_selector};
use maya_common::{
    UPGRADE_ITEM_KIND_LABEL, UPGRADE_ITEM_NAMESPACE_LABEL, UPGRADE_ITEM_NAME_LABEL,
    UPGRADE_JOB_NAME_LABEL,
};
use tracing::{debug, info, warn};

use super::client::UpgradeResultClient;
use crate::{Result, UpgradeError};

/// The four labels identifying the record of `resource` in job `job`
pub fn record_labels(job: &str, resource: &ResourceRef) -> BTreeMap<String, String> {
    BTreeMap::from([
        (UPGRADE_JOB_NAME_LABEL.to_string(), job.to_string()),
        (UPGRADE_ITEM_NAME_LABEL.to_string(), resource.name.clone()),
        (UPGRADE_ITEM_NAMESPACE_LABEL.to_string(), resource.namespace.clone()),
        (UPGRADE_ITEM_KIND_LABEL.to_string(), resource.kind.clone()),
    ])
}

/// Inputs of [`UpgradeResultRegistry::get_or_create`]
#[derive(Clone, Debug)]
pub struct GetOrCreateRequest {
    namespace: String,
    owner: OwnerReference,
    data: Vec<DataItem>,
    resource: ResourceRef,
    tasks: Vec<String>,
}

impl GetOrCreateRequest {
    /// Start building a request
    pub fn builder() -> GetOrCreateRequestBuilder {
        GetOrCreateRequestBuilder::default()
    }

    /// Namespace the record lives in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Labels identifying the record
    pub fn labels(&self) -> BTreeMap<String, String> {
        record_labels(&self.owner.name, &self.resource)
    }

    fn new_record(&self) -> UpgradeResult {
        let mut record = UpgradeResult::new(
            "",
            UpgradeResultSpec {
                config: ResultConfig {
                    resource: self.resource.clone(),
                    data: self.data.clone(),
                },
                tasks: self.tasks.iter().map(TaskProgress::pending).collect(),
            },
        );
        record.metadata = ObjectMeta {
            generate_name: Some(format!("{}-", self.owner.name)),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            owner_references: Some(vec![controller_owner_reference(&self.owner)]),
            ..Default::default()
        };
        record
    }
}

/// Builder for [`GetOrCreateRequest`], reporting every missing input
#[derive(Default)]
pub struct GetOrCreateRequestBuilder {
    namespace: Option<String>,
    owner: Option<OwnerReference>,
    data: Option<Vec<DataItem>>,
    resource: Option<ResourceRef>,
    tasks: Option<Vec<String>>,
}

impl GetOrCreateRequestBuilder {
    /// Namespace of the pod running the upgrade
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Owner of the record, normally the upgrade job
    pub fn owner(mut self, owner: OwnerReference) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Runtime data of the upgrade config
    pub fn data(mut self, data: Vec<DataItem>) -> Self {
        self.data = Some(data);
        self
    }

    /// Resource being upgraded
    pub fn resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Task slot names, in template order
    pub fn tasks(mut self, tasks: Vec<String>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Validate and build the request
    pub fn build(self) -> Result<GetOrCreateRequest> {
        let mut errors = Vec::new();

        let namespace = self.namespace.filter(|ns| !ns.trim().is_empty());
        if namespace.is_none() {
            errors.push("missing namespace".to_string());
        }
        let owner = self.owner.filter(|o| !o.name.is_empty() && !o.uid.is_empty());
        if owner.is_none() {
            errors.push("missing owner".to_string());
        }
        if self.data.is_none() {
            errors.push("missing upgrade config data".to_string());
        }
        if self.resource.is_none() {
            errors.push("missing resource".to_string());
        }
        if self.tasks.is_none() {
            errors.push("missing tasks".to_string());
        }

        match (namespace, owner, self.data, self.resource, self.tasks) {
            (Some(namespace), Some(owner), Some(data), Some(resource), Some(tasks)) => {
                Ok(GetOrCreateRequest {
                    namespace,
                    owner,
                    data,
                    resource,
                    tasks,
                })
            }
            _ => Err(UpgradeError::RequestInvalid { errors }),
        }
    }
}

/// Reads and writes UpgradeResult records
pub struct UpgradeResultRegistry {
    client: Arc<dyn UpgradeResultClient>,
}

impl UpgradeResultRegistry {
    /// Create a registry over the given client
    pub fn new(client: Arc<dyn UpgradeResultClient>) -> Self {
        Self { client }
    }

    /// Return the record for the request's key, creating it when absent
    ///
    /// More than one match fails with `AmbiguousUpgradeResult` without
    /// touching any record.
    pub async fn get_or_create(&self, request: &GetOrCreateRequest) -> Result<UpgradeResult> {
        let selector = label_selector(&request.labels());
        let mut matches = self.client.list(&request.namespace, &selector).await?;

        match matches.len() {
            0 => {
                let created = self
                    .client
                    .create(&request.namespace, &request.new_record())
                    .await?;
                let name = created.metadata.name.clone().unwrap_or_default();
                let status = created.computed_status();
                let created = self
                    .client
                    .patch_status(&request.namespace, &name, &status)
                    .await
                    .map_err(|e| UpgradeError::persist(&name, e))?;
                info!(record = %name, resource = %request.resource, "created upgrade result");
                Ok(created)
            }
            1 => {
                let record = matches.remove(0);
                info!(
                    record = %record.metadata.name.as_deref().unwrap_or_default(),
                    resource = %request.resource,
                    "resuming upgrade result"
                );
                Ok(record)
            }
            _ => {
                let candidates: Vec<String> = matches
                    .iter()
                    .map(|r| r.metadata.name.clone().unwrap_or_default())
                    .collect();
                warn!(selector = %selector, ?candidates, "ambiguous upgrade results");
                Err(UpgradeError::AmbiguousUpgradeResult {
                    selector,
                    candidates,
                })
            }
        }
    }

    /// Overwrite the slot of one task with the update's fields
    ///
    /// The slot must already exist; records never gain tasks after creation.
    pub async fn update_task(
        &self,
        namespace: &str,
        name: &str,
        update: &TaskUpdate,
    ) -> Result<UpgradeResult> {
        let mut record = self.client.get(namespace, name).await?;
        let slot = record
            .spec
            .tasks
            .iter_mut()
            .find(|t| t.name == update.task)
            .ok_or_else(|| UpgradeError::TaskNotInRecord {
                record: name.to_string(),
                task: update.task.clone(),
            })?;
        slot.apply(update, Utc::now());

        let replaced = self
            .client
            .replace(namespace, &record)
            .await
            .map_err(|e| {
                if matches!(&e, UpgradeError::Common(c) if c.is_conflict()) {
                    warn!(record = %name, task = %update.task, "record changed underneath the update");
                }
                UpgradeError::persist(name, e)
            })?;
        let status = replaced.computed_status();
        let patched = self
            .client
            .patch_status(namespace, name, &status)
            .await
            .map_err(|e| UpgradeError::persist(name, e))?;
        debug!(record = %name, task = %update.task, status = %update.status, "task slot updated");
        Ok(patched)
    }

    /// Write the pre or post state of the upgraded resource
    pub async fn record_state(
        &self,
        namespace: &str,
        name: &str,
        slot: StateSlot,
        mut state: ResourceState,
    ) -> Result<UpgradeResult> {
        let record = self.client.get(namespace, name).await?;
        state.last_transition_time.get_or_insert_with(Utc::now);

        let mut status = record.computed_status();
        match slot {
            StateSlot::Pre => status.pre_state = Some(state),
            StateSlot::Post => status.post_state = Some(state),
        }
        self.client
            .patch_status(namespace, name, &status)
            .await
            .map_err(|e| UpgradeError::persist(name, e))
    }
}

/// [`ProgressSink`] writing into one UpgradeResult
pub struct UpgradeResultRecorder {
    registry: Arc<UpgradeResultRegistry>,
    namespace: String,
    name: String,
}

impl UpgradeResultRecorder {
    /// Record progress into `record`, which must have been persisted
    pub fn new(registry: Arc<UpgradeResultRegistry>, record: &UpgradeResult) -> Result<Self> {
        let (Some(namespace), Some(name)) = (&record.metadata.namespace, &record.metadata.name)
        else {
            return Err(maya_common::Error::validation("upgrade result has no name or namespace").into());
        };
        Ok(Self {
            registry,
            namespace: namespace.clone(),
            name: name.clone(),
        })
    }
}

fn to_common(err: UpgradeError) -> maya_common::Error {
    match err {
        UpgradeError::Common(e) => e,
        other => maya_common::Error::internal_with_context(other.to_string(), "upgrade-result"),
    }
}

#[async_trait]
impl ProgressSink for UpgradeResultRecorder {
    async fn update_task(&self, update: TaskUpdate) -> maya_common::Result<()> {
        self.registry
            .update_task(&self.namespace, &self.name, &update)
            .await
            .map(|_| ())
            .map_err(to_common)
    }

    async fn record_state(&self, slot: StateSlot, state: ResourceState) -> maya_common::Result<()> {
        self.registry
            .record_state(&self.namespace, &self.name, slot, state)
            .await
            .map(|_| ())
            .map_err(to_common)
    }
}
