//! In-memory cluster used by the executor scenario tests

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use maya_cast::{EngineError, ExecOutput, TaskExecError, TaskExecutor, TaskInvocation, TaskSpecFetcher};
use maya_common::crd::{
    CasTemplate, CasTemplateSpec, RunTaskSpec, RunTasks, UpgradeResult, UpgradeResultStatus,
};

use crate::castemplate::{check_template_name, CasTemplateStore};
use crate::executor::PodClient;
use crate::result::UpgradeResultClient;
use crate::{Result, UpgradeError};

pub(crate) const TASK_NAMESPACE: &str = "openebs";
pub(crate) const POD_NAMESPACE: &str = "upgrade-ns";
pub(crate) const POD_NAME: &str = "upgrade-job-pod";
pub(crate) const JOB_NAME: &str = "upgrade-job";

#[derive(Default)]
struct State {
    templates: HashMap<String, CasTemplate>,
    run_tasks: HashMap<(String, String), RunTaskSpec>,
    records: Vec<UpgradeResult>,
    pods: HashMap<(String, String), Vec<OwnerReference>>,
    failing: HashMap<String, TaskExecError>,
    executed: Vec<String>,
    template_reads: usize,
    reads: usize,
    record_writes: usize,
    next_id: u32,
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    state: Mutex<State>,
}

pub(crate) fn job_owner_ref() -> OwnerReference {
    OwnerReference {
        api_version: "batch/v1".to_string(),
        kind: "Job".to_string(),
        name: JOB_NAME.to_string(),
        uid: "job-uid".to_string(),
        ..Default::default()
    }
}

pub(crate) fn cas_template(
    name: &str,
    tasks: &[&str],
    output: Option<&str>,
    fallback: Option<&str>,
) -> CasTemplate {
    CasTemplate::new(
        name,
        CasTemplateSpec {
            default_config: vec![],
            task_namespace: TASK_NAMESPACE.to_string(),
            run: RunTasks {
                tasks: tasks.iter().map(|t| t.to_string()).collect(),
            },
            output: output.map(str::to_string),
            fallback: fallback.map(str::to_string),
        },
    )
}

fn matches_selector(record: &UpgradeResult, selector: &str) -> bool {
    let labels = record.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|pair| !pair.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

impl FakeCluster {
    /// A cluster with the upgrade pod owned by the upgrade job
    pub(crate) fn new() -> Self {
        let cluster = Self::default();
        cluster.lock().pods.insert(
            (POD_NAMESPACE.to_string(), POD_NAME.to_string()),
            vec![job_owner_ref()],
        );
        cluster
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_template(&self, template: CasTemplate) {
        let name = template.metadata.name.clone().unwrap_or_default();
        self.lock().templates.insert(name, template);
    }

    /// Register run-tasks whose body echoes the task and resource names
    pub(crate) fn add_run_tasks(&self, names: &[&str]) {
        for name in names {
            self.add_run_task(
                name,
                RunTaskSpec {
                    task: format!("{name} on {{{{ UpgradeItem.name }}}}"),
                    ..Default::default()
                },
            );
        }
    }

    pub(crate) fn add_run_task(&self, name: &str, spec: RunTaskSpec) {
        self.lock()
            .run_tasks
            .insert((TASK_NAMESPACE.to_string(), name.to_string()), spec);
    }

    pub(crate) fn set_pod_owners(&self, owners: Vec<OwnerReference>) {
        self.lock()
            .pods
            .insert((POD_NAMESPACE.to_string(), POD_NAME.to_string()), owners);
    }

    pub(crate) fn add_record(&self, record: UpgradeResult) {
        self.lock().records.push(record);
    }

    pub(crate) fn fail_task(&self, name: &str, err: TaskExecError) {
        self.lock().failing.insert(name.to_string(), err);
    }

    pub(crate) fn records(&self) -> Vec<UpgradeResult> {
        self.lock().records.clone()
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub(crate) fn template_reads(&self) -> usize {
        self.lock().template_reads
    }

    /// Reads of any kind: templates, run-tasks, pods and records
    pub(crate) fn reads(&self) -> usize {
        self.lock().reads
    }

    pub(crate) fn record_writes(&self) -> usize {
        self.lock().record_writes
    }

    /// Overwrite a stored record, e.g. to simulate an earlier run
    pub(crate) fn edit_record(&self, name: &str, edit: impl FnOnce(&mut UpgradeResult)) {
        let mut state = self.lock();
        if let Some(record) = state
            .records
            .iter_mut()
            .find(|r| r.metadata.name.as_deref() == Some(name))
        {
            edit(record);
        }
    }
}

#[async_trait]
impl CasTemplateStore for FakeCluster {
    async fn get(&self, name: &str) -> Result<CasTemplate> {
        let name = check_template_name(name)?;
        let mut state = self.lock();
        state.template_reads += 1;
        state.reads += 1;
        state
            .templates
            .get(name)
            .cloned()
            .ok_or_else(|| UpgradeError::TemplateNotFound {
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl TaskSpecFetcher for FakeCluster {
    async fn fetch(&self, namespace: &str, name: &str) -> std::result::Result<RunTaskSpec, EngineError> {
        let mut state = self.lock();
        state.reads += 1;
        state
            .run_tasks
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::RunTaskNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }
}

#[async_trait]
impl TaskExecutor for FakeCluster {
    async fn execute(&self, invocation: &TaskInvocation) -> std::result::Result<ExecOutput, TaskExecError> {
        let mut state = self.lock();
        state.executed.push(invocation.task.clone());
        match state.failing.get(&invocation.task) {
            Some(err) => Err(err.clone()),
            None => Ok(ExecOutput::raw(invocation.body.clone())),
        }
    }
}

#[async_trait]
impl PodClient for FakeCluster {
    async fn owner_references(&self, namespace: &str, name: &str) -> Result<Vec<OwnerReference>> {
        let mut state = self.lock();
        state.reads += 1;
        state
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| maya_common::Error::not_found("Pod", name).into())
    }
}

#[async_trait]
impl UpgradeResultClient for FakeCluster {
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<UpgradeResult>> {
        let mut state = self.lock();
        state.reads += 1;
        Ok(state
            .records
            .iter()
            .filter(|r| r.metadata.namespace.as_deref() == Some(namespace))
            .filter(|r| matches_selector(r, selector))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<UpgradeResult> {
        let mut state = self.lock();
        state.reads += 1;
        state
            .records
            .iter()
            .find(|r| {
                r.metadata.namespace.as_deref() == Some(namespace)
                    && r.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| maya_common::Error::not_found("UpgradeResult", name).into())
    }

    async fn create(&self, namespace: &str, record: &UpgradeResult) -> Result<UpgradeResult> {
        let mut state = self.lock();
        state.next_id += 1;
        let mut created = record.clone();
        let prefix = created.metadata.generate_name.clone().unwrap_or_default();
        created.metadata.name = Some(format!("{prefix}{:05}", state.next_id));
        created.metadata.namespace = Some(namespace.to_string());
        created.status = None;
        state.records.push(created.clone());
        state.record_writes += 1;
        Ok(created)
    }

    async fn replace(&self, namespace: &str, record: &UpgradeResult) -> Result<UpgradeResult> {
        let mut state = self.lock();
        let stored = state
            .records
            .iter_mut()
            .find(|r| {
                r.metadata.namespace.as_deref() == Some(namespace)
                    && r.metadata.name == record.metadata.name
            })
            .ok_or_else(|| maya_common::Error::not_found("UpgradeResult", "replace target"))?;
        stored.metadata = record.metadata.clone();
        stored.spec = record.spec.clone();
        let replaced = stored.clone();
        state.record_writes += 1;
        Ok(replaced)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &UpgradeResultStatus,
    ) -> Result<UpgradeResult> {
        let mut state = self.lock();
        let stored = state
            .records
            .iter_mut()
            .find(|r| {
                r.metadata.namespace.as_deref() == Some(namespace)
                    && r.metadata.name.as_deref() == Some(name)
            })
            .ok_or_else(|| maya_common::Error::not_found("UpgradeResult", name))?;
        stored.status = Some(status.clone());
        let patched = stored.clone();
        state.record_writes += 1;
        Ok(patched)
    }
}
