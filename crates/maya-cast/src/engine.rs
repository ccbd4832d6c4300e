//! Building and running a CAST engine for one unit of upgrade
//!
//! The builder binds a CAS template, the target resource, runtime data and
//! the UpgradeResult record into an engine with a seeded value tree. Running
//! the engine fetches every run-task up front, then executes them in order.

use std::sync::Arc;

use maya_common::crd::{CasTemplate, DataItem, ResourceRef, UpgradeResult};
use maya_common::values::{
    ValueTree, CAS_OPTIONS_KEY, CONFIG_KEY, LIST_ITEMS_KEY, RUNTIME_KEY, TASK_RESULT_KEY,
    UPGRADE_ITEM_KEY,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{config_to_map, data_to_config, merge_config};
use crate::error::EngineError;
use crate::progress::{NoopProgress, ProgressSink};
use crate::task::{PreparedTask, TaskEnv, TaskExecutor, TaskGroupRunner, TaskSpecFetcher};
use crate::template::TemplateEngine;

/// Builder for [`CastEngine`]
///
/// Every missing or inconsistent input is collected; `build` reports all of
/// them at once.
#[derive(Default)]
pub struct EngineBuilder {
    template: Option<CasTemplate>,
    unit: Option<ResourceRef>,
    runtime_data: Option<Vec<DataItem>>,
    record: Option<UpgradeResult>,
    fetcher: Option<Arc<dyn TaskSpecFetcher>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl EngineBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// CAS template to run
    pub fn with_template(mut self, template: CasTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Resource being upgraded
    pub fn with_unit(mut self, unit: ResourceRef) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Runtime data from the upgrade config
    pub fn with_runtime_data(mut self, data: Vec<DataItem>) -> Self {
        self.runtime_data = Some(data);
        self
    }

    /// UpgradeResult the run records into
    pub fn with_upgrade_result(mut self, record: UpgradeResult) -> Self {
        self.record = Some(record);
        self
    }

    /// Source of run-task specs
    pub fn with_task_fetcher(mut self, fetcher: Arc<dyn TaskSpecFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Executor for rendered tasks
    pub fn with_task_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Receiver of task progress; progress is dropped when unset
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validate inputs and seed the value tree
    pub fn build(self) -> Result<CastEngine, EngineError> {
        let mut errors = Vec::new();

        if self.template.is_none() {
            errors.push("missing cas template".to_string());
        }
        if self.unit.is_none() {
            errors.push("missing unit of upgrade".to_string());
        }
        if self.runtime_data.is_none() {
            errors.push("missing runtime data".to_string());
        }
        if self.record.is_none() {
            errors.push("missing upgrade result".to_string());
        }
        if self.fetcher.is_none() {
            errors.push("missing run-task fetcher".to_string());
        }
        if self.executor.is_none() {
            errors.push("missing task executor".to_string());
        }

        if let Some(template) = &self.template {
            let uses_tasks = !template.run_tasks().is_empty()
                || template.output_task().is_some()
                || template.fallback_task().is_some();
            if uses_tasks && template.spec.task_namespace.trim().is_empty() {
                errors.push("cas template has no task namespace".to_string());
            }
        }

        if let Some(record) = &self.record {
            if record.metadata.name.as_deref().unwrap_or_default().is_empty() {
                errors.push("upgrade result has no name".to_string());
            }
            if let Some(template) = &self.template {
                let planned: Vec<&str> = template.run_tasks().iter().map(String::as_str).collect();
                if record.task_names() != planned {
                    errors.push(format!(
                        "upgrade result tasks {:?} do not match cas template tasks {:?}",
                        record.task_names(),
                        planned
                    ));
                }
            }
        }

        let (
            Some(template),
            Some(unit),
            Some(runtime_data),
            Some(record),
            Some(fetcher),
            Some(executor),
        ) = (
            self.template,
            self.unit,
            self.runtime_data,
            self.record,
            self.fetcher,
            self.executor,
        )
        else {
            return Err(EngineError::BuilderInvalid { errors });
        };

        let defaults = config_to_map(&template.spec.default_config);
        let runtime = config_to_map(&merge_config(&data_to_config(&runtime_data), &[]));
        let (defaults, runtime) = match (defaults, runtime) {
            (Ok(d), Ok(r)) if errors.is_empty() => (d, r),
            (d, r) => {
                errors.extend(d.err().map(|e| format!("default config: {e}")));
                errors.extend(r.err().map(|e| format!("runtime data: {e}")));
                return Err(EngineError::BuilderInvalid { errors });
            }
        };

        let mut values = ValueTree::new();
        values.insert(CONFIG_KEY, defaults);
        values.insert(RUNTIME_KEY, runtime);
        values.insert(
            UPGRADE_ITEM_KEY,
            json!({
                "name": unit.name,
                "namespace": unit.namespace,
                "kind": unit.kind,
                "upgradeResultName": record.metadata.name.clone().unwrap_or_default(),
                "upgradeResultNamespace": record.metadata.namespace.clone().unwrap_or_default(),
            }),
        );
        values.insert(LIST_ITEMS_KEY, json!({}));
        values.insert(TASK_RESULT_KEY, json!({}));
        values.insert(CAS_OPTIONS_KEY, json!(template.options()));

        debug!(unit = %unit, tasks = template.run_tasks().len(), "cast engine built");

        Ok(CastEngine {
            template,
            unit,
            values,
            templates: TemplateEngine::new(),
            fetcher,
            executor,
            progress: self.progress.unwrap_or_else(|| Arc::new(NoopProgress)),
        })
    }
}

/// Result of a successful engine run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineOutput {
    /// Rendered output task, empty when the template has none
    pub output: String,
    /// Non-fatal tasks that failed
    pub failed_non_fatal: Vec<String>,
}

/// Interpreter of one CAS template for one unit of upgrade
pub struct CastEngine {
    template: CasTemplate,
    unit: ResourceRef,
    values: ValueTree,
    templates: TemplateEngine,
    fetcher: Arc<dyn TaskSpecFetcher>,
    executor: Arc<dyn TaskExecutor>,
    progress: Arc<dyn ProgressSink>,
}

impl CastEngine {
    /// Current value tree
    pub fn values(&self) -> &ValueTree {
        &self.values
    }

    /// Fetch every run-task, then run them in order and render the output
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<EngineOutput, EngineError> {
        let runner = self.prepare(cancel).await?;
        info!(unit = %self.unit, tasks = ?runner.task_names(), "running cas template");

        let mut env = TaskEnv {
            values: &mut self.values,
            templates: &self.templates,
            executor: self.executor.as_ref(),
            progress: self.progress.as_ref(),
            cancel,
        };
        let outcome = runner.run(&mut env).await?;

        Ok(EngineOutput {
            output: outcome.output,
            failed_non_fatal: outcome.failed_non_fatal,
        })
    }

    async fn prepare(&self, cancel: &CancellationToken) -> Result<TaskGroupRunner, EngineError> {
        let mut runner = TaskGroupRunner::new();

        for name in self.template.run_tasks() {
            runner.add_task(self.fetch(name, cancel).await?);
        }
        if let Some(name) = self.template.output_task() {
            runner.set_output(self.fetch(name, cancel).await?);
        }
        if let Some(name) = self.template.fallback_task() {
            runner.set_fallback(self.fetch(name, cancel).await?);
        }
        Ok(runner)
    }

    async fn fetch(&self, name: &str, cancel: &CancellationToken) -> Result<PreparedTask, EngineError> {
        let namespace = self.template.spec.task_namespace.as_str();
        let spec = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::cancelled(None)),
            spec = self.fetcher.fetch(namespace, name) => spec?,
        };
        PreparedTask::new(name, spec)
    }
}
