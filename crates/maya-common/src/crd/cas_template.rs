//! CASTemplate CRD types
//!
//! A CAS template is a cluster-scoped, declarative upgrade recipe: an ordered
//! list of run-task names plus default configuration, an optional output task
//! and an optional fallback task.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Config;

/// Ordered list of run-tasks making up the upgrade plan of one resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunTasks {
    /// Run-task names, executed strictly in this order
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// Specification of a CAS template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "CASTemplate",
    root = "CasTemplate",
    plural = "castemplates",
    shortname = "cast",
    printcolumn = r#"{"name":"TaskNamespace","type":"string","jsonPath":".spec.taskNamespace"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CasTemplateSpec {
    /// Default configuration available to every run-task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_config: Vec<Config>,

    /// Namespace the run-tasks are loaded from
    #[serde(default)]
    pub task_namespace: String,

    /// The ordered run-task plan
    #[serde(default)]
    pub run: RunTasks,

    /// Run-task whose rendered body becomes the engine output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Run-task invoked when a task fails with a matching error category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl CasTemplate {
    /// Run-task names in execution order
    pub fn run_tasks(&self) -> &[String] {
        &self.spec.run.tasks
    }

    /// Labels of the template, exposed read-only to run-tasks
    pub fn options(&self) -> BTreeMap<String, String> {
        self.metadata.labels.clone().unwrap_or_default()
    }

    /// Output task name, ignoring blank values
    pub fn output_task(&self) -> Option<&str> {
        non_blank(self.spec.output.as_deref())
    }

    /// Fallback task name, ignoring blank values
    pub fn fallback_task(&self) -> Option<&str> {
        non_blank(self.spec.fallback.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
