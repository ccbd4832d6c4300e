//! UpgradeResult CRD types
//!
//! One UpgradeResult exists per (upgrade job, target resource). It stores the
//! task plan fixed at creation and the progress of every task, so an
//! interrupted upgrade can be resumed and inspected.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DataItem, ResourceRef};

// =============================================================================
// TaskStatus
// =============================================================================

/// Progress state of one task slot
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TaskStatus {
    /// Not started yet
    #[default]
    #[serde(rename = "")]
    Unset,
    /// Currently executing
    Running,
    /// Finished successfully
    Succeeded,
    /// Failed, then recovered by the fallback task
    SucceededViaFallback,
    /// Failed
    Failed,
}

impl TaskStatus {
    /// Whether the status is a successful terminal state
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::SucceededViaFallback)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => write!(f, ""),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::SucceededViaFallback => write!(f, "SucceededViaFallback"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Ok(Self::Unset),
            "Running" => Ok(Self::Running),
            "Succeeded" => Ok(Self::Succeeded),
            "SucceededViaFallback" => Ok(Self::SucceededViaFallback),
            "Failed" => Ok(Self::Failed),
            other => Err(crate::Error::validation(format!(
                "unknown task status {other:?}"
            ))),
        }
    }
}

// =============================================================================
// TaskProgress
// =============================================================================

/// Persisted progress of one run-task
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    /// Run-task name, fixed at record creation
    pub name: String,

    /// Current state
    #[serde(default)]
    pub status: TaskStatus,

    /// When `status` last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Human-readable outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last error observed while running the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the latest run of the task started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the latest run of the task ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Number of retries used by the latest run
    #[serde(default)]
    pub retries: u32,
}

impl TaskProgress {
    /// An empty progress shell for a task that has not run
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Apply an update to this slot
    ///
    /// Moving to `Running` clears the outcome of any previous run.
    pub fn apply(&mut self, update: &TaskUpdate, now: DateTime<Utc>) {
        if self.status != update.status {
            self.last_transition_time = Some(now);
        }
        self.status = update.status;

        if update.status == TaskStatus::Running {
            self.message = None;
            self.last_error = None;
            self.end_time = None;
            self.retries = 0;
        }

        if let Some(message) = &update.message {
            self.message = Some(message.clone());
        }
        if let Some(error) = &update.last_error {
            self.last_error = Some(error.clone());
        }
        if let Some(start) = update.start_time {
            self.start_time = Some(start);
        }
        if let Some(end) = update.end_time {
            self.end_time = Some(end);
        }
        if let Some(retries) = update.retries {
            self.retries = retries;
        }
    }
}

/// Fields written into one task slot
#[derive(Clone, Debug, PartialEq)]
pub struct TaskUpdate {
    /// Name of the task slot to update
    pub task: String,
    /// New status
    pub status: TaskStatus,
    /// Outcome message, left unchanged when `None`
    pub message: Option<String>,
    /// Last error, left unchanged when `None`
    pub last_error: Option<String>,
    /// Start time, left unchanged when `None`
    pub start_time: Option<DateTime<Utc>>,
    /// End time, left unchanged when `None`
    pub end_time: Option<DateTime<Utc>>,
    /// Retries used, left unchanged when `None`
    pub retries: Option<u32>,
}

impl TaskUpdate {
    /// A bare status change
    pub fn status(task: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task: task.into(),
            status,
            message: None,
            last_error: None,
            start_time: None,
            end_time: None,
            retries: None,
        }
    }

    /// Marks a task as started
    pub fn running(task: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(at),
            ..Self::status(task, TaskStatus::Running)
        }
    }

    /// Marks a task as finished with the given terminal status
    pub fn finished(
        task: impl Into<String>,
        status: TaskStatus,
        retries: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            end_time: Some(at),
            retries: Some(retries),
            ..Self::status(task, status)
        }
    }

    /// Attach an outcome message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach the last error
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

// =============================================================================
// Status
// =============================================================================

/// Which resource state slot of the record status to write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateSlot {
    /// State of the target before the upgrade
    Pre,
    /// State of the target after the upgrade
    Post,
}

impl std::str::FromStr for StateSlot {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pre" | "prestate" => Ok(Self::Pre),
            "post" | "poststate" => Ok(Self::Post),
            other => Err(crate::Error::validation(format!(
                "unknown state slot {other:?}, expected pre or post"
            ))),
        }
    }
}

/// Observed state of the upgrade target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceState {
    /// Short state of the target, e.g. "Healthy"
    #[serde(default)]
    pub status: String,

    /// Details about the state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the state was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Aggregate progress of an UpgradeResult
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeResultStatus {
    /// Number of task slots
    #[serde(default)]
    pub desired_count: u32,

    /// Number of successfully finished tasks
    #[serde(default)]
    pub actual_count: u32,

    /// Number of failed tasks
    #[serde(default)]
    pub failed_count: u32,

    /// State of the target before the upgrade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_state: Option<ResourceState>,

    /// State of the target after the upgrade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_state: Option<ResourceState>,
}

// =============================================================================
// UpgradeResult
// =============================================================================

/// Runtime data and target echoed into the record
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultConfig {
    /// The upgraded resource
    #[serde(default)]
    pub resource: ResourceRef,

    /// Runtime data supplied with the upgrade config
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataItem>,
}

/// Specification of an UpgradeResult
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "UpgradeResult",
    plural = "upgraderesults",
    shortname = "uresult",
    namespaced,
    status = "UpgradeResultStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".status.desiredCount"}"#,
    printcolumn = r#"{"name":"Succeeded","type":"integer","jsonPath":".status.actualCount"}"#,
    printcolumn = r#"{"name":"Failed","type":"integer","jsonPath":".status.failedCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeResultSpec {
    /// Echo of the runtime data and the target
    #[serde(default)]
    pub config: ResultConfig,

    /// One slot per run-task, in template order
    #[serde(default)]
    pub tasks: Vec<TaskProgress>,
}

impl UpgradeResult {
    /// Task slot names in order
    pub fn task_names(&self) -> Vec<&str> {
        self.spec.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Find the slot of a task by name
    pub fn task(&self, name: &str) -> Option<&TaskProgress> {
        self.spec.tasks.iter().find(|t| t.name == name)
    }

    /// Counters derived from the task slots, keeping any recorded states
    pub fn computed_status(&self) -> UpgradeResultStatus {
        let mut status = self.status.clone().unwrap_or_default();
        status.desired_count = self.spec.tasks.len() as u32;
        status.actual_count = self
            .spec
            .tasks
            .iter()
            .filter(|t| t.status.is_success())
            .count() as u32;
        status.failed_count = self
            .spec
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count() as u32;
        status
    }
}
