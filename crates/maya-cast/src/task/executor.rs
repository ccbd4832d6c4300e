//! The task executor seam
//!
//! The engine renders a run-task and hands the result to a [`TaskExecutor`].
//! How the rendered body is interpreted is up to the executor.

use async_trait::async_trait;
use maya_common::crd::PostExtraction;

#[cfg(test)]
use mockall::automock;

use crate::error::TaskExecError;

/// A rendered run-task ready for execution
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskInvocation {
    /// Run-task name
    pub task: String,
    /// Rendered meta header, if the task has one
    pub meta: Option<String>,
    /// Rendered task body
    pub body: String,
}

/// Result of a successful execution
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecOutput {
    /// Raw result, parsed as JSON or YAML when merged
    pub result: String,
    /// Extractions requested by the executor in addition to the task's own
    pub extractions: Vec<PostExtraction>,
}

impl ExecOutput {
    /// An output carrying only a raw result
    pub fn raw(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            extractions: Vec::new(),
        }
    }

    /// An empty output
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Executes rendered run-tasks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute one rendered task
    async fn execute(&self, invocation: &TaskInvocation) -> Result<ExecOutput, TaskExecError>;
}
