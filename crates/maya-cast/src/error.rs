//! Error types for the CAS template engine

use maya_common::crd::ErrorCategory;
use maya_common::ErrorKind;
use thiserror::Error;

/// Failure reported by a task executor
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{category}: {message}")]
pub struct TaskExecError {
    /// Category matched against fallback triggers
    pub category: ErrorCategory,
    /// What went wrong
    pub message: String,
}

impl TaskExecError {
    /// Create an error of the given category
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// An uncategorized failure
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Generic, message)
    }

    /// An object the task needs does not exist
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    /// The target is at an unexpected schema version
    pub fn version_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::VersionMismatch, message)
    }
}

impl From<kube::Error> for TaskExecError {
    fn from(err: kube::Error) -> Self {
        if maya_common::kube_utils::is_not_found(&err) {
            Self::not_found(err.to_string())
        } else {
            Self::generic(err.to_string())
        }
    }
}

/// Errors that can occur while building or running an engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error from shared maya code
    #[error(transparent)]
    Common(#[from] maya_common::Error),

    /// Missing or inconsistent builder inputs
    #[error("invalid engine inputs: {}", .errors.join("; "))]
    BuilderInvalid {
        /// Every problem found
        errors: Vec<String>,
    },

    /// Config entries could not be turned into a value map
    #[error("invalid config: {message}")]
    ConfigInvalid {
        /// What is wrong with the config
        message: String,
    },

    /// A run-task does not exist in the task namespace
    #[error("run-task {namespace}/{name} not found")]
    RunTaskNotFound {
        /// Task name
        name: String,
        /// Task namespace
        namespace: String,
    },

    /// A run-task spec is unusable (bad duration, bad meta)
    #[error("invalid run-task {task}: {message}")]
    InvalidTask {
        /// Task name
        task: String,
        /// What is wrong with it
        message: String,
    },

    /// Rendering a task template failed
    #[error("failed to render task {task}: {message}")]
    RenderFailed {
        /// Task name
        task: String,
        /// Render error
        message: String,
    },

    /// A task failed, after its retries if any
    #[error("task {task} failed: {source}")]
    TaskFailed {
        /// Task name
        task: String,
        /// Attempts made
        attempts: u32,
        /// The last executor or template-signalled failure
        source: TaskExecError,
    },

    /// Recording task progress failed
    #[error("failed to record progress of task {task}: {message}")]
    UpdatePersistFailed {
        /// Task name
        task: String,
        /// Underlying error
        message: String,
    },

    /// The run was cancelled
    #[error("cancelled{}", .task.as_ref().map(|t| format!(" during task {t}")).unwrap_or_default())]
    Cancelled {
        /// Task running when the cancellation was observed
        task: Option<String>,
    },
}

impl EngineError {
    /// Coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Common(_) => ErrorKind::Internal,
            Self::BuilderInvalid { .. } => ErrorKind::Internal,
            Self::ConfigInvalid { .. } => ErrorKind::Internal,
            Self::RunTaskNotFound { .. } => ErrorKind::RunTaskNotFound,
            Self::InvalidTask { .. } => ErrorKind::Internal,
            Self::RenderFailed { .. } => ErrorKind::RenderFailed,
            Self::TaskFailed { .. } => ErrorKind::TaskExecFailed,
            Self::UpdatePersistFailed { .. } => ErrorKind::UpdatePersistFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Category usable to trigger a fallback, if this failure is eligible
    ///
    /// Only task failures are eligible. Render errors, persistence errors and
    /// cancellations never are.
    pub fn fallback_category(&self) -> Option<ErrorCategory> {
        match self {
            Self::TaskFailed { source, .. } => Some(source.category),
            _ => None,
        }
    }

    pub(crate) fn render(task: &str, message: impl Into<String>) -> Self {
        Self::RenderFailed {
            task: task.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_task(task: &str, message: impl Into<String>) -> Self {
        Self::InvalidTask {
            task: task.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn persist(task: &str, err: impl std::fmt::Display) -> Self {
        Self::UpdatePersistFailed {
            task: task.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn cancelled(task: Option<&str>) -> Self {
        Self::Cancelled {
            task: task.map(str::to_string),
        }
    }
}
