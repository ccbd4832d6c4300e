//! Error types for the upgrade job

use maya_cast::EngineError;
use maya_common::ErrorKind;
use thiserror::Error;

/// Result type for upgrade job operations
pub type Result<T, E = UpgradeError> = std::result::Result<T, E>;

/// Errors surfaced by the upgrade job
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Error from shared maya code (cluster, serialization)
    #[error(transparent)]
    Common(#[from] maya_common::Error),

    /// Error from the CAST engine
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The upgrade config failed one or more predicates
    #[error("invalid upgrade config: {}", .errors.join("; "))]
    ConfigInvalid {
        /// Every failed predicate
        errors: Vec<String>,
    },

    /// Reading the upgrade config failed
    #[error("failed to read upgrade config {path}: {message}")]
    ConfigRead {
        /// Path of the config file
        path: String,
        /// Underlying error
        message: String,
    },

    /// No CAS template with this name exists
    #[error("cas template {name:?} not found")]
    TemplateNotFound {
        /// Template name
        name: String,
    },

    /// More than one UpgradeResult carries the same record key
    #[error("{} upgrade results match {selector}: {}", .candidates.len(), .candidates.join(", "))]
    AmbiguousUpgradeResult {
        /// Label selector used for the lookup
        selector: String,
        /// Names of all matching records
        candidates: Vec<String>,
    },

    /// A get-or-create request is missing inputs
    #[error("invalid upgrade result request: {}", .errors.join("; "))]
    RequestInvalid {
        /// Every missing input
        errors: Vec<String>,
    },

    /// A progress update named a task the record does not have
    #[error("task {task} is not part of upgrade result {record}")]
    TaskNotInRecord {
        /// Record name
        record: String,
        /// Task name
        task: String,
    },

    /// Writing an UpgradeResult failed
    #[error("failed to persist upgrade result {record}: {message}")]
    UpdatePersistFailed {
        /// Record name
        record: String,
        /// Underlying error
        message: String,
    },

    /// The identity of the pod running the job could not be resolved
    #[error("pod identity: {message}")]
    PodIdentity {
        /// What is missing
        message: String,
    },

    /// The run was cancelled
    #[error("cancelled")]
    Cancelled,
}

impl UpgradeError {
    /// Coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Common(_) | Self::RequestInvalid { .. } | Self::PodIdentity { .. } => {
                ErrorKind::Internal
            }
            Self::Engine(e) => e.kind(),
            Self::ConfigInvalid { .. } | Self::ConfigRead { .. } => ErrorKind::ConfigInvalid,
            Self::TemplateNotFound { .. } => ErrorKind::TemplateNotFound,
            Self::AmbiguousUpgradeResult { .. } => ErrorKind::AmbiguousUpgradeResult,
            Self::TaskNotInRecord { .. } | Self::UpdatePersistFailed { .. } => {
                ErrorKind::UpdatePersistFailed
            }
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Create a pod identity error
    pub fn pod_identity(message: impl Into<String>) -> Self {
        Self::PodIdentity {
            message: message.into(),
        }
    }

    pub(crate) fn persist(record: &str, err: impl std::fmt::Display) -> Self {
        Self::UpdatePersistFailed {
            record: record.to_string(),
            message: err.to_string(),
        }
    }
}
