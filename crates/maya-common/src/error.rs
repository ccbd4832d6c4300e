//! Error types shared across the upgrade engine
//!
//! Errors carry enough context (resource kind, name, operation) to make a
//! failed upgrade debuggable from the job log alone.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Coarse classification of a failure, used by callers that need to branch
/// on the kind of error rather than its message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The upgrade config failed validation
    ConfigInvalid,
    /// The CAS template could not be found
    TemplateNotFound,
    /// A run-task referenced by a template could not be found
    RunTaskNotFound,
    /// More than one UpgradeResult matched a record key
    AmbiguousUpgradeResult,
    /// Rendering a task template failed
    RenderFailed,
    /// A task executor failed after exhausting its retries
    TaskExecFailed,
    /// Writing an UpgradeResult failed
    UpdatePersistFailed,
    /// The run was cancelled
    Cancelled,
    /// Anything else: cluster errors, serialization, invalid inputs
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigInvalid => write!(f, "ConfigInvalid"),
            Self::TemplateNotFound => write!(f, "TemplateNotFound"),
            Self::RunTaskNotFound => write!(f, "RunTaskNotFound"),
            Self::AmbiguousUpgradeResult => write!(f, "AmbiguousUpgradeResult"),
            Self::RenderFailed => write!(f, "RenderFailed"),
            Self::TaskExecFailed => write!(f, "TaskExecFailed"),
            Self::UpdatePersistFailed => write!(f, "UpdatePersistFailed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Internal => write!(f, "Internal"),
        }
    }
}

/// Main error type for shared maya operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.tasks[0].name")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// A named object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "value-tree", "registry")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error means the requested object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube { source } => crate::kube_utils::is_not_found(source),
            _ => false,
        }
    }

    /// Whether this error is an optimistic concurrency conflict on write
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are permanent; Kubernetes and
    /// internal errors may be transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube { .. } => !self.is_not_found(),
            Self::Validation { .. } => false,
            Self::Serialization { .. } => false,
            Self::NotFound { .. } => false,
            Self::Internal { .. } => true,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_permanent() {
        let err = Error::validation_for_field("spec.tasks", "must not be empty");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("must not be empty"));
        match err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("spec.tasks")),
            _ => panic!("expected Validation"),
        }
    }

    #[test]
    fn not_found_is_detected_for_plain_and_kube_errors() {
        assert!(Error::not_found("RunTask", "t1").is_not_found());

        let api = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "runtasks \"t1\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        let err = Error::from(api);
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflict_is_detected() {
        let api = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        });
        let err = Error::from(api);
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[test]
    fn yaml_errors_become_serialization_errors() {
        let parse: Result<serde_json::Value, _> = serde_yaml::from_str("a: [unclosed");
        let err = Error::from(parse.unwrap_err());
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::AmbiguousUpgradeResult.to_string(), "AmbiguousUpgradeResult");
    }
}
