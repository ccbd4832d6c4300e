//! Shared types used across the upgrade CRDs

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// ResourceRef
// =============================================================================

/// Identifies one unit of upgrade, e.g. a storage pool claim or a volume.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Kind of the target resource
    #[serde(default)]
    pub kind: String,

    /// Name of the target resource
    #[serde(default)]
    pub name: String,

    /// Namespace of the target resource
    #[serde(default)]
    pub namespace: String,

    /// apiVersion of the target resource, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Last observed generation of the target. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
}

impl ResourceRef {
    /// Create a reference from kind, name and namespace
    pub fn new(kind: impl Into<String>, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

// =============================================================================
// Config / DataItem
// =============================================================================

/// A named configuration value declared by a CAS template.
///
/// `enabled` is kept as a string so templates can compare it literally
/// (`Config.replicas.enabled == "true"`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Name the value is keyed by
    #[serde(default)]
    pub name: String,

    /// The configured value
    #[serde(default)]
    pub value: String,

    /// Whether the value is enabled
    #[serde(default)]
    pub enabled: String,

    /// Free-form key/value data attached to the config
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl Config {
    /// Create an enabled config entry
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            enabled: "true".to_string(),
            data: BTreeMap::new(),
        }
    }
}

/// A runtime configuration override supplied with the upgrade config.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataItem {
    /// Name the value is keyed by
    #[serde(default)]
    pub name: String,

    /// The supplied value
    #[serde(default)]
    pub value: String,

    /// Additional key/value entries
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entries: BTreeMap<String, String>,
}

impl From<&DataItem> for Config {
    fn from(item: &DataItem) -> Self {
        Self {
            name: item.name.clone(),
            value: item.value.clone(),
            enabled: "true".to_string(),
            data: item.entries.clone(),
        }
    }
}

// =============================================================================
// ErrorCategory
// =============================================================================

/// Category of a task failure, matched against a task's fallback trigger.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// The target's schema version is not the one the task expects
    #[default]
    VersionMismatch,
    /// An object the task depends on does not exist
    NotFound,
    /// A post-condition check on the task result failed
    Verify,
    /// Any other failure
    Generic,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionMismatch => write!(f, "version-mismatch"),
            Self::NotFound => write!(f, "not-found"),
            Self::Verify => write!(f, "verify"),
            Self::Generic => write!(f, "generic"),
        }
    }
}
