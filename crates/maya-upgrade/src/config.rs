//! Upgrade config loading and validation
//!
//! The config names the CAS template to apply, runtime data for its tasks
//! and the resources to upgrade. Validation runs every predicate and reports
//! all failures together.

use std::collections::BTreeSet;
use std::path::Path;

use maya_common::crd::{DataItem, ResourceRef};
use serde::{Deserialize, Serialize};

use crate::{Result, UpgradeError};

/// User supplied upgrade intent
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfig {
    /// Name of the CAS template to apply
    #[serde(default)]
    pub cas_template: String,

    /// Runtime data available to the run-tasks
    #[serde(default)]
    pub data: Vec<DataItem>,

    /// Units of upgrade, in the order they are upgraded
    #[serde(default)]
    pub resources: Vec<ResourceRef>,

    /// Keep upgrading the remaining resources after one fails
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_error: bool,
}

impl UpgradeConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(maya_common::Error::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| UpgradeError::ConfigRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&yaml)
    }

    /// Check every predicate, returning all failures at once
    pub fn validate(&self) -> Result<()> {
        let errors = ConfigValidator::default().check(self);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(UpgradeError::ConfigInvalid { errors })
        }
    }

    /// Kind shared by all resources
    pub fn resource_kind(&self) -> Option<&str> {
        self.resources.first().map(|r| r.kind.as_str())
    }
}

/// A named check over an upgrade config
///
/// A predicate returns one message per violation; an empty list means it
/// holds.
pub type Predicate = fn(&UpgradeConfig) -> Vec<String>;

/// Ordered set of predicates an upgrade config must satisfy
pub struct ConfigValidator {
    predicates: Vec<Predicate>,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self {
            predicates: vec![
                cas_template_is_set,
                resources_are_present,
                resources_are_complete,
                resources_share_kind,
            ],
        }
    }
}

impl ConfigValidator {
    /// Add a predicate after the built-in ones
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Run every predicate and collect their violations
    pub fn check(&self, config: &UpgradeConfig) -> Vec<String> {
        self.predicates.iter().flat_map(|p| p(config)).collect()
    }
}

fn cas_template_is_set(config: &UpgradeConfig) -> Vec<String> {
    if config.cas_template.trim().is_empty() {
        vec!["casTemplate must not be empty".to_string()]
    } else {
        Vec::new()
    }
}

fn resources_are_present(config: &UpgradeConfig) -> Vec<String> {
    if config.resources.is_empty() {
        vec!["resources must not be empty".to_string()]
    } else {
        Vec::new()
    }
}

fn resources_are_complete(config: &UpgradeConfig) -> Vec<String> {
    let mut errors = Vec::new();
    for (i, r) in config.resources.iter().enumerate() {
        for (field, value) in [("kind", &r.kind), ("name", &r.name), ("namespace", &r.namespace)] {
            if value.trim().is_empty() {
                errors.push(format!("resources[{i}].{field} must not be empty"));
            }
        }
    }
    errors
}

fn resources_share_kind(config: &UpgradeConfig) -> Vec<String> {
    let kinds: BTreeSet<&str> = config
        .resources
        .iter()
        .map(|r| r.kind.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if kinds.len() > 1 {
        vec![format!(
            "resources must share one kind, found {}",
            kinds.into_iter().collect::<Vec<_>>().join(", ")
        )]
    } else {
        Vec::new()
    }
}
