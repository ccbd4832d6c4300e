//! RunTask CRD types
//!
//! A run-task is one templated unit of work. Its `task` body (and optional
//! `meta` header) are rendered against the engine value tree and handed to a
//! task executor.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ErrorCategory;
use crate::Error;

/// Data key of a legacy ConfigMap run-task holding the meta template
pub const LEGACY_META_KEY: &str = "meta";
/// Data key of a legacy ConfigMap run-task holding the task template
pub const LEGACY_TASK_KEY: &str = "task";
/// Data key of a legacy ConfigMap run-task holding the post extractions
pub const LEGACY_POST_KEY: &str = "post";

/// Copies a value out of a task result into the engine value tree
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PostExtraction {
    /// Path read from the task result, e.g. `.metadata.name`
    pub from: String,
    /// Path written in the value tree, e.g. `Runtime.poolName.value`
    pub to: String,
}

/// Specification of a run-task
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "RunTask",
    plural = "runtasks",
    shortname = "rtask",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskSpec {
    /// Template rendering to the task's meta header (action, kind, target)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,

    /// Template rendering to the task body
    #[serde(default)]
    pub task: String,

    /// Extractions applied after a successful execution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post: Vec<PostExtraction>,

    /// Number of retries after the first failed attempt
    #[serde(default)]
    pub retries: u32,

    /// Delay between attempts, e.g. "5s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<String>,

    /// Deadline of a single attempt, e.g. "2m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Error category that hands a failure of this task to the fallback task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_on: Option<ErrorCategory>,

    /// Record a failure of this task without failing the group
    #[serde(default)]
    pub non_fatal: bool,

    /// Record the progress of this task into the UpgradeResult
    #[serde(default = "default_true")]
    pub record_progress: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RunTaskSpec {
    fn default() -> Self {
        Self {
            meta: None,
            task: String::new(),
            post: Vec::new(),
            retries: 0,
            retry_interval: None,
            timeout: None,
            fallback_on: None,
            non_fatal: false,
            record_progress: true,
        }
    }
}

impl RunTaskSpec {
    /// Build a spec from the data of a legacy ConfigMap run-task
    pub fn from_legacy_data(data: &BTreeMap<String, String>) -> Result<Self, Error> {
        let post = match data.get(LEGACY_POST_KEY).map(|p| p.trim()) {
            Some(p) if !p.is_empty() => serde_yaml::from_str(p).map_err(|e| {
                Error::validation_for_field(LEGACY_POST_KEY, format!("invalid post extractions: {e}"))
            })?,
            _ => Vec::new(),
        };

        Ok(Self {
            meta: data
                .get(LEGACY_META_KEY)
                .filter(|m| !m.trim().is_empty())
                .cloned(),
            task: data.get(LEGACY_TASK_KEY).cloned().unwrap_or_default(),
            post,
            ..Default::default()
        })
    }

    /// Parsed retry interval, zero when unset
    pub fn retry_interval(&self) -> Result<Duration, Error> {
        Ok(parse_duration("retryInterval", self.retry_interval.as_deref())?.unwrap_or_default())
    }

    /// Parsed per-attempt timeout, `None` when unset
    pub fn timeout(&self) -> Result<Option<Duration>, Error> {
        parse_duration("timeout", self.timeout.as_deref())
    }
}

fn parse_duration(field: &str, value: Option<&str>) -> Result<Option<Duration>, Error> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => humantime::parse_duration(v)
            .map(Some)
            .map_err(|e| Error::validation_for_field(field, format!("invalid duration {v:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_record_progress() {
        let spec: RunTaskSpec = serde_yaml::from_str("task: hello").unwrap();
        assert!(spec.record_progress);
        assert!(!spec.non_fatal);
        assert_eq!(spec.retries, 0);
        assert_eq!(spec.retry_interval().unwrap(), Duration::ZERO);
        assert_eq!(spec.timeout().unwrap(), None);
    }

    #[test]
    fn durations_parse_human_readable() {
        let spec: RunTaskSpec = serde_yaml::from_str(
            "task: x\nretries: 2\nretryInterval: 5s\ntimeout: 2m\nfallbackOn: not-found\n",
        )
        .unwrap();
        assert_eq!(spec.retry_interval().unwrap(), Duration::from_secs(5));
        assert_eq!(spec.timeout().unwrap(), Some(Duration::from_secs(120)));
        assert_eq!(spec.fallback_on, Some(ErrorCategory::NotFound));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let spec = RunTaskSpec {
            timeout: Some("soon".to_string()),
            ..Default::default()
        };
        let err = spec.timeout().unwrap_err();
        assert!(matches!(err, Error::Validation { field: Some(ref f), .. } if f == "timeout"));
    }

    #[test]
    fn legacy_config_map_data() {
        let data = BTreeMap::from([
            ("meta".to_string(), "action: output".to_string()),
            ("task".to_string(), "{{ Config.a.value }}".to_string()),
            (
                "post".to_string(),
                "- from: .name\n  to: Runtime.name.value\n".to_string(),
            ),
        ]);
        let spec = RunTaskSpec::from_legacy_data(&data).unwrap();
        assert_eq!(spec.meta.as_deref(), Some("action: output"));
        assert_eq!(spec.post[0].to, "Runtime.name.value");
        assert!(spec.record_progress);
    }

    #[test]
    fn legacy_config_map_with_bad_post() {
        let data = BTreeMap::from([("post".to_string(), "{not: [a list".to_string())]);
        assert!(RunTaskSpec::from_legacy_data(&data).is_err());
    }
}
