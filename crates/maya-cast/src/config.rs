//! Config merging and conversion into the value tree
//!
//! Both the template defaults and the runtime data end up in the value tree
//! as `{name: {enabled, value}}` maps. Entries with non-empty `data` also
//! carry it under a `data` key.

use std::collections::HashSet;

use maya_common::crd::{Config, DataItem};
use serde_json::{json, Map, Value};

use crate::error::EngineError;

/// Merge two config lists, high priority first
///
/// High priority entries are kept in order, then low priority entries whose
/// trimmed name was not seen are appended. Within either list the first
/// occurrence of a name wins.
pub fn merge_config(high: &[Config], low: &[Config]) -> Vec<Config> {
    let mut seen = HashSet::new();
    high.iter()
        .chain(low.iter())
        .filter(|c| seen.insert(c.name.trim().to_string()))
        .cloned()
        .collect()
}

/// Convert runtime data items into config entries
pub fn data_to_config(items: &[DataItem]) -> Vec<Config> {
    items.iter().map(Config::from).collect()
}

/// Convert an ordered config list into a `{name: {enabled, value}}` object
///
/// Empty names and duplicate names are rejected. Merging is the caller's
/// job and must happen before this call.
pub fn config_to_map(configs: &[Config]) -> Result<Value, EngineError> {
    let mut map = Map::new();
    for config in configs {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(EngineError::ConfigInvalid {
                message: format!("missing config name (value {:?})", config.value),
            });
        }
        if map.contains_key(name) {
            return Err(EngineError::ConfigInvalid {
                message: format!("duplicate config name {name:?}"),
            });
        }

        let mut entry = json!({
            "enabled": config.enabled,
            "value": config.value,
        });
        if !config.data.is_empty() {
            entry["data"] = json!(config.data);
        }
        map.insert(name.to_string(), entry);
    }
    Ok(Value::Object(map))
}
