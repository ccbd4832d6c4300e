//! The engine value tree
//!
//! Run-tasks are rendered against a nested map of values. The tree is a
//! `serde_json::Value` object with a handful of reserved top-level keys and
//! dotted path helpers for reading and writing into it.
//!
//! Path syntax: `a.b.c`, `a.b[0].c` or `a.b.0.c`. A leading `.` and a
//! surrounding `{...}` (jsonpath style) are accepted and ignored.

use serde_json::{Map, Value};

use crate::Error;

/// Defaults from the CAS template, keyed by config name
pub const CONFIG_KEY: &str = "Config";
/// Runtime data from the upgrade config, keyed by item name
pub const RUNTIME_KEY: &str = "Runtime";
/// Identity of the resource being upgraded
pub const UPGRADE_ITEM_KEY: &str = "UpgradeItem";
/// List-typed task output, keyed by task name
pub const LIST_ITEMS_KEY: &str = "ListItems";
/// Result of every executed task, keyed by task name
pub const TASK_RESULT_KEY: &str = "TaskResult";
/// Labels of the CAS template
pub const CAS_OPTIONS_KEY: &str = "CASOptions";

/// Top-level keys seeded once by the engine; path writes under them fail
pub const READ_ONLY_KEYS: [&str; 2] = [CONFIG_KEY, CAS_OPTIONS_KEY];

/// One step of a value path
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    /// Object field
    Key(String),
    /// Array index
    Index(usize),
}

/// Parse a dotted path into segments
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, Error> {
    let trimmed = path.trim();
    let trimmed = trimmed
        .strip_prefix('{')
        .and_then(|p| p.strip_suffix('}'))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);

    if trimmed.is_empty() {
        return Err(Error::validation(format!("empty value path {path:?}")));
    }

    let mut segments = Vec::new();
    for part in trimmed.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };

        if !key.is_empty() {
            segments.push(match key.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(key.to_string()),
            });
        } else if rest.is_empty() {
            return Err(Error::validation(format!("empty segment in value path {path:?}")));
        }

        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| Error::validation(format!("unclosed '[' in value path {path:?}")))?;
            let index = rest[1..close].trim().parse::<usize>().map_err(|_| {
                Error::validation(format!("invalid index {:?} in value path {path:?}", &rest[1..close]))
            })?;
            segments.push(PathSegment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(Error::validation(format!("unexpected {rest:?} in value path {path:?}")));
            }
        }
    }
    Ok(segments)
}

/// Read the value at `path` inside `value`
///
/// Returns `None` when the path does not resolve or cannot be parsed. A
/// numeric segment also reads an object field of the same name.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path).ok()?;
    let mut current = value;
    for segment in &segments {
        current = match (segment, current) {
            (PathSegment::Key(k), Value::Object(map)) => map.get(k)?,
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
            (PathSegment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Nested map of values used to render run-tasks
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueTree {
    root: Map<String, Value>,
}

impl ValueTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a top-level key
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.root.insert(key.into(), value);
    }

    /// Read a top-level key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Read a nested value by path
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let segments = parse_path(path).ok()?;
        let (first, rest) = segments.split_first()?;
        let PathSegment::Key(key) = first else {
            return None;
        };
        let mut current = self.root.get(key)?;
        for segment in rest {
            current = match (segment, current) {
                (PathSegment::Key(k), Value::Object(map)) => map.get(k)?,
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
                (PathSegment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write a value at `path`, creating intermediate objects
    ///
    /// Paths under [`READ_ONLY_KEYS`] are rejected. Writes are
    /// last-write-wins: a non-container value in the way is replaced by an
    /// object. Array indices may address an existing element or append at
    /// the end.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<(), Error> {
        let segments = parse_path(path)?;
        self.set_segments(path, &segments, value)
    }

    /// Write a value under literal keys, bypassing path parsing
    ///
    /// Used for keys that may contain `.` such as task names.
    pub fn set_keys(&mut self, keys: &[&str], value: Value) -> Result<(), Error> {
        let segments: Vec<PathSegment> = keys
            .iter()
            .map(|k| PathSegment::Key((*k).to_string()))
            .collect();
        self.set_segments(&keys.join("."), &segments, value)
    }

    /// Append a value to the array at `path`, creating it if missing
    pub fn append_path(&mut self, path: &str, value: Value) -> Result<(), Error> {
        let mut list = match self.get_path(path) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        };
        list.push(value);
        self.set_path(path, Value::Array(list))
    }

    /// Snapshot of the whole tree as a JSON object
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    fn set_segments(&mut self, path: &str, segments: &[PathSegment], value: Value) -> Result<(), Error> {
        let Some((PathSegment::Key(first), rest)) = segments.split_first() else {
            return Err(Error::validation(format!(
                "value path {path:?} must start with a key"
            )));
        };
        if READ_ONLY_KEYS.contains(&first.as_str()) {
            return Err(Error::validation(format!(
                "value path {path:?} writes under read-only {first}"
            )));
        }
        let slot = self.root.entry(first.clone()).or_insert(Value::Null);
        set_in(slot, rest, value, path)
    }
}

fn set_in(slot: &mut Value, segments: &[PathSegment], value: Value, path: &str) -> Result<(), Error> {
    let Some((segment, rest)) = segments.split_first() else {
        *slot = value;
        return Ok(());
    };

    match segment {
        PathSegment::Key(key) => {
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(map) = slot else {
                unreachable!("slot was just made an object");
            };
            let child = map.entry(key.clone()).or_insert(Value::Null);
            set_in(child, rest, value, path)
        }
        PathSegment::Index(index) => match slot {
            Value::Array(items) if *index < items.len() => set_in(&mut items[*index], rest, value, path),
            Value::Array(items) if *index == items.len() => {
                items.push(Value::Null);
                set_in(&mut items[*index], rest, value, path)
            }
            Value::Array(items) => Err(Error::validation(format!(
                "index {index} out of bounds (len {}) in value path {path:?}",
                items.len()
            ))),
            Value::Object(map) => {
                let child = map.entry(index.to_string()).or_insert(Value::Null);
                set_in(child, rest, value, path)
            }
            other => {
                if *index != 0 {
                    return Err(Error::validation(format!(
                        "index {index} out of bounds (len 0) in value path {path:?}"
                    )));
                }
                *other = Value::Array(vec![Value::Null]);
                let Value::Array(items) = other else {
                    unreachable!("slot was just made an array");
                };
                set_in(&mut items[0], rest, value, path)
            }
        },
    }
}
