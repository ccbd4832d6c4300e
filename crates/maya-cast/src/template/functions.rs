//! Functions with side effects on the engine
//!
//! Template functions cannot touch the value tree or the cluster directly
//! since the tree is borrowed for the render. They push effects into a shared
//! buffer instead; the runner drains it after a successful render.

use std::sync::{Arc, Mutex, MutexGuard};

use maya_common::crd::{ErrorCategory, ResourceState, StateSlot, TaskStatus, TaskUpdate};
use minijinja::value::Rest;
use minijinja::{Environment, Error, ErrorKind, Value};

use super::filters::to_serde;
use crate::error::TaskExecError;

/// A value tree write requested by a template
#[derive(Clone, Debug, PartialEq)]
pub enum ValueWrite {
    /// Replace the value at `path`
    Set {
        /// Destination path
        path: String,
        /// Value to write
        value: serde_json::Value,
    },
    /// Append to the list at `path`
    Append {
        /// Destination path
        path: String,
        /// Value to append
        value: serde_json::Value,
    },
}

/// An UpgradeResult write requested by a template
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEffect {
    /// Update one task slot
    Task(TaskUpdate),
    /// Record the pre or post state of the target
    State {
        /// Which slot
        slot: StateSlot,
        /// State to record
        state: ResourceState,
    },
}

/// Everything a render asked the engine to do
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderEffects {
    /// Value tree writes, in call order
    pub writes: Vec<ValueWrite>,
    /// Progress updates, in call order
    pub progress: Vec<ProgressEffect>,
    /// First error signalled by the template, if any
    pub signal: Option<TaskExecError>,
}

pub(crate) type SharedEffects = Arc<Mutex<RenderEffects>>;

pub(crate) fn lock(effects: &SharedEffects) -> Result<MutexGuard<'_, RenderEffects>, Error> {
    effects
        .lock()
        .map_err(|_| Error::new(ErrorKind::InvalidOperation, "render effects lock poisoned"))
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, msg.into())
}

/// Register every effectful function on the environment
pub(crate) fn register(env: &mut Environment<'static>, effects: &SharedEffects) {
    env.add_function("noop", |_args: Rest<Value>| String::new());

    let fx = effects.clone();
    env.add_function(
        "save_as",
        move |value: Value, path: String| -> Result<String, Error> {
            let value = to_serde(&value)?;
            lock(&fx)?.writes.push(ValueWrite::Set { path, value });
            Ok(String::new())
        },
    );

    let fx = effects.clone();
    env.add_function(
        "save_if",
        move |value: Value, path: String, cond: Value| -> Result<String, Error> {
            if cond.is_true() {
                let value = to_serde(&value)?;
                lock(&fx)?.writes.push(ValueWrite::Set { path, value });
            }
            Ok(String::new())
        },
    );

    let fx = effects.clone();
    env.add_function(
        "add_to",
        move |value: Value, path: String| -> Result<String, Error> {
            let value = to_serde(&value)?;
            lock(&fx)?.writes.push(ValueWrite::Append { path, value });
            Ok(String::new())
        },
    );

    let fx = effects.clone();
    env.add_function(
        "update_task_status",
        move |task: String, status: String, message: Option<String>| -> Result<String, Error> {
            let status: TaskStatus = status.parse().map_err(|e| invalid(format!("{e}")))?;
            let mut update = TaskUpdate::status(task, status);
            update.message = message;
            lock(&fx)?.progress.push(ProgressEffect::Task(update));
            Ok(String::new())
        },
    );

    let fx = effects.clone();
    env.add_function(
        "record_state",
        move |slot: String, status: String, message: Option<String>| -> Result<String, Error> {
            let slot: StateSlot = slot.parse().map_err(|e| invalid(format!("{e}")))?;
            let state = ResourceState {
                status,
                message,
                last_transition_time: Some(chrono::Utc::now()),
            };
            lock(&fx)?.progress.push(ProgressEffect::State { slot, state });
            Ok(String::new())
        },
    );

    register_signal(env, effects, "version_mismatch_err", ErrorCategory::VersionMismatch);
    register_signal(env, effects, "not_found_err", ErrorCategory::NotFound);
    register_signal(env, effects, "verify_err", ErrorCategory::Verify);
}

// `name(message, cond)` signals a task error of `category` when cond is truthy.
// A missing cond counts as true.
fn register_signal(
    env: &mut Environment<'static>,
    effects: &SharedEffects,
    name: &'static str,
    category: ErrorCategory,
) {
    let fx = effects.clone();
    env.add_function(
        name,
        move |message: String, cond: Option<Value>| -> Result<String, Error> {
            if cond.map(|c| c.is_true()).unwrap_or(true) {
                let mut effects = lock(&fx)?;
                if effects.signal.is_none() {
                    effects.signal = Some(TaskExecError::new(category, message));
                }
            }
            Ok(String::new())
        },
    );
}
