//! Sequential execution of a template's run-tasks
//!
//! Every task goes through render, execute (with retries), merge and
//! progress recording. A failed task may be recovered by the group's
//! fallback task when its error category matches the fallback trigger.

use std::time::Duration;

use chrono::Utc;
use maya_common::crd::{ErrorCategory, RunTaskSpec, TaskStatus, TaskUpdate};
use maya_common::retry::{retry_when, RetryConfig};
use maya_common::values::{lookup, ValueTree, LIST_ITEMS_KEY, TASK_RESULT_KEY};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::executor::{ExecOutput, TaskExecutor, TaskInvocation};
use crate::error::{EngineError, TaskExecError};
use crate::progress::ProgressSink;
use crate::template::{ProgressEffect, RenderEffects, TemplateEngine, ValueWrite};

/// A fetched run-task with its retry policy resolved
#[derive(Clone, Debug)]
pub struct PreparedTask {
    /// Run-task name
    pub name: String,
    /// The fetched spec
    pub spec: RunTaskSpec,
    retry: RetryConfig,
    timeout: Option<Duration>,
}

impl PreparedTask {
    /// Resolve durations of a fetched spec
    pub fn new(name: impl Into<String>, spec: RunTaskSpec) -> Result<Self, EngineError> {
        let name = name.into();
        let interval = spec
            .retry_interval()
            .map_err(|e| EngineError::invalid_task(&name, e.to_string()))?;
        let timeout = spec
            .timeout()
            .map_err(|e| EngineError::invalid_task(&name, e.to_string()))?;
        Ok(Self {
            retry: RetryConfig::fixed(spec.retries, interval),
            timeout,
            name,
            spec,
        })
    }
}

/// Everything a task run touches
pub struct TaskEnv<'a> {
    /// The engine value tree
    pub values: &'a mut ValueTree,
    /// Template environment of the engine
    pub templates: &'a TemplateEngine,
    /// Executor for rendered tasks
    pub executor: &'a dyn TaskExecutor,
    /// Receiver of task progress
    pub progress: &'a dyn ProgressSink,
    /// Cancels the run at the next suspension point
    pub cancel: &'a CancellationToken,
}

/// Result of a completed group run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupOutcome {
    /// Rendered output task, empty without one
    pub output: String,
    /// Non-fatal tasks that failed
    pub failed_non_fatal: Vec<String>,
}

/// Runs an ordered group of tasks plus optional output and fallback tasks
#[derive(Debug, Default)]
pub struct TaskGroupRunner {
    tasks: Vec<PreparedTask>,
    output: Option<PreparedTask>,
    fallback: Option<PreparedTask>,
}

impl TaskGroupRunner {
    /// Create an empty runner
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to the plan
    pub fn add_task(&mut self, task: PreparedTask) {
        self.tasks.push(task);
    }

    /// Set the task rendered as the group output
    pub fn set_output(&mut self, task: PreparedTask) {
        self.output = Some(task);
    }

    /// Set the task used to recover matching failures
    pub fn set_fallback(&mut self, task: PreparedTask) {
        self.fallback = Some(task);
    }

    /// Names of the planned tasks, in order
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Run every task in order, then render the output task
    ///
    /// Stops at the first failure of a task that is not non-fatal.
    pub async fn run(&self, env: &mut TaskEnv<'_>) -> Result<GroupOutcome, EngineError> {
        let mut failed_non_fatal = Vec::new();

        for task in &self.tasks {
            match self.run_task(task, env).await {
                Ok(()) => {}
                Err(err) if task.spec.non_fatal && !matches!(err, EngineError::Cancelled { .. }) => {
                    warn!(task = %task.name, error = %err, "non-fatal task failed, continuing");
                    failed_non_fatal.push(task.name.clone());
                }
                Err(err) => return Err(err),
            }
        }

        let output = match &self.output {
            Some(task) => self.render_output(task, env).await?,
            None => String::new(),
        };

        Ok(GroupOutcome {
            output,
            failed_non_fatal,
        })
    }

    async fn run_task(&self, task: &PreparedTask, env: &mut TaskEnv<'_>) -> Result<(), EngineError> {
        info!(task = %task.name, "task started");
        record(env, task, TaskUpdate::running(&task.name, Utc::now())).await?;

        let err = match self.attempt(task, env).await {
            Ok(retries) => {
                info!(task = %task.name, retries, "task succeeded");
                let done = TaskUpdate::finished(&task.name, TaskStatus::Succeeded, retries, Utc::now())
                    .with_message("task completed");
                return record(env, task, done).await;
            }
            Err(err) => err,
        };
        let retries = retries_of(&err);

        if let Some(fallback) = self.fallback_for(task, &err) {
            warn!(task = %task.name, fallback = %fallback.name, error = %err, "task failed, running fallback");
            match self.attempt(fallback, env).await {
                Ok(_) => {
                    info!(task = %task.name, fallback = %fallback.name, "task recovered by fallback");
                    let done = TaskUpdate::finished(
                        &task.name,
                        TaskStatus::SucceededViaFallback,
                        retries,
                        Utc::now(),
                    )
                    .with_message(format!("recovered by fallback task {}", fallback.name))
                    .with_error(err.to_string());
                    return record(env, task, done).await;
                }
                Err(fallback_err) => {
                    let failed = TaskUpdate::finished(&task.name, TaskStatus::Failed, retries, Utc::now())
                        .with_message(format!("fallback task {} failed: {}", fallback.name, fallback_err))
                        .with_error(err.to_string());
                    record_failure(env, task, failed).await;
                    return Err(fallback_err);
                }
            }
        }

        warn!(task = %task.name, error = %err, "task failed");
        let failed = TaskUpdate::finished(&task.name, TaskStatus::Failed, retries, Utc::now())
            .with_message("task failed")
            .with_error(err.to_string());
        record_failure(env, task, failed).await;
        Err(err)
    }

    fn fallback_for(&self, task: &PreparedTask, err: &EngineError) -> Option<&PreparedTask> {
        let fallback = self.fallback.as_ref()?;
        let category = err.fallback_category()?;
        let trigger = task
            .spec
            .fallback_on
            .or(fallback.spec.fallback_on)
            .unwrap_or(ErrorCategory::VersionMismatch);
        (category == trigger).then_some(fallback)
    }

    // Render, execute and merge one task. Returns the retries used.
    async fn attempt(&self, task: &PreparedTask, env: &mut TaskEnv<'_>) -> Result<u32, EngineError> {
        if env.cancel.is_cancelled() {
            return Err(EngineError::cancelled(Some(&task.name)));
        }

        let meta = match &task.spec.meta {
            Some(meta) => Some(render(task, meta, env).await?),
            None => None,
        };
        let body = render(task, &task.spec.task, env).await?;
        let invocation = TaskInvocation {
            task: task.name.clone(),
            meta,
            body,
        };

        let executor = env.executor;
        let timeout = task.timeout;
        let invocation_ref = &invocation;
        let attempted = tokio::select! {
            biased;
            _ = env.cancel.cancelled() => return Err(EngineError::cancelled(Some(&task.name))),
            attempted = retry_when(
                &task.retry,
                &task.name,
                move || async move { execute_once(executor, invocation_ref, timeout).await },
                |_| true,
            ) => attempted,
        };

        let retries = attempted.retries();
        let output = attempted.result.map_err(|source| EngineError::TaskFailed {
            task: task.name.clone(),
            attempts: attempted.attempts,
            source,
        })?;

        merge(task, &output, env.values)?;
        debug!(task = %task.name, retries, "task result merged");
        Ok(retries)
    }

    async fn render_output(&self, task: &PreparedTask, env: &mut TaskEnv<'_>) -> Result<String, EngineError> {
        if env.cancel.is_cancelled() {
            return Err(EngineError::cancelled(Some(&task.name)));
        }
        render(task, &task.spec.task, env).await
    }
}

async fn execute_once(
    executor: &dyn TaskExecutor,
    invocation: &TaskInvocation,
    timeout: Option<Duration>,
) -> Result<ExecOutput, TaskExecError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, executor.execute(invocation))
            .await
            .unwrap_or_else(|_| Err(TaskExecError::generic(format!("timed out after {limit:?}")))),
        None => executor.execute(invocation).await,
    }
}

// Render a template of the task and apply what its functions requested.
async fn render(task: &PreparedTask, template: &str, env: &mut TaskEnv<'_>) -> Result<String, EngineError> {
    let rendered = env
        .templates
        .render(template, &env.values.to_value())
        .map_err(|e| EngineError::render(&task.name, e.to_string()))?;
    apply_effects(task, rendered.effects, env).await?;
    Ok(rendered.output)
}

async fn apply_effects(
    task: &PreparedTask,
    effects: RenderEffects,
    env: &mut TaskEnv<'_>,
) -> Result<(), EngineError> {
    for write in effects.writes {
        let result = match write {
            ValueWrite::Set { path, value } => env.values.set_path(&path, value),
            ValueWrite::Append { path, value } => env.values.append_path(&path, value),
        };
        result.map_err(|e| EngineError::render(&task.name, e.to_string()))?;
    }

    for effect in effects.progress {
        let result = match effect {
            ProgressEffect::Task(update) => env.progress.update_task(update).await,
            ProgressEffect::State { slot, state } => env.progress.record_state(slot, state).await,
        };
        result.map_err(|e| EngineError::persist(&task.name, e))?;
    }

    match effects.signal {
        Some(source) => Err(EngineError::TaskFailed {
            task: task.name.clone(),
            attempts: 0,
            source,
        }),
        None => Ok(()),
    }
}

fn parse_result(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }
    match serde_yaml::from_str::<Value>(trimmed) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn merge(task: &PreparedTask, output: &ExecOutput, values: &mut ValueTree) -> Result<(), EngineError> {
    let parsed = parse_result(&output.result);

    for extraction in task.spec.post.iter().chain(output.extractions.iter()) {
        let source = match extraction.from.trim() {
            "" | "." => Some(&parsed),
            path => lookup(&parsed, path),
        };
        let value = source.cloned().unwrap_or_else(|| Value::String(String::new()));
        values
            .set_path(&extraction.to, value)
            .map_err(|e| EngineError::invalid_task(&task.name, e.to_string()))?;
    }

    if let Some(items @ Value::Array(_)) = parsed.get("items") {
        values.set_keys(&[LIST_ITEMS_KEY, task.name.as_str()], items.clone())?;
    }
    values.set_keys(&[TASK_RESULT_KEY, task.name.as_str()], parsed)?;
    Ok(())
}

async fn record(env: &TaskEnv<'_>, task: &PreparedTask, update: TaskUpdate) -> Result<(), EngineError> {
    if !task.spec.record_progress {
        return Ok(());
    }
    env.progress
        .update_task(update)
        .await
        .map_err(|e| EngineError::persist(&task.name, e))
}

// The task error is what the caller needs to see, so a failed write of the
// failure itself is only logged.
async fn record_failure(env: &TaskEnv<'_>, task: &PreparedTask, update: TaskUpdate) {
    if let Err(e) = record(env, task, update).await {
        warn!(task = %task.name, error = %e, "failed to record task failure");
    }
}

fn retries_of(err: &EngineError) -> u32 {
    match err {
        EngineError::TaskFailed { attempts, .. } => attempts.saturating_sub(1),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::executor::MockTaskExecutor;
    use async_trait::async_trait;
    use maya_common::crd::{PostExtraction, ResourceState, StateSlot};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Collects every update in memory
    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<TaskUpdate>>,
        states: Mutex<Vec<(StateSlot, ResourceState)>>,
    }

    impl RecordingSink {
        fn statuses(&self, task: &str) -> Vec<TaskStatus> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.task == task)
                .map(|u| u.status)
                .collect()
        }

        fn last(&self, task: &str) -> TaskUpdate {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|u| u.task == task)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn update_task(&self, update: TaskUpdate) -> Result<(), maya_common::Error> {
            self.updates.lock().unwrap().push(update);
            Ok(())
        }

        async fn record_state(&self, slot: StateSlot, state: ResourceState) -> Result<(), maya_common::Error> {
            self.states.lock().unwrap().push((slot, state));
            Ok(())
        }
    }

    fn task(name: &str, body: &str) -> PreparedTask {
        PreparedTask::new(
            name,
            RunTaskSpec {
                task: body.to_string(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn task_with(name: &str, spec: RunTaskSpec) -> PreparedTask {
        PreparedTask::new(name, spec).unwrap()
    }

    fn seeded() -> ValueTree {
        let mut values = ValueTree::new();
        values.insert("Config", json!({"replicas": {"enabled": "true", "value": "3"}}));
        values.insert("Runtime", json!({}));
        values.insert("UpgradeItem", json!({"name": "p1", "namespace": "ns", "kind": "Pool"}));
        values.insert(LIST_ITEMS_KEY, json!({}));
        values.insert(TASK_RESULT_KEY, json!({}));
        values
    }

    async fn run(
        runner: &TaskGroupRunner,
        values: &mut ValueTree,
        executor: &dyn TaskExecutor,
        sink: &RecordingSink,
        cancel: &CancellationToken,
    ) -> Result<GroupOutcome, EngineError> {
        let templates = TemplateEngine::new();
        let mut env = TaskEnv {
            values,
            templates: &templates,
            executor,
            progress: sink,
            cancel,
        };
        runner.run(&mut env).await
    }

    fn echo_executor() -> MockTaskExecutor {
        let mut executor = MockTaskExecutor::new();
        executor
            .expect_execute()
            .returning(|inv| Ok(ExecOutput::raw(inv.body.clone())));
        executor
    }

    #[tokio::test]
    async fn tasks_run_in_order_and_feed_later_tasks() {
        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "read",
            RunTaskSpec {
                task: r#"{"metadata": {"name": "pool-{{ UpgradeItem.name }}"}}"#.to_string(),
                post: vec![PostExtraction {
                    from: ".metadata.name".to_string(),
                    to: "Runtime.poolName.value".to_string(),
                }],
                ..Default::default()
            },
        ));
        runner.add_task(task("write", "patched {{ Runtime.poolName.value }} / {{ TaskResult.read.metadata.name }}"));
        runner.set_output(task("out", "done: {{ TaskResult.write }}"));

        let sink = RecordingSink::default();
        let mut values = seeded();
        let outcome = run(&runner, &mut values, &echo_executor(), &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.output, "done: patched pool-p1 / pool-p1");
        assert!(outcome.failed_non_fatal.is_empty());
        assert_eq!(sink.statuses("read"), [TaskStatus::Running, TaskStatus::Succeeded]);
        assert_eq!(sink.statuses("write"), [TaskStatus::Running, TaskStatus::Succeeded]);
        assert!(sink.last("write").end_time.is_some());
        assert!(sink.statuses("out").is_empty());
    }

    #[tokio::test]
    async fn list_results_land_in_list_items() {
        let mut runner = TaskGroupRunner::new();
        runner.add_task(task("pools", "items:\n  - name: a\n  - name: b\n"));
        let mut values = seeded();
        run(&runner, &mut values, &echo_executor(), &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            values.get_path("ListItems.pools"),
            Some(&json!([{"name": "a"}, {"name": "b"}]))
        );
    }

    #[tokio::test]
    async fn missing_extraction_source_writes_empty_value() {
        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "t1",
            RunTaskSpec {
                task: "{}".to_string(),
                post: vec![PostExtraction {
                    from: ".status.phase".to_string(),
                    to: "Runtime.phase".to_string(),
                }],
                ..Default::default()
            },
        ));
        let mut values = seeded();
        run(&runner, &mut values, &echo_executor(), &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(values.get_path("Runtime.phase"), Some(&json!("")));
    }

    #[tokio::test]
    async fn template_writes_to_seeded_keys_are_rejected() {
        let mut runner = TaskGroupRunner::new();
        runner.add_task(task("t1", "{{ save_as('x', 'CASOptions.team') }}"));
        let mut values = seeded();
        let err = run(&runner, &mut values, &echo_executor(), &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RenderFailed { ref task, .. } if task == "t1"));
        assert_eq!(values.get("CASOptions"), None);
    }

    #[tokio::test]
    async fn extractions_into_config_are_rejected() {
        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "t1",
            RunTaskSpec {
                task: r#"{"replicas": "5"}"#.to_string(),
                post: vec![PostExtraction {
                    from: ".replicas".to_string(),
                    to: "Config.replicas.value".to_string(),
                }],
                ..Default::default()
            },
        ));
        let mut values = seeded();
        let err = run(&runner, &mut values, &echo_executor(), &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTask { .. }));
        assert_eq!(values.get_path("Config.replicas.value"), Some(&json!("3")));
    }

    #[tokio::test]
    async fn retries_make_n_plus_one_attempts() {
        let mut executor = MockTaskExecutor::new();
        executor
            .expect_execute()
            .times(3)
            .returning(|_| Err(TaskExecError::generic("pool offline")));

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "t1",
            RunTaskSpec {
                task: "x".to_string(),
                retries: 2,
                ..Default::default()
            },
        ));
        runner.add_task(task("t2", "never"));

        let sink = RecordingSink::default();
        let err = run(&runner, &mut seeded(), &executor, &sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::TaskFailed { attempts: 3, .. }));
        let last = sink.last("t1");
        assert_eq!(last.status, TaskStatus::Failed);
        assert_eq!(last.retries, Some(2));
        assert!(last.last_error.unwrap().contains("pool offline"));
        assert!(sink.statuses("t2").is_empty());
    }

    #[tokio::test]
    async fn zero_retries_fail_on_first_error() {
        let mut executor = MockTaskExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|_| Err(TaskExecError::generic("boom")));

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task("t1", "x"));
        let err = run(&runner, &mut seeded(), &executor, &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TaskFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut executor = MockTaskExecutor::new();
        executor.expect_execute().returning(move |_| {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TaskExecError::generic("transient"))
            } else {
                Ok(ExecOutput::raw("ok"))
            }
        });

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "t1",
            RunTaskSpec {
                task: "x".to_string(),
                retries: 3,
                retry_interval: Some("1ms".to_string()),
                ..Default::default()
            },
        ));
        let sink = RecordingSink::default();
        run(&runner, &mut seeded(), &executor, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.last("t1").retries, Some(1));
    }

    #[tokio::test]
    async fn fallback_recovers_matching_failure() {
        let mut executor = MockTaskExecutor::new();
        executor.expect_execute().returning(|inv| match inv.task.as_str() {
            "t1" => Err(TaskExecError::version_mismatch("pool at 1.x")),
            _ => Ok(ExecOutput::raw(inv.body.clone())),
        });

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task("t1", "upgrade"));
        runner.add_task(task("t2", "after"));
        runner.set_fallback(task("fb", "legacy upgrade"));

        let sink = RecordingSink::default();
        let mut values = seeded();
        run(&runner, &mut values, &executor, &sink, &CancellationToken::new())
            .await
            .unwrap();

        let last = sink.last("t1");
        assert_eq!(last.status, TaskStatus::SucceededViaFallback);
        assert!(last.last_error.unwrap().contains("pool at 1.x"));
        assert_eq!(sink.statuses("t2"), [TaskStatus::Running, TaskStatus::Succeeded]);
        assert!(sink.statuses("fb").is_empty());
        assert_eq!(values.get_path("TaskResult.fb"), Some(&json!("legacy upgrade")));
    }

    #[tokio::test]
    async fn fallback_ignores_other_categories() {
        let mut executor = MockTaskExecutor::new();
        executor.expect_execute().returning(|inv| match inv.task.as_str() {
            "t1" => Err(TaskExecError::generic("disk full")),
            other => panic!("unexpected task {other}"),
        });

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task("t1", "upgrade"));
        runner.set_fallback(task("fb", "legacy"));

        let sink = RecordingSink::default();
        let err = run(&runner, &mut seeded(), &executor, &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TaskFailed { .. }));
        assert_eq!(sink.last("t1").status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn task_declared_trigger_selects_fallback() {
        let mut executor = MockTaskExecutor::new();
        executor.expect_execute().returning(|inv| match inv.task.as_str() {
            "t1" => Err(TaskExecError::not_found("old pool missing")),
            _ => Ok(ExecOutput::empty()),
        });

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "t1",
            RunTaskSpec {
                task: "x".to_string(),
                fallback_on: Some(ErrorCategory::NotFound),
                ..Default::default()
            },
        ));
        runner.set_fallback(task("fb", "y"));

        let sink = RecordingSink::default();
        run(&runner, &mut seeded(), &executor, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sink.last("t1").status, TaskStatus::SucceededViaFallback);
    }

    #[tokio::test]
    async fn failed_fallback_propagates() {
        let mut executor = MockTaskExecutor::new();
        executor.expect_execute().returning(|inv| match inv.task.as_str() {
            "t1" => Err(TaskExecError::version_mismatch("v1")),
            _ => Err(TaskExecError::generic("fallback broke")),
        });

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task("t1", "x"));
        runner.set_fallback(task("fb", "y"));

        let sink = RecordingSink::default();
        let err = run(&runner, &mut seeded(), &executor, &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fallback broke"));
        let last = sink.last("t1");
        assert_eq!(last.status, TaskStatus::Failed);
        assert!(last.message.unwrap().contains("fallback task fb failed"));
    }

    #[tokio::test]
    async fn template_signal_triggers_fallback_without_executing() {
        let mut executor = MockTaskExecutor::new();
        executor.expect_execute().returning(|inv| {
            assert_ne!(inv.task, "t1", "signalled task must not execute");
            Ok(ExecOutput::empty())
        });

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task(
            "t1",
            "{{ version_mismatch_err(\"pool is legacy\", UpgradeItem.kind == \"Pool\") }}",
        ));
        runner.set_fallback(task("fb", "legacy"));

        let sink = RecordingSink::default();
        run(&runner, &mut seeded(), &executor, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sink.last("t1").status, TaskStatus::SucceededViaFallback);
    }

    #[tokio::test]
    async fn render_errors_never_fall_back() {
        let executor = MockTaskExecutor::new();
        let mut runner = TaskGroupRunner::new();
        runner.add_task(task("t1", "{{ Config.nope.value }}"));
        runner.set_fallback(task("fb", "legacy"));

        let sink = RecordingSink::default();
        let err = run(&runner, &mut seeded(), &executor, &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RenderFailed { .. }));
        assert_eq!(sink.last("t1").status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn non_fatal_failure_continues() {
        let mut executor = MockTaskExecutor::new();
        executor.expect_execute().returning(|inv| match inv.task.as_str() {
            "optional" => Err(TaskExecError::generic("metrics unavailable")),
            _ => Ok(ExecOutput::empty()),
        });

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "optional",
            RunTaskSpec {
                task: "x".to_string(),
                non_fatal: true,
                ..Default::default()
            },
        ));
        runner.add_task(task("t2", "y"));

        let sink = RecordingSink::default();
        let outcome = run(&runner, &mut seeded(), &executor, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.failed_non_fatal, ["optional"]);
        assert_eq!(sink.last("optional").status, TaskStatus::Failed);
        assert_eq!(sink.last("t2").status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn progress_can_be_disabled_per_task() {
        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "quiet",
            RunTaskSpec {
                task: "x".to_string(),
                record_progress: false,
                ..Default::default()
            },
        ));
        let sink = RecordingSink::default();
        run(&runner, &mut seeded(), &echo_executor(), &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert!(sink.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn template_progress_functions_reach_the_sink() {
        let mut runner = TaskGroupRunner::new();
        runner.add_task(task(
            "t1",
            "{{ record_state(\"pre\", \"Healthy\") }}{{ update_task_status(\"t2\", \"Running\", \"queued by t1\") }}",
        ));
        let sink = RecordingSink::default();
        run(&runner, &mut seeded(), &echo_executor(), &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sink.states.lock().unwrap()[0].1.status, "Healthy");
        assert_eq!(sink.last("t2").message.as_deref(), Some("queued by t1"));
    }

    #[tokio::test]
    async fn cancellation_stops_before_execution() {
        let executor = MockTaskExecutor::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "t1",
            RunTaskSpec {
                task: "x".to_string(),
                non_fatal: true,
                ..Default::default()
            },
        ));
        runner.set_fallback(task("fb", "y"));

        let err = run(&runner, &mut seeded(), &executor, &RecordingSink::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn timeout_fails_the_attempt() {
        struct Slow;

        #[async_trait]
        impl TaskExecutor for Slow {
            async fn execute(&self, _: &TaskInvocation) -> Result<ExecOutput, TaskExecError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ExecOutput::empty())
            }
        }

        let mut runner = TaskGroupRunner::new();
        runner.add_task(task_with(
            "t1",
            RunTaskSpec {
                task: "x".to_string(),
                timeout: Some("10ms".to_string()),
                ..Default::default()
            },
        ));
        let err = run(&runner, &mut seeded(), &Slow, &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn invalid_durations_are_rejected_at_prepare() {
        let err = PreparedTask::new(
            "t1",
            RunTaskSpec {
                retry_interval: Some("often".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTask { .. }));
    }

    #[test]
    fn result_parsing_prefers_structure() {
        assert_eq!(parse_result("{\"a\": 1}"), json!({"a": 1}));
        assert_eq!(parse_result("a: 1\n"), json!({"a": 1}));
        assert_eq!(parse_result("plain text"), json!("plain text"));
        assert_eq!(parse_result("  "), json!(""));
    }
}
