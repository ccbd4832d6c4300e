//! CAS template engine
//!
//! Builds an engine for one unit of upgrade from a CAS template, runtime data
//! and an UpgradeResult, then runs the template's run-tasks in order against
//! a shared value tree.

pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod task;
pub mod template;

pub use engine::{CastEngine, EngineBuilder, EngineOutput};
pub use error::{EngineError, TaskExecError};
pub use progress::{NoopProgress, ProgressSink};
pub use task::{
    CachedTaskSpecFetcher, ExecOutput, KubeTaskExecutor, KubeTaskSpecFetcher, TaskExecutor,
    TaskInvocation, TaskSpecFetcher,
};
