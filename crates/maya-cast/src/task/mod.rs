//! Run-task fetching, execution and sequencing

mod executor;
mod fetch;
mod kube_executor;
mod runner;

pub use executor::{ExecOutput, TaskExecutor, TaskInvocation};
pub use fetch::{CachedTaskSpecFetcher, KubeTaskSpecFetcher, TaskSpecFetcher};
pub use kube_executor::{KubeTaskExecutor, TaskAction, TaskMeta};
pub use runner::{GroupOutcome, PreparedTask, TaskEnv, TaskGroupRunner};

#[cfg(test)]
pub use executor::MockTaskExecutor;
#[cfg(test)]
pub use fetch::MockTaskSpecFetcher;
