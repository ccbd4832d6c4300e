//! Custom Resource Definitions read and written by the upgrade engine

mod cas_template;
mod run_task;
mod types;
mod upgrade_result;

pub use cas_template::{CasTemplate, CasTemplateSpec, RunTasks};
pub use run_task::{PostExtraction, RunTask, RunTaskSpec};
pub use types::{Config, DataItem, ErrorCategory, ResourceRef};
pub use upgrade_result::{
    ResourceState, ResultConfig, StateSlot, TaskProgress, TaskStatus, TaskUpdate, UpgradeResult,
    UpgradeResultSpec, UpgradeResultStatus,
};
