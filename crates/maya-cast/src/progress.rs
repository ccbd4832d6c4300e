//! Where task progress goes
//!
//! The engine reports task state transitions and template-requested record
//! writes through [`ProgressSink`]. The upgrade job backs it with the
//! UpgradeResult registry; engines built without a record use
//! [`NoopProgress`].

use async_trait::async_trait;
use maya_common::crd::{ResourceState, StateSlot, TaskUpdate};
use maya_common::Error;

#[cfg(test)]
use mockall::automock;

/// Receiver of task progress
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Write one task slot
    async fn update_task(&self, update: TaskUpdate) -> Result<(), Error>;

    /// Record the pre or post state of the target
    async fn record_state(&self, slot: StateSlot, state: ResourceState) -> Result<(), Error>;
}

/// Sink that drops every update
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn update_task(&self, _update: TaskUpdate) -> Result<(), Error> {
        Ok(())
    }

    async fn record_state(&self, _slot: StateSlot, _state: ResourceState) -> Result<(), Error> {
        Ok(())
    }
}
