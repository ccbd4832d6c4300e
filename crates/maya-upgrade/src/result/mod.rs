//! UpgradeResult records: lookup, creation and per-task progress

mod client;
mod registry;

pub use client::{KubeUpgradeResultClient, UpgradeResultClient};
pub use registry::{
    record_labels, GetOrCreateRequest, GetOrCreateRequestBuilder, UpgradeResultRecorder,
    UpgradeResultRegistry,
};

#[cfg(test)]
pub use client::MockUpgradeResultClient;
