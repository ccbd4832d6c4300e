//! Common types for the maya upgrade engine: CRDs, errors, the value tree and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;
pub mod values;

pub use error::{Error, ErrorKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for writes issued by the upgrade job
pub const FIELD_MANAGER: &str = "maya-upgrade";

/// Label carrying the name of the upgrade job that owns an UpgradeResult
pub const UPGRADE_JOB_NAME_LABEL: &str = "upgradejob.openebs.io/name";

/// Label carrying the name of the resource an UpgradeResult tracks
pub const UPGRADE_ITEM_NAME_LABEL: &str = "upgradeitem.openebs.io/name";

/// Label carrying the namespace of the resource an UpgradeResult tracks
pub const UPGRADE_ITEM_NAMESPACE_LABEL: &str = "upgradeitem.openebs.io/namespace";

/// Label carrying the kind of the resource an UpgradeResult tracks
pub const UPGRADE_ITEM_KIND_LABEL: &str = "upgradeitem.openebs.io/kind";
