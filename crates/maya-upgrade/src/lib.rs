//! Upgrade job for OpenEBS-style storage resources
//!
//! Loads and validates an upgrade config, then upgrades each listed resource
//! by running a CAS template through the CAST engine, recording per-task
//! progress in an UpgradeResult so an interrupted job can be resumed.

#![deny(missing_docs)]

pub mod castemplate;
pub mod config;
pub mod error;
pub mod executor;
pub mod result;

#[cfg(test)]
mod fake;

pub use config::{ConfigValidator, UpgradeConfig};
pub use error::{Result, UpgradeError};
pub use executor::{Collaborators, Executor, ExecutorReport, PodIdentity};
