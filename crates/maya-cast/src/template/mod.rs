//! Run-task templating
//!
//! Task bodies are Jinja-style templates rendered against the engine value
//! tree. Besides the usual filters, the environment exposes functions that
//! write back into the value tree, queue UpgradeResult progress updates or
//! signal a categorized task error. Those calls are collected as
//! [`RenderEffects`] and applied by the runner once rendering succeeds.

mod engine;
mod error;
mod filters;
mod functions;

pub use engine::{Rendered, TemplateEngine};
pub use error::TemplateError;
pub use functions::{ProgressEffect, RenderEffects, ValueWrite};
