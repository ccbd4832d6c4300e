//! Template environment bound to one CAST engine

use std::sync::{Arc, Mutex};

use minijinja::{Environment, UndefinedBehavior};

use super::error::TemplateError;
use super::filters;
use super::functions::{self, RenderEffects, SharedEffects};

/// Output of a successful render
#[derive(Debug)]
pub struct Rendered {
    /// Rendered text
    pub output: String,
    /// Effects requested by template functions during the render
    pub effects: RenderEffects,
}

/// Template engine for run-task bodies
///
/// Supports:
/// - `{{ ... }}` expressions over the value tree
/// - `{% for %}` / `{% if %}` blocks
/// - Strict undefined variable handling
/// - A fixed set of filters and effectful functions
///
/// One environment is created per CAST engine so that effectful functions
/// are bound to that engine's effect buffer.
pub struct TemplateEngine {
    env: Environment<'static>,
    effects: SharedEffects,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);

        env.add_filter("default", filters::default_filter);
        env.add_filter("required", filters::required);
        env.add_filter("base64_encode", filters::base64_encode);
        env.add_filter("base64_decode", filters::base64_decode);
        env.add_filter("upper", filters::upper);
        env.add_filter("lower", filters::lower);
        env.add_filter("to_yaml", filters::to_yaml);
        env.add_filter("from_yaml", filters::from_yaml);
        env.add_filter("to_json", filters::to_json);
        env.add_filter("json_path", filters::json_path);
        env.add_filter("split_list_trim", filters::split_list_trim);
        env.add_filter("pick_prefix", filters::pick_prefix);
        env.add_filter("pick_suffix", filters::pick_suffix);
        env.add_filter("pick_contains", filters::pick_contains);
        env.add_filter("is_len", filters::is_len);

        let effects: SharedEffects = Arc::new(Mutex::new(RenderEffects::default()));
        functions::register(&mut env, &effects);

        Self { env, effects }
    }

    /// Render a template against the given values
    ///
    /// Effects are only returned for a successful render; a failed render
    /// discards whatever its functions queued.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError` if:
    /// - Template syntax is invalid
    /// - A referenced variable is undefined
    /// - A filter or function fails
    pub fn render(&self, template: &str, values: &serde_json::Value) -> Result<Rendered, TemplateError> {
        self.take_effects()?;
        let output = self.env.render_str(template, values)?;
        let effects = self.take_effects()?;
        Ok(Rendered { output, effects })
    }

    fn take_effects(&self) -> Result<RenderEffects, TemplateError> {
        let mut guard = functions::lock(&self.effects)
            .map_err(|e| TemplateError::Effects(e.to_string()))?;
        Ok(std::mem::take(&mut *guard))
    }
}
