use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::domain::template::RenderOptions;

/// Structured errors surfaced by the template engine. Every variant is fatal
/// to the job that triggered it.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("job data must be a JSON object, got {kind}")]
    Context { kind: &'static str },
    #[error("failed to load template `{name}`: {message}")]
    Load { name: String, message: String },
    #[error("template reference `{reference}` in `{name}` escapes the template directory")]
    Escape { reference: String, name: String },
    #[error("template `{name}` failed to render: {message}")]
    Engine { name: String, message: String },
}

/// Seam between the pipeline and the template language.
///
/// Implementations must be deterministic: the same inputs produce the same
/// output or the same error.
pub trait TemplateEngine: Send + Sync {
    /// Render the template stored at `root/name`. Other templates it references
    /// are resolved relative to `root`.
    fn render_file(
        &self,
        root: &Path,
        name: &str,
        data: &Value,
        options: &RenderOptions,
    ) -> Result<String, RenderError>;

    /// Render an inline template string.
    fn render_str(&self, source: &str, data: &Value) -> Result<String, RenderError>;
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
