use std::{error::Error as StdError, path::Path};

use serde_json::Value;
use tera::{Context, Tera};

use super::{
    loader::load_template_set,
    types::{RenderError, TemplateEngine, json_kind},
};
use crate::domain::template::RenderOptions;

const INLINE_TEMPLATE_NAME: &str = "<inline>";

/// Tera-backed engine. Every call builds a fresh `Tera` instance from the
/// files it needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeraEngine;

impl TemplateEngine for TeraEngine {
    fn render_file(
        &self,
        root: &Path,
        name: &str,
        data: &Value,
        options: &RenderOptions,
    ) -> Result<String, RenderError> {
        let context = context_from(data)?;
        let templates = load_template_set(root, name)?;

        let mut tera = Tera::default();
        tera.autoescape_on(if options.autoescape() {
            vec![""]
        } else {
            Vec::new()
        });
        tera.add_raw_templates(templates)
            .map_err(|err| engine_error(name, &err))?;

        let mut rendered = tera
            .render(name, &context)
            .map_err(|err| engine_error(name, &err))?;

        if !options.keep_trailing_newline() {
            strip_trailing_newline(&mut rendered);
        }
        Ok(rendered)
    }

    fn render_str(&self, source: &str, data: &Value) -> Result<String, RenderError> {
        let context = context_from(data)?;
        Tera::one_off(source, &context, false)
            .map_err(|err| engine_error(INLINE_TEMPLATE_NAME, &err))
    }
}

fn context_from(data: &Value) -> Result<Context, RenderError> {
    if !data.is_object() {
        return Err(RenderError::Context {
            kind: json_kind(data),
        });
    }
    Context::from_value(data.clone()).map_err(|err| engine_error(INLINE_TEMPLATE_NAME, &err))
}

fn engine_error(name: &str, error: &tera::Error) -> RenderError {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(inner) = current {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        current = inner.source();
    }
    RenderError::Engine {
        name: name.to_string(),
        message,
    }
}

fn strip_trailing_newline(rendered: &mut String) {
    if rendered.ends_with('\n') {
        rendered.pop();
        if rendered.ends_with('\r') {
            rendered.pop();
        }
    }
}
