//! Template catalog: every subdirectory of the templates root, each with the
//! shared base config overlaid by its own `config.yml`.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::{Value, json};
use serde_yaml::{Mapping, Value as YamlValue};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    application::render::{TemplateEngine, TeraEngine},
    domain::{
        error::DomainError,
        template::{TemplateConfig, TemplateDescriptor},
    },
};

pub const CONFIG_FILE: &str = "config.yml";

/// Base-config key holding access tokens; it never reaches a template.
const ACCESS_KEY: &str = "access";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed YAML in {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config in {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: DomainError,
    },
}

#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: Vec<TemplateDescriptor>,
}

impl TemplateCatalog {
    /// Scan `root`. A missing root yields an empty catalog.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let root = root.into();
        if !root.is_dir() {
            warn!(
                target = "application::catalog",
                root = %root.display(),
                "templates root does not exist"
            );
            return Ok(Self::default());
        }

        let mut base = read_mapping(&root.join(CONFIG_FILE))?.unwrap_or_default();
        base.remove(ACCESS_KEY);

        let mut templates = Vec::new();
        for dir in template_dirs(&root)? {
            let Some(name) = dir.file_name().map(|name| name.to_string_lossy().into_owned())
            else {
                continue;
            };
            let config_path = dir.join(CONFIG_FILE);
            let mut merged = base.clone();
            if let Some(own) = read_mapping(&config_path)? {
                for (key, value) in own {
                    merged.insert(key, value);
                }
            }
            let config = TemplateConfig::from_yaml_value(YamlValue::Mapping(merged))
                .map_err(|source| CatalogError::Config {
                    path: config_path,
                    source,
                })?;
            debug!(
                target = "application::catalog",
                template = %name,
                callbacks = config.callbacks.len(),
                "template loaded"
            );
            templates.push(TemplateDescriptor::new(name, dir, config));
        }

        info!(
            target = "application::catalog",
            root = %root.display(),
            templates = templates.len(),
            "template catalog loaded"
        );
        Ok(Self { templates })
    }

    pub fn get(&self, name: &str) -> Option<&TemplateDescriptor> {
        self.templates.iter().find(|template| template.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|template| template.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates with at least one selector that is truthy for `{ data: <data> }`.
    pub fn select(&self, data: &Value) -> Vec<&TemplateDescriptor> {
        self.select_with(&TeraEngine, data)
    }

    pub fn select_with(&self, engine: &dyn TemplateEngine, data: &Value) -> Vec<&TemplateDescriptor> {
        let context = json!({ "data": data });
        self.templates
            .iter()
            .filter(|template| {
                template
                    .config
                    .selectors()
                    .iter()
                    .any(|selector| selector_matches(engine, &template.name, selector, &context))
            })
            .collect()
    }
}

fn selector_matches(engine: &dyn TemplateEngine, template: &str, selector: &str, context: &Value) -> bool {
    let source = format!("{{% if {selector} %}}true{{% endif %}}");
    match engine.render_str(&source, context) {
        Ok(output) => {
            let matched = output == "true";
            debug!(
                target = "application::catalog",
                template,
                selector,
                matched,
                "selector evaluated"
            );
            matched
        }
        Err(err) => {
            warn!(
                target = "application::catalog",
                template,
                selector,
                error = %err,
                "selector failed to evaluate"
            );
            false
        }
    }
}

/// Non-hidden subdirectories of `root`, sorted by name.
fn template_dirs(root: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let io_error = |source: io::Error| CatalogError::Io {
        path: root.to_path_buf(),
        source,
    };

    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Top-level mapping of a YAML file; `None` when the file does not exist.
fn read_mapping(path: &Path) -> Result<Option<Mapping>, CatalogError> {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CatalogError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let value: YamlValue = serde_yaml::from_str(&source).map_err(|source| CatalogError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        YamlValue::Null => Ok(Some(Mapping::new())),
        YamlValue::Mapping(mapping) => Ok(Some(mapping)),
        _ => Err(CatalogError::Config {
            path: path.to_path_buf(),
            source: DomainError::invalid_config("top level must be a mapping"),
        }),
    }
}
