//! Template descriptors and the `config.yml` schema they carry.

use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use super::{error::DomainError, ordered::OrderedMap};

/// A template source directory together with its parsed configuration.
///
/// Owned by the caller and read-only for the duration of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub config: TemplateConfig,
}

impl TemplateDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, config: TemplateConfig) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            config,
        }
    }
}

/// Parsed `config.yml`.
///
/// Keys the pipeline does not consume (`selector`, `access`, ...) are kept in
/// `extra` so the config round-trips unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filetypes: BTreeMap<String, FileTypeConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub post: BTreeMap<String, PostConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub callbacks: OrderedMap<CallbackEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<YamlValue>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, YamlValue>,
}

impl TemplateConfig {
    pub fn from_yaml_str(source: &str) -> Result<Self, DomainError> {
        serde_yaml::from_str::<Option<Self>>(source)
            .map(Option::unwrap_or_default)
            .map_err(|err| DomainError::invalid_config(err.to_string()))
    }

    pub fn from_yaml_value(value: YamlValue) -> Result<Self, DomainError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(|err| DomainError::invalid_config(err.to_string()))
    }

    /// Render options for a type key; a type without an entry renders with defaults.
    pub fn render_options(&self, type_key: &str) -> RenderOptions {
        self.filetypes
            .get(type_key)
            .map(|filetype| filetype.render_options.clone())
            .unwrap_or_default()
    }

    pub fn post_commands(&self, type_key: &str) -> Option<&OrderedMap<Vec<String>>> {
        self.post.get(type_key).map(|post| &post.commands)
    }

    /// Selector expressions, accepting either a single string or a list of strings.
    pub fn selectors(&self) -> Vec<String> {
        match &self.selector {
            Some(YamlValue::String(single)) => vec![single.clone()],
            Some(YamlValue::Sequence(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileTypeConfig {
    #[serde(default, alias = "jinja")]
    pub render_options: RenderOptions,
}

/// Engine options for one rendered file type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoescape: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_trailing_newline: Option<bool>,
    #[serde(flatten)]
    pub unrecognized: BTreeMap<String, YamlValue>,
}

impl RenderOptions {
    pub fn autoescape(&self) -> bool {
        self.autoescape.unwrap_or(false)
    }

    pub fn keep_trailing_newline(&self) -> bool {
        self.keep_trailing_newline.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostConfig {
    #[serde(default)]
    pub commands: OrderedMap<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, YamlValue>,
}

/// One `callbacks` entry. An entry that does not fit [`CallbackConfig`] is
/// kept as raw YAML, so it only disables itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallbackEntry {
    Valid(CallbackConfig),
    Malformed(YamlValue),
}

impl CallbackEntry {
    pub fn config(&self) -> Result<&CallbackConfig, DomainError> {
        match self {
            CallbackEntry::Valid(config) => Ok(config),
            CallbackEntry::Malformed(raw) => {
                let message = match serde_yaml::from_value::<CallbackConfig>(raw.clone()) {
                    Err(err) => err.to_string(),
                    Ok(_) => "callback entry could not be parsed".to_string(),
                };
                Err(DomainError::invalid_config(message))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// URL template rendered against the job data.
    pub template: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<CallbackFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_temp: Option<bool>,
}

impl CallbackConfig {
    pub fn sends_result(&self) -> bool {
        self.send_result.unwrap_or(false)
    }

    pub fn sends_temp(&self) -> bool {
        self.send_temp.unwrap_or(false)
    }
}

/// A staged file attached to a callback as a multipart part named `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default = "default_binary")]
    pub binary: bool,
}

fn default_binary() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
filetypes:
  tex:
    jinja:
      autoescape: false
      block_start_string: "\\BLOCK{"
  html:
    render_options:
      autoescape: true
post:
  tex:
    commands:
      latex: ["pdflatex", "-interaction=nonstopmode", "demo.tex"]
      again: ["pdflatex", "demo.tex"]
output:
  files: ["demo.pdf", "demo.log"]
callbacks:
  notify:
    template: "https://hooks.example.com/{{ id }}"
    method: POST
    headers:
      authorization: "Bearer abc"
    data:
      - name: pdf
        file: demo.pdf
      - name: log
        file: demo.log
        binary: false
    send_result: true
  audit:
    template: "https://audit.example.com/"
    method: get
selector:
  - data.kind == "invoice"
access:
  - token-one
"#;

    #[test]
    fn parses_full_config() {
        let config = TemplateConfig::from_yaml_str(FULL_CONFIG).expect("valid config");

        let tex = config.render_options("tex");
        assert_eq!(tex.autoescape, Some(false));
        assert!(tex.unrecognized.contains_key("block_start_string"));
        assert!(config.render_options("html").autoescape());
        assert_eq!(config.render_options("md"), RenderOptions::default());

        let commands = config.post_commands("tex").expect("tex commands");
        let names: Vec<_> = commands.keys().collect();
        assert_eq!(names, ["latex", "again"]);
        assert!(config.post_commands("html").is_none());

        let output = config.output.as_ref().expect("output section");
        assert_eq!(output.files, ["demo.pdf", "demo.log"]);

        let callback_names: Vec<_> = config.callbacks.keys().collect();
        assert_eq!(callback_names, ["notify", "audit"]);
        let notify = config
            .callbacks
            .get("notify")
            .expect("notify callback")
            .config()
            .expect("well-formed callback");
        let data = notify.data.as_ref().expect("data entries");
        assert!(data[0].binary, "binary defaults to true");
        assert!(!data[1].binary);
        assert!(notify.sends_result());
        assert!(!notify.sends_temp());

        assert_eq!(config.selectors(), ["data.kind == \"invoice\""]);
        assert!(config.extra.contains_key("access"));
    }

    #[test]
    fn round_trips_unconsumed_keys() {
        let config = TemplateConfig::from_yaml_str(FULL_CONFIG).expect("valid config");
        let yaml = serde_yaml::to_string(&config).expect("serializes");
        let reparsed = TemplateConfig::from_yaml_str(&yaml).expect("reparses");
        assert_eq!(reparsed, config);
        assert_eq!(reparsed.selector, config.selector);
    }

    #[test]
    fn empty_document_is_default_config() {
        let config = TemplateConfig::from_yaml_str("").expect("empty is fine");
        assert_eq!(config, TemplateConfig::default());
    }

    #[test]
    fn single_string_selector_is_accepted() {
        let config =
            TemplateConfig::from_yaml_str("selector: data.urgent").expect("valid config");
        assert_eq!(config.selectors(), ["data.urgent"]);
    }

    #[test]
    fn malformed_callback_only_spoils_itself() {
        let config = TemplateConfig::from_yaml_str(
            r#"
callbacks:
  bad:
    template: "https://example.com/bad"
    method: POST
    data:
      - file: a.pdf
  good:
    template: "https://example.com/good"
    method: POST
"#,
        )
        .expect("config parses despite one bad callback");

        let names: Vec<_> = config.callbacks.keys().collect();
        assert_eq!(names, ["bad", "good"]);
        let err = config
            .callbacks
            .get("bad")
            .expect("bad entry")
            .config()
            .expect_err("missing name");
        assert!(err.to_string().contains("name"), "{err}");
        assert!(config.callbacks.get("good").expect("good entry").config().is_ok());

        let yaml = serde_yaml::to_string(&config).expect("serializes");
        assert_eq!(TemplateConfig::from_yaml_str(&yaml).expect("reparses"), config);
    }

    #[test]
    fn malformed_section_is_reported() {
        let err = TemplateConfig::from_yaml_str("output: [1, 2").expect_err("broken yaml");
        assert!(matches!(err, DomainError::InvalidConfig { .. }));
    }
}
