//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::infra::archive::ArchiveCompression;

mod cli;

pub use cli::{
    CatalogOverrides, CliArgs, Command, ListArgs, LoggingOverrides, RunArgs, RunOverrides,
    SelectArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "httypist";
const ENV_PREFIX: &str = "HTTYPIST";
const DEFAULT_TEMPLATES_ROOT: &str = "repo";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved process settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub templates: TemplateSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub work_dir: PathBuf,
    pub command_timeout: Duration,
    pub callback_timeout: Duration,
    pub compression: ArchiveCompression,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Run(args) => raw.apply_run_overrides(&args.overrides),
        Command::Select(args) => raw.apply_catalog_overrides(&args.overrides),
        Command::List(args) => raw.apply_catalog_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    templates: RawTemplateSettings,
    pipeline: RawPipelineSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPipelineSettings {
    work_dir: Option<PathBuf>,
    command_timeout_seconds: Option<u64>,
    callback_timeout_seconds: Option<u64>,
    compression: Option<String>,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_catalog_overrides(&mut self, overrides: &CatalogOverrides) {
        if let Some(root) = overrides.templates_root.as_ref() {
            self.templates.root = Some(root.clone());
        }
        self.apply_logging_overrides(&overrides.logging);
    }

    fn apply_run_overrides(&mut self, overrides: &RunOverrides) {
        self.apply_catalog_overrides(&overrides.catalog);
        if let Some(dir) = overrides.work_dir.as_ref() {
            self.pipeline.work_dir = Some(dir.clone());
        }
        if let Some(seconds) = overrides.command_timeout_seconds {
            self.pipeline.command_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.callback_timeout_seconds {
            self.pipeline.callback_timeout_seconds = Some(seconds);
        }
        if let Some(compression) = overrides.compression.as_ref() {
            self.pipeline.compression = Some(compression.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            logging: build_logging_settings(raw.logging)?,
            templates: build_template_settings(raw.templates)?,
            pipeline: build_pipeline_settings(raw.pipeline)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_template_settings(templates: RawTemplateSettings) -> Result<TemplateSettings, LoadError> {
    let root = templates
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATES_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("templates.root", "must not be empty"));
    }
    Ok(TemplateSettings { root })
}

fn build_pipeline_settings(pipeline: RawPipelineSettings) -> Result<PipelineSettings, LoadError> {
    let work_dir = pipeline.work_dir.unwrap_or_else(std::env::temp_dir);
    if work_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid("pipeline.work_dir", "must not be empty"));
    }

    let command_timeout = positive_seconds(
        pipeline
            .command_timeout_seconds
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        "pipeline.command_timeout_seconds",
    )?;
    let callback_timeout = positive_seconds(
        pipeline
            .callback_timeout_seconds
            .unwrap_or(DEFAULT_CALLBACK_TIMEOUT_SECS),
        "pipeline.callback_timeout_seconds",
    )?;

    let compression = match pipeline.compression {
        Some(value) => ArchiveCompression::from_str(&value)
            .map_err(|reason| LoadError::invalid("pipeline.compression", reason))?,
        None => ArchiveCompression::default(),
    };

    Ok(PipelineSettings {
        work_dir,
        command_timeout,
        callback_timeout,
        compression,
    })
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}
