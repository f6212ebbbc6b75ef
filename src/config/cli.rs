use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the httypist binary.
#[derive(Debug, Parser)]
#[command(
    name = "httypist",
    version,
    about = "Render template directories into packaged artifacts"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "HTTYPIST_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the pipeline for one template and print the job result as JSON.
    Run(Box<RunArgs>),
    /// Print the templates whose selectors match the given data.
    Select(SelectArgs),
    /// Print the names of all templates.
    List(ListArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Template name (a subdirectory of the templates root).
    #[arg(value_name = "TEMPLATE")]
    pub template: String,

    /// JSON file with the job data; `-` reads stdin. Defaults to `{}`.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub data: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: RunOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct SelectArgs {
    /// JSON file with the job data; `-` reads stdin. Defaults to `{}`.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub data: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CatalogOverrides,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ListArgs {
    #[command(flatten)]
    pub overrides: CatalogOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CatalogOverrides {
    /// Override the directory whose subdirectories are templates.
    #[arg(long = "templates-root", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub templates_root: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RunOverrides {
    #[command(flatten)]
    pub catalog: CatalogOverrides,

    /// Override the parent directory of staging and result directories.
    #[arg(long = "work-dir", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub work_dir: Option<PathBuf>,

    /// Override the per-command post-processing timeout.
    #[arg(long = "command-timeout-seconds", value_name = "SECONDS")]
    pub command_timeout_seconds: Option<u64>,

    /// Override the per-request callback timeout.
    #[arg(long = "callback-timeout-seconds", value_name = "SECONDS")]
    pub callback_timeout_seconds: Option<u64>,

    /// Override the archive compression (xz|deflate|stored).
    #[arg(long = "compression", value_name = "METHOD")]
    pub compression: Option<String>,
}
