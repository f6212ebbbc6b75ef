//! Append-only job log shared by every pipeline stage.
//!
//! The text buffer is what users get back; each line is mirrored to `tracing`
//! for operators. Non-fatal failures are also kept as structured warnings.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Staging,
    Render,
    PostProcess,
    Package,
    Callbacks,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Staging => "staging",
            Stage::Render => "render",
            Stage::PostProcess => "post_process",
            Stage::Package => "package",
            Stage::Callbacks => "callbacks",
        }
    }

    fn target(self) -> &'static str {
        match self {
            Stage::Staging => "application::pipeline::staging",
            Stage::Render => "application::pipeline::render",
            Stage::PostProcess => "application::pipeline::post",
            Stage::Package => "application::pipeline::package",
            Stage::Callbacks => "application::pipeline::callbacks",
        }
    }
}

/// Non-fatal failure kinds. None of them stops later stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    PostProcessFailure,
    PostProcessTimeout,
    MissingOutputFile,
    MissingOutputConfig,
    CallbackConfigError,
    CallbackTransportError,
    CallbackTimeout,
    IgnoredRenderOption,
}

impl WarningKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WarningKind::PostProcessFailure => "post_process_failure",
            WarningKind::PostProcessTimeout => "post_process_timeout",
            WarningKind::MissingOutputFile => "missing_output_file",
            WarningKind::MissingOutputConfig => "missing_output_config",
            WarningKind::CallbackConfigError => "callback_config_error",
            WarningKind::CallbackTransportError => "callback_transport_error",
            WarningKind::CallbackTimeout => "callback_timeout",
            WarningKind::IgnoredRenderOption => "ignored_render_option",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWarning {
    pub stage: Stage,
    pub kind: WarningKind,
    /// File, command or callback the warning is about.
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct JobLog {
    job_id: Uuid,
    stage: Stage,
    text: String,
    warnings: Vec<JobWarning>,
}

impl JobLog {
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            stage: Stage::Staging,
            text: String::new(),
            warnings: Vec::new(),
        }
    }

    /// Mark the start of a stage.
    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        let _ = writeln!(self.text, "== {} ==", stage.as_str());
        info!(
            target = stage.target(),
            job_id = %self.job_id,
            stage = stage.as_str(),
            "Pipeline stage started"
        );
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let _ = writeln!(self.text, "{message}");
        info!(
            target = self.stage.target(),
            job_id = %self.job_id,
            stage = self.stage.as_str(),
            "{message}"
        );
    }

    /// Append captured output (command output, response body) verbatim.
    pub fn output(&mut self, label: impl AsRef<str>, output: &str) {
        let label = label.as_ref();
        let _ = writeln!(self.text, "--- {label} ---");
        self.text.push_str(output);
        if !output.is_empty() && !output.ends_with('\n') {
            self.text.push('\n');
        }
        let _ = writeln!(self.text, "--- end of {label} ---");
        info!(
            target = self.stage.target(),
            job_id = %self.job_id,
            stage = self.stage.as_str(),
            output_bytes = output.len(),
            "Captured {label}"
        );
    }

    /// Record a non-fatal failure.
    pub fn warn(&mut self, kind: WarningKind, subject: impl Into<String>, message: impl Into<String>) {
        let subject = subject.into();
        let message = message.into();
        let _ = writeln!(
            self.text,
            "WARNING [{}] {subject}: {message}",
            kind.as_str()
        );
        warn!(
            target = self.stage.target(),
            job_id = %self.job_id,
            stage = self.stage.as_str(),
            kind = kind.as_str(),
            subject = %subject,
            "{message}"
        );
        self.warnings.push(JobWarning {
            stage: self.stage,
            kind,
            subject,
            message,
        });
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn warnings(&self) -> &[JobWarning] {
        &self.warnings
    }

    pub fn into_parts(self) -> (String, Vec<JobWarning>) {
        (self.text, self.warnings)
    }
}
