//! The record a finished job hands back to its caller.

use std::{io, path::PathBuf};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{domain::template::TemplateDescriptor, infra::fs::remove_tree};

use super::{
    log::JobWarning,
    package::{RESULT_ARCHIVE, TEMP_ARCHIVE},
};

/// What a finished job hands back. The directories stay on disk until
/// [`JobResult::cleanup`] is called.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub template: TemplateDescriptor,
    pub data: Value,
    pub staging_folder: PathBuf,
    pub result_folder: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub elapsed_ms: u64,
    /// Member names of `result.zip`.
    pub result_files: Vec<String>,
    pub warnings: Vec<JobWarning>,
    pub log: String,
}

impl JobResult {
    pub fn result_zip(&self) -> PathBuf {
        self.result_folder.join(RESULT_ARCHIVE)
    }

    pub fn temp_zip(&self) -> PathBuf {
        self.result_folder.join(TEMP_ARCHIVE)
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Remove the staging and result directories. Safe to call twice.
    pub fn cleanup(&self) -> io::Result<()> {
        remove_tree(&self.staging_folder)?;
        remove_tree(&self.result_folder)
    }
}
