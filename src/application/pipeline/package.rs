//! Result packaging: `temp.zip` with the whole staging tree and `result.zip`
//! with the configured output subset.

use std::path::{Path, PathBuf};

use crate::{
    application::error::PipelineError,
    domain::template::TemplateConfig,
    infra::{
        archive::{ArchiveCompression, ArchiveWriter, member_name},
        fs::remove_tree,
    },
};

use super::{
    log::{JobLog, WarningKind},
    staging::{StagingArea, create_job_dir},
};

pub const TEMP_ARCHIVE: &str = "temp.zip";
pub const RESULT_ARCHIVE: &str = "result.zip";

/// The per-job result directory and the archives written into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultBundle {
    pub root: PathBuf,
    pub temp_zip: PathBuf,
    pub result_zip: PathBuf,
    /// Member names of `result.zip`, sorted.
    pub result_files: Vec<String>,
}

pub fn package_results(
    config: &TemplateConfig,
    staging: &StagingArea,
    work_dir: &Path,
    template_name: &str,
    compression: ArchiveCompression,
    log: &mut JobLog,
) -> Result<ResultBundle, PipelineError> {
    let root =
        create_job_dir(work_dir, template_name, "result").map_err(PipelineError::packaging)?;
    match write_archives(config, staging, &root, compression, log) {
        Ok((temp_zip, result_zip, result_files)) => Ok(ResultBundle {
            root,
            temp_zip,
            result_zip,
            result_files,
        }),
        Err(err) => {
            // A half-written bundle is never handed out.
            let _ = remove_tree(&root);
            Err(err)
        }
    }
}

fn write_archives(
    config: &TemplateConfig,
    staging: &StagingArea,
    root: &Path,
    compression: ArchiveCompression,
    log: &mut JobLog,
) -> Result<(PathBuf, PathBuf, Vec<String>), PipelineError> {
    let mut temp = ArchiveWriter::create(root.join(TEMP_ARCHIVE), compression)
        .map_err(PipelineError::packaging)?;
    let summary = temp
        .add_tree(staging.path(), staging.path())
        .map_err(PipelineError::packaging)?;
    for link in &summary.skipped_links {
        log.info(format!("skipped link {link}"));
    }
    let temp_zip = temp.finish().map_err(PipelineError::packaging)?;
    log.info(format!(
        "wrote {TEMP_ARCHIVE} ({} files, {compression})",
        summary.added
    ));

    let mut result = ArchiveWriter::create(root.join(RESULT_ARCHIVE), compression)
        .map_err(PipelineError::packaging)?;
    match &config.output {
        Some(output) => {
            for entry in &output.files {
                add_output_entry(&mut result, staging, entry, log)?;
            }
        }
        None => log.warn(
            WarningKind::MissingOutputConfig,
            RESULT_ARCHIVE,
            "no `output` section configured; result archive is empty",
        ),
    }
    let result_files: Vec<String> = result.members().map(str::to_string).collect();
    let result_zip = result.finish().map_err(PipelineError::packaging)?;
    log.info(format!(
        "wrote {RESULT_ARCHIVE} ({} files)",
        result_files.len()
    ));

    Ok((temp_zip, result_zip, result_files))
}

fn add_output_entry(
    archive: &mut ArchiveWriter,
    staging: &StagingArea,
    entry: &str,
    log: &mut JobLog,
) -> Result<(), PipelineError> {
    let path = match staging.resolve(entry) {
        Ok(path) => path,
        Err(err) => {
            log.warn(WarningKind::MissingOutputFile, entry, err.to_string());
            return Ok(());
        }
    };

    if path.symlink_metadata().is_ok() && !staging.contains(&path) {
        log.warn(
            WarningKind::MissingOutputFile,
            entry,
            "listed output is a link that dangles or leaves the staging directory",
        );
    } else if path.is_dir() {
        let summary = archive
            .add_tree(staging.path(), &path)
            .map_err(PipelineError::packaging)?;
        for link in summary.skipped_links {
            log.warn(
                WarningKind::MissingOutputFile,
                link,
                "link inside a listed folder dangles or leaves the staging directory",
            );
        }
        log.info(format!("packaged folder {entry} ({} files)", summary.added));
    } else if let (true, Some(name)) = (path.is_file(), member_name(staging.path(), &path)) {
        archive
            .add_file(&name, &path)
            .map_err(PipelineError::packaging)?;
        log.info(format!("packaged {entry}"));
    } else {
        log.warn(
            WarningKind::MissingOutputFile,
            entry,
            "listed output does not exist in the staging directory",
        );
    }
    Ok(())
}
