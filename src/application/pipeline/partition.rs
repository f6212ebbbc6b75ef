//! Splits a template directory into rendered and static content.

use std::{fs, io, path::{Path, PathBuf}};

use crate::domain::{
    error::DomainError,
    filename::{TemplateFileName, decompose, is_template_file_name},
};

/// A top-level file carrying the template marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    pub source: PathBuf,
    /// File name inside the template directory (with the marker).
    pub file_name: String,
    pub name: TemplateFileName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionedTemplate {
    pub template_files: Vec<TemplateFile>,
    pub static_files: Vec<PathBuf>,
    pub static_folders: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("failed to read template directory {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Filename(#[from] DomainError),
}

/// Classify the direct children of `dir`, sorted by name.
///
/// Subdirectories are always static and copied wholesale; marker-suffixed
/// files must decompose into an output name and a type key.
pub fn partition_template_dir(dir: &Path) -> Result<PartitionedTemplate, PartitionError> {
    let io_error = |source: io::Error| PartitionError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir)
        .map_err(io_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error)?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut partitioned = PartitionedTemplate::default();
    for entry in entries {
        let path = entry.path();
        // `metadata` follows symlinks, so linked folders are copied as folders.
        let metadata = fs::metadata(&path).map_err(io_error)?;
        if metadata.is_dir() {
            partitioned.static_folders.push(path);
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().into_owned();
        if is_template_file_name(&file_name) {
            let name = decompose(&file_name)?;
            partitioned.template_files.push(TemplateFile {
                source: path,
                file_name,
                name,
            });
        } else {
            partitioned.static_files.push(path);
        }
    }

    Ok(partitioned)
}
