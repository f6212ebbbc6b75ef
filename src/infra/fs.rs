//! Filesystem helpers shared by the staging and packaging stages.

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use thiserror::Error;
use walkdir::WalkDir;

use super::error::InfraError;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("path `{path}` escapes its root directory")]
pub struct PathEscape {
    pub path: String,
}

/// Join a user-supplied relative path onto `root`, refusing absolute paths and `..` hops.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, PathEscape> {
    let candidate = Path::new(relative);
    if relative.is_empty()
        || candidate.is_absolute()
        || candidate.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        })
    {
        return Err(PathEscape {
            path: relative.to_string(),
        });
    }

    Ok(root.join(candidate))
}

/// Whether `path`, with every link resolved, lies inside `root`.
///
/// Paths that do not exist, including dangling links, are never contained.
pub fn is_contained(root: &Path, path: &Path) -> bool {
    match (root.canonicalize(), path.canonicalize()) {
        (Ok(root), Ok(path)) => path.starts_with(root),
        _ => false,
    }
}

/// Recursively copy `source` into `destination`, creating it when missing.
///
/// Returns the copied files relative to `source`, in walk order.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<Vec<PathBuf>, InfraError> {
    fs::create_dir_all(destination)?;
    let mut copied = Vec::new();
    for entry in WalkDir::new(source).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| InfraError::Io(io::Error::other(err)))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied.push(relative.to_path_buf());
        }
    }
    Ok(copied)
}

/// Remove a directory tree, treating an already-missing directory as success.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
