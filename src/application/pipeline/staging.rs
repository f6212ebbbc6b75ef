//! Per-job working directories.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{
    application::error::PipelineError,
    infra::fs::{PathEscape, copy_tree, is_contained, remove_tree, resolve_within},
};

use super::{log::JobLog, partition::PartitionedTemplate};

/// Create a uniquely named directory under `work_dir` whose name starts with
/// the slugified template name. The directory outlives this call.
pub(crate) fn create_job_dir(work_dir: &Path, template_name: &str, label: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(work_dir)?;
    let mut slug = slug::slugify(template_name);
    if slug.is_empty() {
        slug.push_str("template");
    }
    let prefix = if label.is_empty() {
        format!("{slug}-")
    } else {
        format!("{slug}-{label}-")
    };
    let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(work_dir)?;
    Ok(dir.keep())
}

/// The isolated directory a job renders and runs commands in.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn create(work_dir: &Path, template_name: &str) -> io::Result<Self> {
        let root = create_job_dir(work_dir, template_name, "")?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a staging-relative file, refusing paths that leave the staging tree.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, PathEscape> {
        resolve_within(&self.root, relative)
    }

    /// Whether `path` still lies inside the staging tree once links are resolved.
    pub fn contains(&self, path: &Path) -> bool {
        is_contained(&self.root, path)
    }

    /// Copy static files and folders into the staging root, preserving their names.
    pub fn stage_static(
        &self,
        partitioned: &PartitionedTemplate,
        log: &mut JobLog,
    ) -> Result<(), PipelineError> {
        for source in &partitioned.static_files {
            let target = self.target_for(source)?;
            fs::copy(source, &target).map_err(|err| PipelineError::staging(source, err))?;
            log.info(format!("copied {}", display_name(source)));
        }

        for source in &partitioned.static_folders {
            let target = self.target_for(source)?;
            let folder = display_name(source);
            let copied =
                copy_tree(source, &target).map_err(|err| PipelineError::staging(source, err))?;
            for relative in &copied {
                log.info(format!("copied {folder}/{}", relative.display()));
            }
            log.info(format!("copied folder {folder} ({} files)", copied.len()));
        }
        Ok(())
    }

    /// Write rendered text to `output_name`, replacing any static file of the same name.
    pub fn write_rendered(&self, output_name: &str, contents: &str) -> Result<PathBuf, PipelineError> {
        let target = self.resolve(output_name).map_err(|err| {
            PipelineError::staging(
                self.root.join(output_name),
                io::Error::new(io::ErrorKind::InvalidInput, err),
            )
        })?;
        fs::write(&target, contents).map_err(|err| PipelineError::staging(&target, err))?;
        Ok(target)
    }

    pub fn remove(self) -> io::Result<()> {
        remove_tree(&self.root)
    }

    pub fn into_path(self) -> PathBuf {
        self.root
    }

    fn target_for(&self, source: &Path) -> Result<PathBuf, PipelineError> {
        let name = source.file_name().ok_or_else(|| {
            PipelineError::staging(
                source,
                io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"),
            )
        })?;
        Ok(self.root.join(name))
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::partition::partition_template_dir;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn directory_name_starts_with_template_slug() {
        let work = TempDir::new().expect("work dir");
        let first = StagingArea::create(work.path(), "Invoice Letter").expect("staging");
        let second = StagingArea::create(work.path(), "Invoice Letter").expect("staging");

        let name = first
            .path()
            .file_name()
            .expect("dir name")
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with("invoice-letter-"), "unexpected name {name}");
        assert_ne!(first.path(), second.path());
        assert!(first.path().is_dir());
    }

    #[test]
    fn stages_static_content_byte_identical() {
        let template = TempDir::new().expect("template dir");
        fs::write(template.path().join("logo.png"), [0_u8, 159, 146, 150]).expect("write");
        fs::write(template.path().join("demo.tex.jinja"), "{{ x }}").expect("write");
        fs::create_dir_all(template.path().join("fonts/sub")).expect("mkdir");
        fs::write(template.path().join("fonts/sub/a.ttf"), b"font").expect("write");

        let work = TempDir::new().expect("work dir");
        let staging = StagingArea::create(work.path(), "demo").expect("staging");
        let partitioned = partition_template_dir(template.path()).expect("partitioned");
        let mut log = JobLog::new(Uuid::new_v4());
        staging.stage_static(&partitioned, &mut log).expect("staged");

        assert_eq!(
            fs::read(staging.path().join("logo.png")).expect("read"),
            [0_u8, 159, 146, 150]
        );
        assert_eq!(
            fs::read(staging.path().join("fonts/sub/a.ttf")).expect("read"),
            b"font"
        );
        assert!(!staging.path().join("demo.tex.jinja").exists());
        assert!(log.text().contains("copied logo.png"));
        assert!(log.text().contains("copied fonts/sub/a.ttf"));
    }

    #[test]
    fn missing_static_source_is_staging_failure() {
        let work = TempDir::new().expect("work dir");
        let staging = StagingArea::create(work.path(), "demo").expect("staging");
        let partitioned = PartitionedTemplate {
            static_files: vec![work.path().join("vanished.txt")],
            ..PartitionedTemplate::default()
        };
        let mut log = JobLog::new(Uuid::new_v4());

        let err = staging
            .stage_static(&partitioned, &mut log)
            .expect_err("copy fails");
        assert!(matches!(err, PipelineError::StagingFailure { .. }));
    }

    #[test]
    fn resolve_stays_inside_staging() {
        let work = TempDir::new().expect("work dir");
        let staging = StagingArea::create(work.path(), "demo").expect("staging");
        assert!(staging.resolve("out/demo.pdf").is_ok());
        assert!(staging.resolve("../other").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn contains_follows_links() {
        use std::os::unix::fs::symlink;

        let work = TempDir::new().expect("work dir");
        let staging = StagingArea::create(work.path(), "demo").expect("staging");
        fs::write(staging.path().join("inside.txt"), "in").expect("write");
        fs::write(work.path().join("outside.txt"), "out").expect("write");
        symlink("inside.txt", staging.path().join("alias.txt")).expect("link");
        symlink(work.path().join("outside.txt"), staging.path().join("leak.txt")).expect("link");

        assert!(staging.contains(&staging.path().join("inside.txt")));
        assert!(staging.contains(&staging.path().join("alias.txt")));
        assert!(!staging.contains(&staging.path().join("leak.txt")));
        assert!(!staging.contains(&staging.path().join("absent.txt")));
    }

    #[test]
    fn remove_deletes_tree() {
        let work = TempDir::new().expect("work dir");
        let staging = StagingArea::create(work.path(), "demo").expect("staging");
        let path = staging.path().to_path_buf();
        staging.remove().expect("removed");
        assert!(!path.exists());
    }
}
