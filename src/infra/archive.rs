//! ZIP archive writing for result bundles.

use std::{
    collections::BTreeSet,
    fmt,
    fs::File,
    io,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use walkdir::WalkDir;
use zip::{CompressionMethod, DateTime, ZipWriter, write::SimpleFileOptions};

use super::{error::InfraError, fs::is_contained};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveCompression {
    #[default]
    Xz,
    Deflate,
    Stored,
}

impl ArchiveCompression {
    pub fn method(self) -> CompressionMethod {
        match self {
            ArchiveCompression::Xz => CompressionMethod::Xz,
            ArchiveCompression::Deflate => CompressionMethod::Deflated,
            ArchiveCompression::Stored => CompressionMethod::Stored,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveCompression::Xz => "xz",
            ArchiveCompression::Deflate => "deflate",
            ArchiveCompression::Stored => "stored",
        }
    }
}

impl fmt::Display for ArchiveCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveCompression {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xz" | "lzma" => Ok(ArchiveCompression::Xz),
            "deflate" | "deflated" => Ok(ArchiveCompression::Deflate),
            "stored" | "none" => Ok(ArchiveCompression::Stored),
            other => Err(format!(
                "unsupported compression `{other}` (expected xz, deflate or stored)"
            )),
        }
    }
}

/// Archive member name for `path` relative to `root`, using `/` separators.
///
/// Returns `None` when `path` is not strictly below `root`.
pub fn member_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!segments.is_empty()).then(|| segments.join("/"))
}

/// What [`ArchiveWriter::add_tree`] put into the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSummary {
    pub added: usize,
    /// Links that dangle, point at a directory or resolve outside the root.
    pub skipped_links: Vec<String>,
}

/// Streams files into a ZIP archive with fixed timestamps so identical inputs
/// produce identical member sets and metadata.
pub struct ArchiveWriter {
    path: PathBuf,
    zip: ZipWriter<File>,
    options: SimpleFileOptions,
    members: BTreeSet<String>,
}

impl ArchiveWriter {
    pub fn create(path: impl Into<PathBuf>, compression: ArchiveCompression) -> Result<Self, InfraError> {
        let path = path.into();
        let file = File::create(&path)?;
        let options = SimpleFileOptions::default()
            .compression_method(compression.method())
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);
        Ok(Self {
            path,
            zip: ZipWriter::new(file),
            options,
            members: BTreeSet::new(),
        })
    }

    /// Add one file under `name`. Returns `false` when the name was already added.
    pub fn add_file(&mut self, name: &str, source: &Path) -> Result<bool, InfraError> {
        if !self.members.insert(name.to_string()) {
            return Ok(false);
        }
        let mut input = File::open(source)?;
        self.zip.start_file(name, self.options)?;
        io::copy(&mut input, &mut self.zip)?;
        Ok(true)
    }

    /// Add every regular file below `dir`, named relative to `root`, in sorted order.
    ///
    /// Links are never descended into. A link is archived with its target's
    /// contents only when it resolves to a regular file under `root`.
    pub fn add_tree(&mut self, root: &Path, dir: &Path) -> Result<TreeSummary, InfraError> {
        let mut summary = TreeSummary::default();
        for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            let file_type = entry.file_type();
            let Some(name) = member_name(root, entry.path()) else {
                continue;
            };
            if file_type.is_symlink() {
                if !(entry.path().is_file() && is_contained(root, entry.path())) {
                    summary.skipped_links.push(name);
                    continue;
                }
            } else if !file_type.is_file() {
                continue;
            }
            if self.add_file(&name, entry.path())? {
                summary.added += 1;
            }
        }
        Ok(summary)
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn finish(self) -> Result<PathBuf, InfraError> {
        self.zip.finish()?;
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Read};
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn archive_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).expect("open zip")).expect("read zip");
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn member_names_use_forward_slashes() {
        let root = Path::new("/stage");
        assert_eq!(
            member_name(root, &root.join("a").join("b.txt")).as_deref(),
            Some("a/b.txt")
        );
        assert_eq!(member_name(root, root), None);
        assert_eq!(member_name(root, Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn parses_compression_names() {
        assert_eq!("xz".parse::<ArchiveCompression>(), Ok(ArchiveCompression::Xz));
        assert_eq!("Deflate".parse::<ArchiveCompression>(), Ok(ArchiveCompression::Deflate));
        assert_eq!("stored".parse::<ArchiveCompression>(), Ok(ArchiveCompression::Stored));
        assert!("brotli".parse::<ArchiveCompression>().is_err());
    }

    #[test]
    fn writes_tree_with_relative_names() {
        let stage = TempDir::new().expect("stage dir");
        fs::create_dir_all(stage.path().join("img")).expect("mkdir");
        fs::write(stage.path().join("a.txt"), "alpha").expect("write");
        fs::write(stage.path().join("img/logo.png"), [0_u8, 1, 2]).expect("write");

        let out = TempDir::new().expect("out dir");
        let target = out.path().join("temp.zip");
        let mut writer =
            ArchiveWriter::create(&target, ArchiveCompression::Deflate).expect("create zip");
        let summary = writer.add_tree(stage.path(), stage.path()).expect("add tree");
        assert_eq!(summary.added, 2);
        assert!(summary.skipped_links.is_empty());
        assert!(
            !writer
                .add_file("a.txt", &stage.path().join("a.txt"))
                .expect("duplicate add"),
            "duplicates are skipped"
        );
        let path = writer.finish().expect("finish");

        assert_eq!(archive_names(&path), ["a.txt", "img/logo.png"]);

        let mut archive = ZipArchive::new(File::open(&path).expect("open")).expect("read");
        let mut contents = String::new();
        archive
            .by_name("a.txt")
            .expect("member")
            .read_to_string(&mut contents)
            .expect("read member");
        assert_eq!(contents, "alpha");
    }

    #[cfg(unix)]
    #[test]
    fn links_leaving_the_root_are_skipped() {
        use std::os::unix::fs::symlink;

        let outside = TempDir::new().expect("outside dir");
        fs::write(outside.path().join("secret.txt"), "SECRET").expect("write");
        let stage = TempDir::new().expect("stage dir");
        fs::write(stage.path().join("doc.tex"), "doc").expect("write");
        symlink(outside.path().join("secret.txt"), stage.path().join("leak.txt")).expect("link");
        symlink("does-not-exist", stage.path().join("dangling")).expect("link");
        symlink(outside.path(), stage.path().join("elsewhere")).expect("link");
        symlink("doc.tex", stage.path().join("alias.tex")).expect("link");

        let out = TempDir::new().expect("out dir");
        let mut writer = ArchiveWriter::create(out.path().join("temp.zip"), ArchiveCompression::Stored)
            .expect("create zip");
        let summary = writer.add_tree(stage.path(), stage.path()).expect("add tree");
        let path = writer.finish().expect("finish");

        assert_eq!(archive_names(&path), ["alias.tex", "doc.tex"]);
        assert_eq!(summary.added, 2);
        assert_eq!(summary.skipped_links, ["dangling", "elsewhere", "leak.txt"]);
    }

    #[test]
    fn empty_archive_is_valid() {
        let out = TempDir::new().expect("out dir");
        let path = ArchiveWriter::create(out.path().join("result.zip"), ArchiveCompression::Xz)
            .expect("create")
            .finish()
            .expect("finish");
        assert!(archive_names(&path).is_empty());
    }
}
