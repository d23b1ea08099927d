//! Directory abstraction over the local filesystem and a git tree at a fixed revision.

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use easyp_process::CancellationToken;
use walkdir::WalkDir;

use crate::error::{ModError, Result};
use crate::repository::Repository;
use crate::version::Revision;

/// Read/write/list access to a tree of files addressed by `/`-separated relative paths.
pub trait DirWalker: Send + Sync {
    /// Open a file for reading. A missing file is [`ModError::FileNotFound`].
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>>;

    /// Create (or truncate) a file for writing.
    fn create(&self, path: &str) -> Result<Box<dyn Write + '_>>;

    /// Call `visit` for every file in the tree, in a stable order.
    fn walk(&self, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()>;
}

/// [`DirWalker`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalWalker {
    root: PathBuf,
}

impl LocalWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DirWalker for LocalWalker {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        let full = self.root.join(path);
        match fs::File::open(&full) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ModError::FileNotFound {
                path: full.display().to_string(),
            }),
            Err(source) => Err(ModError::Io { path: full, source }),
        }
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + '_>> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(ModError::io(parent))?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(&full).map_err(ModError::io(&full))?;
        Ok(Box::new(file))
    }

    fn walk(&self, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        if !self.root.is_dir() {
            return Ok(());
        }
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            visit(&to_slash(rel))?;
        }
        Ok(())
    }
}

pub(crate) fn to_slash(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Read-only [`DirWalker`] over a repository tree at one revision.
///
/// `walk` lists the files under `dirs` (all files when `dirs` is empty).
pub struct GitTreeWalker<'a> {
    repo: &'a dyn Repository,
    revision: &'a Revision,
    dirs: Vec<String>,
    cancel: &'a CancellationToken,
}

impl<'a> GitTreeWalker<'a> {
    pub fn new(
        repo: &'a dyn Repository,
        revision: &'a Revision,
        dirs: Vec<String>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            repo,
            revision,
            dirs,
            cancel,
        }
    }
}

impl DirWalker for GitTreeWalker<'_> {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        let content = self.repo.read_file(self.revision, path, self.cancel)?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn create(&self, _path: &str) -> Result<Box<dyn Write + '_>> {
        Err(ModError::Unsupported {
            operation: "create",
        })
    }

    fn walk(&self, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        for file in self.repo.get_files(self.revision, &self.dirs, self.cancel)? {
            visit(&file)?;
        }
        Ok(())
    }
}

/// Read a whole file through a walker.
pub fn read_all(walker: &dyn DirWalker, path: &str) -> Result<Vec<u8>> {
    let mut reader = walker.open(path)?;
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(ModError::io(path))?;
    Ok(buf)
}
