use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use easyp_config::ProjectConfig;
use easyp_mod::Storage;

use crate::enumerate::{enumerate_files, EnumerateOptions};
use crate::model::{Diagnostic, RootSource};
use crate::{ProjectError, VENDOR_DIR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorReport {
    pub dir: PathBuf,
    pub files: usize,
    /// Diagnostics from enumeration; colliding module files are not vendored.
    pub diagnostics: Vec<Diagnostic>,
}

/// Copy every installed module file into `<project>/easyp_vendor/<import path>`.
///
/// The vendor directory is recreated from scratch on every call.
pub fn vendor(
    project_root: &Path,
    config: &ProjectConfig,
    storage: &Storage,
) -> Result<VendorReport, ProjectError> {
    let set = enumerate_files(
        project_root,
        config,
        storage,
        EnumerateOptions {
            include_imports: true,
        },
    )?;

    let dir = project_root.join(VENDOR_DIR);
    match fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(ProjectError::Io { path: dir, source }),
    }

    let mut files = 0usize;
    for file in &set.files {
        if !matches!(file.source, RootSource::Module { .. }) {
            continue;
        }
        let dest = dir.join(&file.import_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| ProjectError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::copy(&file.path, &dest).map_err(|source| ProjectError::Io {
            path: file.path.clone(),
            source,
        })?;
        files += 1;
    }

    tracing::info!(
        target = "easyp.project",
        dir = %dir.display(),
        files,
        "vendored module files"
    );
    Ok(VendorReport {
        dir,
        files,
        diagnostics: set.errors,
    })
}
