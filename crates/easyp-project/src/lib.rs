//! Proto source discovery for an easyp project.
//!
//! Combines the project's local inputs with the modules installed for it (see
//! `easyp-mod`) into one ordered set of proto roots and files, and can vendor the module
//! files into the project tree.

mod enumerate;
mod model;
mod vendor;

use std::path::{Path, PathBuf};

use easyp_config::ProjectConfig;
use easyp_mod::{CacheConfig, Storage};

pub use enumerate::{enumerate_files, EnumerateOptions};
pub use model::*;
pub use vendor::{vendor, VendorReport};

/// Directory, relative to the project root, that [`vendor()`] writes to.
pub const VENDOR_DIR: &str = "easyp_vendor";

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error(transparent)]
    Mod(#[from] easyp_mod::ModError),

    #[error(transparent)]
    Config(#[from] easyp_config::ConfigError),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Load the project's `easyp.yaml` and open the module cache with its lockfile.
pub fn open_project(
    project_root: &Path,
    cache: &CacheConfig,
) -> Result<(ProjectConfig, Storage), ProjectError> {
    let (config, _) = easyp_config::load_for_project(project_root)?;
    let storage = Storage::open(cache, project_root)?;
    Ok((config, storage))
}
