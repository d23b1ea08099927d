//! The on-disk module cache.
//!
//! Layout under the cache root:
//! - `<root>/<sha256(name)>/`: bare git repository per module
//! - `<root>/cache/download/<name>/<version>.{zip,ziphash,info}`: downloaded archives
//! - `<root>/mod/<name>/<version>/`: installed, prefix-stripped proto trees

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zip::ZipArchive;

use crate::dirhash::{hash_dir, hash_zip, ModuleHash};
use crate::error::{ModError, Result};
use crate::lockfile::LockFile;
use crate::module_config::ModuleConfig;
use crate::util::atomic_write;
use crate::version::{sanitize, Module, Revision};
use crate::walker::LocalWalker;

/// Environment variable overriding the cache root.
pub const EASYP_CACHE_ENV_VAR: &str = "EASYPPATH";

pub type SharedLockFile = Arc<Mutex<LockFile>>;

/// Configuration for selecting the on-disk cache root.
#[derive(Clone, Debug, Default)]
pub struct CacheConfig {
    /// Replaces the default `~/.easyp`.
    pub cache_root_override: Option<PathBuf>,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            cache_root_override: std::env::var_os(EASYP_CACHE_ENV_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        }
    }

    /// The effective cache root. It must be absolute.
    pub fn cache_root(&self) -> Result<PathBuf> {
        let root = match &self.cache_root_override {
            Some(root) => root.clone(),
            None => default_cache_root()?,
        };
        if !root.is_absolute() {
            return Err(ModError::PathNotAbsolute { path: root });
        }
        Ok(root)
    }
}

fn default_cache_root() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or(ModError::MissingHomeDir)?;
    Ok(home.join(".easyp"))
}

/// Files belonging to one downloaded `(module, revision)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDownloadPaths {
    pub cache_download_dir: PathBuf,
    pub archive_file: PathBuf,
    pub archive_hash_file: PathBuf,
    pub module_info_file: PathBuf,
}

/// JSON sidecar (`.info`) describing an installed module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModuleInfo {
    pub module: String,
    pub version: String,
    pub commit_hash: String,
    /// Hash of the install directory, as recorded in the lockfile.
    pub hash: ModuleHash,
    /// Hash of the downloaded archive (`.ziphash`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_hash: Option<ModuleHash>,
    #[serde(default)]
    pub remote: String,
    #[serde(default)]
    pub installed_at_millis: u64,
}

/// Owns one cache root and the project lockfile.
#[derive(Clone)]
pub struct Storage {
    root: PathBuf,
    lockfile: SharedLockFile,
    log: tracing::Dispatch,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// `root` must be absolute. Logs go to the dispatcher that is current at construction;
    /// see [`Storage::with_log`].
    pub fn new(root: impl Into<PathBuf>, lockfile: SharedLockFile) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(ModError::PathNotAbsolute { path: root });
        }
        Ok(Self {
            root,
            lockfile,
            log: tracing::dispatcher::get_default(|dispatch| dispatch.clone()),
        })
    }

    /// Storage for `project_root`, with its lockfile read from the project root.
    pub fn open(config: &CacheConfig, project_root: &Path) -> Result<Self> {
        let lockfile = LockFile::open(Box::new(LocalWalker::new(project_root)))?;
        Self::new(config.cache_root()?, Arc::new(Mutex::new(lockfile)))
    }

    pub fn with_log(mut self, log: tracing::Dispatch) -> Self {
        self.log = log;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lockfile(&self) -> &SharedLockFile {
        &self.lockfile
    }

    pub(crate) fn log(&self) -> &tracing::Dispatch {
        &self.log
    }

    /// Bare repository directory for a module.
    pub fn repository_dir(&self, module_name: &str) -> PathBuf {
        self.root
            .join(hex::encode(Sha256::digest(module_name.as_bytes())))
    }

    pub fn cache_download_dir(&self, module_name: &str) -> PathBuf {
        self.root.join("cache").join("download").join(module_name)
    }

    pub fn cache_download_paths(&self, module_name: &str, revision: &Revision) -> CacheDownloadPaths {
        let dir = self.cache_download_dir(module_name);
        let base = sanitize(&revision.version);
        CacheDownloadPaths {
            archive_file: dir.join(format!("{base}.zip")),
            archive_hash_file: dir.join(format!("{base}.ziphash")),
            module_info_file: dir.join(format!("{base}.info")),
            cache_download_dir: dir,
        }
    }

    pub fn create_cache_download_dir(&self, paths: &CacheDownloadPaths) -> Result<()> {
        fs::create_dir_all(&paths.cache_download_dir)
            .map_err(ModError::io(&paths.cache_download_dir))
    }

    pub fn install_dir(&self, module_name: &str, version: &str) -> PathBuf {
        self.root
            .join("mod")
            .join(module_name)
            .join(sanitize(version))
    }

    /// Extract the downloaded archive into the install directory and hash the result.
    ///
    /// Entries under one of `module_config.directories` lose that prefix. A previous
    /// install of the same version is replaced.
    pub fn install(
        &self,
        paths: &CacheDownloadPaths,
        module_name: &str,
        revision: &Revision,
        module_config: &ModuleConfig,
    ) -> Result<ModuleHash> {
        let install_dir = self.install_dir(module_name, &revision.version);
        match fs::remove_dir_all(&install_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ModError::Io {
                    path: install_dir,
                    source,
                })
            }
        }
        fs::create_dir_all(&install_dir).map_err(ModError::io(&install_dir))?;

        let files = extract(&paths.archive_file, &install_dir, &module_config.directories)?;
        let hash = hash_dir(&install_dir)?;
        tracing::dispatcher::with_default(&self.log, || {
            tracing::debug!(
                target = "easyp.storage",
                module = module_name,
                version = %revision.version,
                files,
                hash = %hash,
                dir = %install_dir.display(),
                "installed module"
            );
        });
        Ok(hash)
    }

    /// Hash of the current install directory.
    pub fn get_installed_module_hash(&self, module_name: &str, version: &str) -> Result<ModuleHash> {
        let dir = self.install_dir(module_name, version);
        if !dir.is_dir() {
            return Err(ModError::ModuleNotInstalled {
                name: module_name.to_string(),
                version: version.to_string(),
            });
        }
        hash_dir(&dir)
    }

    /// `true` when the lockfile has a matching entry and the install tree still hashes to it.
    pub fn is_module_installed(&self, module: &Module) -> Result<bool> {
        let entry = match self.lockfile.lock().read(&module.name) {
            Ok(entry) => entry,
            Err(ModError::ModuleNotInLockfile { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };
        if !module.version.is_satisfied_by(&entry.version) {
            return Ok(false);
        }

        let hash = match self.get_installed_module_hash(&module.name, &entry.version) {
            Ok(hash) => hash,
            Err(ModError::ModuleNotInstalled { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };
        if hash.as_str() != entry.hash {
            tracing::dispatcher::with_default(&self.log, || {
                tracing::warn!(
                    target = "easyp.storage",
                    module = %module.name,
                    version = %entry.version,
                    expected = %entry.hash,
                    actual = %hash,
                    "installed module hash does not match lockfile; reinstalling"
                );
            });
            return Ok(false);
        }
        Ok(true)
    }

    pub fn read_installed_module_info(&self, paths: &CacheDownloadPaths) -> Result<InstalledModuleInfo> {
        let path = &paths.module_info_file;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ModError::ModuleInfoFileNotFound { path: path.clone() })
            }
            Err(source) => {
                return Err(ModError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| ModError::Json {
            path: path.clone(),
            source,
        })
    }

    pub fn write_installed_module_info(
        &self,
        paths: &CacheDownloadPaths,
        info: &InstalledModuleInfo,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(info).map_err(|source| ModError::Json {
            path: paths.module_info_file.clone(),
            source,
        })?;
        atomic_write(&paths.module_info_file, &bytes)
    }

    /// Hash the downloaded archive and record it in the `.ziphash` sidecar.
    pub fn write_archive_hash(&self, paths: &CacheDownloadPaths) -> Result<ModuleHash> {
        let hash = hash_zip(&paths.archive_file)?;
        atomic_write(&paths.archive_hash_file, hash.as_str().as_bytes())?;
        Ok(hash)
    }

    /// `true` when a downloaded archive exists and still matches its `.ziphash` sidecar.
    pub fn has_valid_archive(&self, paths: &CacheDownloadPaths) -> bool {
        let Ok(recorded) = fs::read_to_string(&paths.archive_hash_file) else {
            return false;
        };
        match hash_zip(&paths.archive_file) {
            Ok(actual) => actual.as_str() == recorded.trim(),
            Err(err) => {
                tracing::dispatcher::with_default(&self.log, || {
                    tracing::debug!(
                        target = "easyp.storage",
                        path = %paths.archive_file.display(),
                        error = %err,
                        "cached archive is unreadable"
                    );
                });
                false
            }
        }
    }
}

/// Strip the first declared root prefix (`<dir>/`) from an archive entry path.
pub fn strip_root_prefix<'a>(path: &'a str, directories: &[String]) -> &'a str {
    directories
        .iter()
        .find_map(|dir| path.strip_prefix(dir.as_str())?.strip_prefix('/'))
        .unwrap_or(path)
}

fn extract(archive_path: &Path, install_dir: &Path, directories: &[String]) -> Result<usize> {
    let zip_err = |source| ModError::Zip {
        path: archive_path.to_path_buf(),
        source,
    };
    let file = fs::File::open(archive_path).map_err(ModError::io(archive_path))?;
    let mut archive = ZipArchive::new(file).map_err(zip_err)?;

    let mut extracted = 0usize;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_err)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if entry.enclosed_name().is_none() {
            return Err(ModError::InvalidArchivePath { path: name });
        }

        let rel = strip_root_prefix(&name, directories);
        if rel.is_empty() {
            continue;
        }
        // The stripped path must stay below the install directory too.
        let rel = Path::new(rel);
        if !rel
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(ModError::InvalidArchivePath { path: name });
        }
        let dest = install_dir.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(ModError::io(parent))?;
        }
        let mut out = fs::File::create(&dest).map_err(ModError::io(&dest))?;
        io::copy(&mut entry, &mut out).map_err(ModError::io(&dest))?;
        extracted += 1;
    }
    Ok(extracted)
}
