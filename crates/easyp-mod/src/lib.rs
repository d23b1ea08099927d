//! Remote proto module management.
//!
//! A module is a git repository named by its URL without scheme
//! (`github.com/googleapis/googleapis`). [`Manager`] resolves requested versions,
//! downloads `*.proto` archives into the cache described by [`Storage`], installs them
//! with their proto roots stripped, and records the result in `easyp.lock`.

mod dirhash;
mod error;
mod lockfile;
mod manager;
mod module_config;
mod repository;
mod resolver;
mod storage;
mod util;
mod version;
mod walker;

pub use dirhash::{hash_dir, hash_zip, ModuleHash};
pub use error::{ModError, Result};
pub use lockfile::{LockFile, LockfileInfo, LOCK_FILE_NAME};
pub use manager::Manager;
pub use module_config::{
    read_module_config, read_module_config_from, ModuleConfig, BUF_FILE_NAME, BUF_WORK_FILE_NAME,
    EASYP_FILE_NAME,
};
pub use repository::{
    parse_ls_remote, GitRepository, RemoteRef, Repository, RepositoryOptions, ARCHIVE_PATHSPEC,
};
pub use resolver::resolve;
pub use storage::{
    strip_root_prefix, CacheConfig, CacheDownloadPaths, InstalledModuleInfo, SharedLockFile,
    Storage, EASYP_CACHE_ENV_VAR,
};
pub use version::{
    sanitize, GeneratedVersion, Module, RequestedVersion, Revision, GENERATED_HASH_PREFIX_LEN,
};
pub use walker::{read_all, DirWalker, GitTreeWalker, LocalWalker};

pub use easyp_process::CancellationToken;
