use std::fs;
use std::path::{Path, PathBuf};

use easyp_config::ProjectConfig;
use easyp_mod::{hash_dir, CacheConfig, Storage};

pub struct Project {
    _tmp: tempfile::TempDir,
    pub root: PathBuf,
    cache: PathBuf,
}

impl Project {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("project");
        let cache = tmp.path().join("cache");
        fs::create_dir_all(&root).unwrap();
        Self {
            _tmp: tmp,
            root,
            cache,
        }
    }

    pub fn write(&self, rel: &str, content: &str) -> &Self {
        write_file(&self.root, rel, content);
        self
    }

    pub fn config(&self, yaml: &str) -> ProjectConfig {
        ProjectConfig::load_from_str(yaml).unwrap()
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            cache_root_override: Some(self.cache.clone()),
        }
    }

    pub fn storage(&self) -> Storage {
        Storage::open(&self.cache_config(), &self.root).unwrap()
    }

    /// Lay down an install tree and lock it, as the module manager would.
    pub fn install(&self, name: &str, version: &str, files: &[(&str, &str)]) -> PathBuf {
        let storage = self.storage();
        let dir = storage.install_dir(name, version);
        for (rel, content) in files {
            write_file(&dir, rel, content);
        }
        fs::create_dir_all(&dir).unwrap();
        let hash = hash_dir(&dir).unwrap();
        storage
            .lockfile()
            .lock()
            .write(name, version, hash.as_str())
            .unwrap();
        dir
    }

    /// Lock a module without installing it.
    pub fn lock_only(&self, name: &str, version: &str) {
        self.storage()
            .lockfile()
            .lock()
            .write(name, version, "h1:missing")
            .unwrap();
    }
}

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}
