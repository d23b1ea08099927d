//! Drives resolve -> fetch -> archive -> install -> lock for modules and their dependencies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use easyp_process::{CancellationToken, CommandRunner};

use crate::error::{ModError, Result};
use crate::module_config::{read_module_config, ModuleConfig};
use crate::repository::{GitRepository, Repository, RepositoryOptions};
use crate::storage::{InstalledModuleInfo, Storage};
use crate::util::now_millis;
use crate::version::{Module, RequestedVersion, Revision};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pinning {
    /// Resolve versions exactly as requested.
    AsRequested,
    /// Prefer the version recorded in the lockfile.
    Lockfile,
}

/// State shared by every module installed during one top-level call.
struct Run {
    visited: HashSet<String>,
    pinning: Pinning,
}

impl Run {
    fn new(pinning: Pinning) -> Self {
        Self {
            visited: HashSet::new(),
            pinning,
        }
    }
}

/// Installs modules into a [`Storage`] and records them in its lockfile.
///
/// Modules are processed one at a time; dependencies are installed depth-first after
/// their parent. A module name is processed at most once per call, so dependency cycles
/// terminate and the first version requested for a name wins.
pub struct Manager {
    storage: Storage,
    runner: Arc<dyn CommandRunner>,
    options: RepositoryOptions,
    log: tracing::Dispatch,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("storage", &self.storage)
            .field("runner", &self.runner)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Logs go to the same dispatcher as `storage`; see [`Manager::with_log`].
    pub fn new(storage: Storage, runner: Arc<dyn CommandRunner>) -> Self {
        let log = storage.log().clone();
        Self {
            storage,
            runner,
            options: RepositoryOptions::default(),
            log,
        }
    }

    pub fn with_log(mut self, log: tracing::Dispatch) -> Self {
        self.storage = self.storage.with_log(log.clone());
        self.log = log;
        self
    }

    pub fn with_repository_options(mut self, options: RepositoryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Install `module` and its transitive dependencies.
    pub fn get(&self, module: &Module, cancel: &CancellationToken) -> Result<()> {
        tracing::dispatcher::with_default(&self.log, || {
            let mut run = Run::new(Pinning::AsRequested);
            self.install_module(module, &mut run, cancel)
        })
    }

    /// Install every module in `modules`, sharing one visited set.
    ///
    /// Duplicate names keep their first occurrence.
    pub fn get_all(&self, modules: &[Module], cancel: &CancellationToken) -> Result<()> {
        tracing::dispatcher::with_default(&self.log, || {
            let mut run = Run::new(Pinning::AsRequested);
            for module in dedup_by_name(modules) {
                self.install_module(module, &mut run, cancel)?;
            }
            Ok(())
        })
    }

    /// Like [`Manager::get_all`], but modules already present in the lockfile are installed
    /// at their locked version when the request allows it.
    pub fn download(&self, modules: &[Module], cancel: &CancellationToken) -> Result<()> {
        tracing::dispatcher::with_default(&self.log, || {
            let mut run = Run::new(Pinning::Lockfile);
            for module in dedup_by_name(modules) {
                self.install_module(module, &mut run, cancel)?;
            }
            Ok(())
        })
    }

    fn install_module(&self, module: &Module, run: &mut Run, cancel: &CancellationToken) -> Result<()> {
        if !run.visited.insert(module.name.clone()) {
            tracing::trace!(
                target = "easyp.mod",
                module = %module,
                "module already processed in this run"
            );
            return Ok(());
        }
        check_cancelled(cancel)?;

        let requested = self.effective_version(module, run.pinning);
        let repo = GitRepository::open(
            &self.storage.repository_dir(&module.name),
            &module.name,
            Arc::clone(&self.runner),
            &self.options,
            cancel,
        )?;

        let revision = repo.read_revision(&requested, cancel)?;
        // Files can only be read at a revision whose objects are present locally.
        repo.fetch(&revision, cancel)?;
        let module_config = read_module_config(&repo, &revision, cancel)?;

        let resolved = Module::new(
            module.name.clone(),
            RequestedVersion::new(revision.version.clone()),
        );
        if self.storage.is_module_installed(&resolved)? {
            tracing::debug!(
                target = "easyp.mod",
                module = %module.name,
                version = %revision.version,
                "module is up to date"
            );
        } else {
            self.download_and_install(&repo, &module.name, &revision, &module_config, cancel)?;
        }

        for dependency in &module_config.dependencies {
            self.install_module(dependency, run, cancel)?;
        }
        Ok(())
    }

    fn download_and_install(
        &self,
        repo: &GitRepository,
        module_name: &str,
        revision: &Revision,
        module_config: &ModuleConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let paths = self.storage.cache_download_paths(module_name, revision);
        self.storage.create_cache_download_dir(&paths)?;

        let archive_hash = if self.storage.has_valid_archive(&paths) {
            tracing::debug!(
                target = "easyp.mod",
                module = module_name,
                version = %revision.version,
                "reusing downloaded archive"
            );
            None
        } else {
            repo.archive(revision, &paths.archive_file, cancel)?;
            Some(self.storage.write_archive_hash(&paths)?)
        };

        let hash = self
            .storage
            .install(&paths, module_name, revision, module_config)?;

        let info = InstalledModuleInfo {
            module: module_name.to_string(),
            version: revision.version.clone(),
            commit_hash: revision.commit_hash.clone(),
            hash: hash.clone(),
            archive_hash,
            remote: format!("{}{}", self.options.remote_prefix, module_name),
            installed_at_millis: now_millis(),
        };
        self.storage.write_installed_module_info(&paths, &info)?;

        // A cancelled install must not be recorded.
        check_cancelled(cancel)?;
        self.storage
            .lockfile()
            .lock()
            .write(module_name, &revision.version, hash.as_str())?;

        tracing::info!(
            target = "easyp.mod",
            module = module_name,
            version = %revision.version,
            commit = %revision.commit_hash,
            hash = %hash,
            "installed module"
        );
        Ok(())
    }

    fn effective_version(&self, module: &Module, pinning: Pinning) -> RequestedVersion {
        if pinning == Pinning::AsRequested {
            return module.version.clone();
        }
        match self.storage.lockfile().lock().read(&module.name) {
            Ok(entry) if module.version.is_satisfied_by(&entry.version) => {
                RequestedVersion::new(entry.version)
            }
            Ok(entry) => {
                tracing::debug!(
                    target = "easyp.mod",
                    module = %module.name,
                    locked = %entry.version,
                    requested = %module.version,
                    "requested version differs from lockfile"
                );
                module.version.clone()
            }
            Err(_) => module.version.clone(),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ModError::Cancelled);
    }
    Ok(())
}

fn dedup_by_name(modules: &[Module]) -> Vec<&Module> {
    let mut first: HashMap<&str, &Module> = HashMap::new();
    let mut out = Vec::with_capacity(modules.len());
    for module in modules {
        match first.get(module.name.as_str()) {
            Some(kept) => {
                if kept.version != module.version {
                    tracing::warn!(
                        target = "easyp.mod",
                        module = %module.name,
                        kept = %kept.version,
                        ignored = %module.version,
                        "module requested with conflicting versions; using the first"
                    );
                }
            }
            None => {
                first.insert(module.name.as_str(), module);
                out.push(module);
            }
        }
    }
    out
}
