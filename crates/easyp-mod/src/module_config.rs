//! A module's own declaration of its proto roots and dependencies.
//!
//! Three dialects are understood, checked in order; the first one present wins:
//! 1) `buf.work.yaml` with `directories`
//! 2) `buf.yaml` with `modules[].path`
//! 3) `easyp.yaml` with `deps` and `generate.inputs[].directory`

use easyp_config::ProjectConfig;
use easyp_process::CancellationToken;
use serde::Deserialize;

use crate::error::{ModError, Result};
use crate::repository::Repository;
use crate::version::{Module, Revision};
use crate::walker::{read_all, DirWalker, GitTreeWalker};

pub const BUF_WORK_FILE_NAME: &str = "buf.work.yaml";
pub const BUF_FILE_NAME: &str = "buf.yaml";
pub const EASYP_FILE_NAME: &str = "easyp.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Path prefixes inside the module tree that act as proto roots.
    pub directories: Vec<String>,
    pub dependencies: Vec<Module>,
}

#[derive(Debug, Default, Deserialize)]
struct BufWork {
    #[serde(default)]
    directories: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BufYaml {
    #[serde(default)]
    modules: Vec<BufModule>,
}

#[derive(Debug, Deserialize)]
struct BufModule {
    #[serde(default)]
    path: String,
}

/// Read the module config of `repo` at `revision`.
pub fn read_module_config(
    repo: &dyn Repository,
    revision: &Revision,
    cancel: &CancellationToken,
) -> Result<ModuleConfig> {
    let walker = GitTreeWalker::new(repo, revision, Vec::new(), cancel);
    let config = read_module_config_from(&walker)?;
    tracing::debug!(
        target = "easyp.modconfig",
        module = repo.module_name(),
        version = %revision.version,
        directories = ?config.directories,
        dependencies = config.dependencies.len(),
        "read module config"
    );
    Ok(config)
}

/// Read a module config from any tree.
pub fn read_module_config_from(walker: &dyn DirWalker) -> Result<ModuleConfig> {
    if let Some(text) = read_optional(walker, BUF_WORK_FILE_NAME)? {
        let work: BufWork = parse_yaml(BUF_WORK_FILE_NAME, &text)?;
        return Ok(ModuleConfig {
            directories: normalize_dirs(work.directories),
            dependencies: Vec::new(),
        });
    }

    if let Some(text) = read_optional(walker, BUF_FILE_NAME)? {
        // v1 `buf.yaml` has no `modules`; its root is the module root.
        let buf: BufYaml = parse_yaml(BUF_FILE_NAME, &text)?;
        return Ok(ModuleConfig {
            directories: normalize_dirs(buf.modules.into_iter().map(|m| m.path)),
            dependencies: Vec::new(),
        });
    }

    if let Some(text) = read_optional(walker, EASYP_FILE_NAME)? {
        let project = ProjectConfig::load_from_str(&text).map_err(|source| ModError::Yaml {
            path: EASYP_FILE_NAME.to_string(),
            source,
        })?;
        let directories = project
            .generate
            .inputs
            .iter()
            .filter_map(|input| input.directory.as_ref())
            .map(|dir| dir.to_local_input().root.to_string_lossy().into_owned());
        let dependencies = project
            .module_refs()?
            .into_iter()
            .map(Module::from)
            .collect();
        return Ok(ModuleConfig {
            directories: normalize_dirs(directories),
            dependencies,
        });
    }

    Ok(ModuleConfig::default())
}

fn read_optional(walker: &dyn DirWalker, path: &str) -> Result<Option<String>> {
    match read_all(walker, path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(ModError::FileNotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

fn parse_yaml<T: for<'de> Deserialize<'de> + Default>(path: &str, text: &str) -> Result<T> {
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(text).map_err(|source| ModError::Yaml {
        path: path.to_string(),
        source,
    })
}

// `./proto/` -> `proto`; the module root itself (`.` or empty) is not a prefix to strip.
fn normalize_dirs(dirs: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for dir in dirs {
        let mut dir = dir.trim();
        while let Some(rest) = dir.strip_prefix("./") {
            dir = rest;
        }
        let dir = dir.trim_end_matches('/');
        if dir.is_empty() || dir == "." {
            continue;
        }
        if !out.iter().any(|existing| existing == dir) {
            out.push(dir.to_string());
        }
    }
    out
}
