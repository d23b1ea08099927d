//! Project configuration for easyp.
//!
//! This crate turns a project directory into a [`ProjectConfig`]:
//! - remote module dependencies (`deps`)
//! - local proto inputs (`generate.inputs[].directory`)
//!
//! It also owns the module reference syntax (`name[@version]`) and the `tracing`
//! setup shared by the other crates.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, make_dispatch, LoggingConfig};

/// Environment variable overriding the config file location.
pub const EASYP_CONFIG_ENV_VAR: &str = "EASYP_CONFIG";

/// Default config file name in the project root.
pub const CONFIG_FILE_NAME: &str = "easyp.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse yaml config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid module reference {reference:?}: {reason}")]
    InvalidModuleRef {
        reference: String,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Parsed `easyp.yaml`.
///
/// Sections that belong to other tools (lint, breaking, plugins) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Module references, `name` or `name@version`.
    #[serde(default)]
    pub deps: Vec<String>,

    #[serde(default)]
    pub generate: GenerateConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateConfig {
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Local directory input. Inputs without a directory (e.g. remote git inputs) are not
    /// local roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<InputDirectory>,
}

/// `directory: proto` or `directory: { path: proto/api, root: proto }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputDirectory {
    Path(String),
    Rooted {
        path: String,
        #[serde(default)]
        root: String,
    },
}

/// A local proto input resolved from config.
///
/// Files are collected under `path`; their import paths are relative to `root`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalInput {
    pub path: PathBuf,
    pub root: PathBuf,
}

impl InputDirectory {
    pub fn to_local_input(&self) -> LocalInput {
        match self {
            InputDirectory::Path(path) => LocalInput {
                path: normalize_dir(path),
                root: normalize_dir(path),
            },
            InputDirectory::Rooted { path, root } => LocalInput {
                path: normalize_dir(path),
                root: normalize_dir(root),
            },
        }
    }
}

fn normalize_dir(dir: &str) -> PathBuf {
    let trimmed = dir.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(trimmed)
    }
}

impl ProjectConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load_from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_from_str(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        // An empty document deserializes to `null`; treat it as an empty config.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Parsed `deps`, in declaration order.
    pub fn module_refs(&self) -> Result<Vec<ModuleRef>> {
        self.deps.iter().map(|dep| ModuleRef::parse(dep)).collect()
    }

    /// Local proto inputs in declaration order.
    ///
    /// A config without any directory input treats the project root itself as the only input.
    pub fn local_inputs(&self) -> Vec<LocalInput> {
        let inputs: Vec<LocalInput> = self
            .generate
            .inputs
            .iter()
            .filter_map(|input| input.directory.as_ref())
            .map(InputDirectory::to_local_input)
            .collect();
        if inputs.is_empty() {
            return vec![LocalInput {
                path: PathBuf::from("."),
                root: PathBuf::from("."),
            }];
        }
        inputs
    }
}

/// A module reference as written in config: `<name>` or `<name>@<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    pub name: String,
    /// Empty when the version is omitted.
    pub version: String,
}

impl ModuleRef {
    /// Parse `name[@version]`. The `@` separator splits once, from the left.
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference.trim();
        let (name, version) = match trimmed.split_once('@') {
            Some((name, version)) => (name, version),
            None => (trimmed, ""),
        };
        if name.is_empty() {
            return Err(ConfigError::InvalidModuleRef {
                reference: reference.to_string(),
                reason: "module name is empty",
            });
        }
        if name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidModuleRef {
                reference: reference.to_string(),
                reason: "module name contains whitespace",
            });
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl std::fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.version.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}@{}", self.name, self.version)
        }
    }
}

/// Discover the config file for a project root.
///
/// Search order:
/// 1) `EASYP_CONFIG` (absolute or relative to `project_root`)
/// 2) `easyp.yaml` in `project_root`
/// 3) `easyp.yml` in `project_root`
pub fn discover_config_path(project_root: &Path) -> Option<PathBuf> {
    if let Some(value) = std::env::var_os(EASYP_CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            project_root.join(candidate)
        };
        return Some(path);
    }

    [CONFIG_FILE_NAME, "easyp.yml"]
        .into_iter()
        .map(|name| project_root.join(name))
        .find(|path| path.is_file())
}

/// Load the project config for a project root.
///
/// If no config is present, returns [`ProjectConfig::default`] and `None`.
pub fn load_for_project(project_root: &Path) -> Result<(ProjectConfig, Option<PathBuf>)> {
    let Some(path) = discover_config_path(project_root) else {
        return Ok((ProjectConfig::default(), None));
    };

    let config = ProjectConfig::load_from_path(&path)?;
    tracing::debug!(
        target = "easyp.config",
        path = %path.display(),
        deps = config.deps.len(),
        inputs = config.generate.inputs.len(),
        "loaded project config"
    );
    Ok((config, Some(path)))
}
