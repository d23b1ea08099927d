use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Where a proto root comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RootSource {
    /// A `generate.inputs[].directory` entry (or the project root).
    LocalInput,
    /// An installed module from the lockfile.
    Module { name: String, version: String },
}

impl fmt::Display for RootSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootSource::LocalInput => f.write_str("local-input"),
            RootSource::Module { name, version } => write!(f, "module:{name}@{version}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtoRoot {
    pub source: RootSource,
    /// Absolute directory import paths are relative to.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtoFile {
    pub source: RootSource,
    /// `/`-separated path a proto `import` statement would use.
    pub import_path: String,
    pub path: PathBuf,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticCode {
    /// Two files under different roots share an import path.
    ImportPathCollision,
    /// A locked module has no install directory.
    MissingInstallDir,
    /// A root contains no `.proto` files (or does not exist).
    EmptyRoot,
}

impl DiagnosticCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCode::ImportPathCollision => "import-path-collision",
            DiagnosticCode::MissingInstallDir => "missing-install-dir",
            DiagnosticCode::EmptyRoot => "empty-root",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
    /// Files or directories involved; for collisions the winner comes first.
    pub paths: Vec<PathBuf>,
}

/// Result of [`crate::enumerate_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtoFileSet {
    pub roots: Vec<ProtoRoot>,
    pub files: Vec<ProtoFile>,
    pub errors: Vec<Diagnostic>,
}

impl ProtoFileSet {
    pub fn find(&self, import_path: &str) -> Option<&ProtoFile> {
        self.files.iter().find(|file| file.import_path == import_path)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
