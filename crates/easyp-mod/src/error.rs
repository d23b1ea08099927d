use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ModError>;

/// Errors produced while resolving, fetching and installing modules.
#[derive(Debug, thiserror::Error)]
pub enum ModError {
    #[error("version {version:?} of module {module} not found")]
    VersionNotFound { module: String, version: String },

    #[error("module {name} is not in the lockfile")]
    ModuleNotInLockfile { name: String },

    #[error("module {name}@{version} is not installed")]
    ModuleNotInstalled { name: String, version: String },

    #[error("module info file {path} not found")]
    ModuleInfoFileNotFound { path: PathBuf },

    #[error("file {path} not found")]
    FileNotFound { path: String },

    #[error("cache root {path} is not an absolute path")]
    PathNotAbsolute { path: PathBuf },

    #[error("failed to determine home directory for default cache path")]
    MissingHomeDir,

    #[error("requested version {version:?} is not a generated version")]
    RequestedVersionNotGenerated { version: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("output of `{command}` exceeded the capture limit")]
    OutputTruncated { command: String },

    #[error("unexpected output from `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("json error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("zip error in {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("invalid archive path: {path:?}")]
    InvalidArchivePath { path: String },

    #[error("file name {name:?} cannot be hashed: contains a newline")]
    UnhashableFileName { name: String },

    #[error("{operation} is not supported by this walker")]
    Unsupported { operation: &'static str },

    #[error(transparent)]
    Config(#[from] easyp_config::ConfigError),
}

impl ModError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ModError {
        let path = path.into();
        move |source| ModError::Io { path, source }
    }

    /// `true` for failures that mean "this thing does not exist" rather than "something broke".
    pub fn is_not_found(&self) -> bool {
        match self {
            ModError::FileNotFound { .. }
            | ModError::ModuleNotInLockfile { .. }
            | ModError::ModuleNotInstalled { .. }
            | ModError::ModuleInfoFileNotFound { .. }
            | ModError::VersionNotFound { .. } => true,
            ModError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
