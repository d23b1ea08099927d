//! Access to a module's git repository through the `git` binary.
//!
//! Each module gets its own bare repository in the cache; every operation is a `git`
//! invocation with that repository as its working directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use easyp_process::{CancellationToken, CommandResult, CommandRunner, CommandSpec};
use time::OffsetDateTime;

use crate::error::{ModError, Result};
use crate::resolver;
use crate::version::{RequestedVersion, Revision};

/// Glob passed to `git archive`; only proto sources end up in installed modules.
pub const ARCHIVE_PATHSPEC: &str = "*.proto";

/// A ref advertised by the remote (`git ls-remote` line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub commit_hash: String,
    pub name: String,
}

impl RemoteRef {
    /// `refs/tags/v1.0.0^{}` -> `Some("v1.0.0")`.
    pub fn tag_name(&self) -> Option<&str> {
        let tag = self.name.strip_prefix("refs/tags/")?;
        Some(tag.strip_suffix("^{}").unwrap_or(tag))
    }

    pub fn is_peeled(&self) -> bool {
        self.name.ends_with("^{}")
    }
}

/// Operations the module manager needs from a module's version control.
pub trait Repository: Send + Sync {
    /// Module name this repository serves.
    fn module_name(&self) -> &str;

    /// Make `revision`'s objects available locally.
    fn fetch(&self, revision: &Revision, cancel: &CancellationToken) -> Result<()>;

    /// Files at `revision` under `dirs` (all files when `dirs` is empty).
    fn get_files(
        &self,
        revision: &Revision,
        dirs: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>>;

    /// Content of `path` at `revision`; [`ModError::FileNotFound`] when absent.
    fn read_file(&self, revision: &Revision, path: &str, cancel: &CancellationToken)
        -> Result<Vec<u8>>;

    /// Write a zip of the proto files at `revision` to `archive_path`.
    fn archive(
        &self,
        revision: &Revision,
        archive_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Refs advertised by the remote, optionally restricted to `pattern`.
    fn ls_remote(&self, pattern: Option<&str>, cancel: &CancellationToken)
        -> Result<Vec<RemoteRef>>;

    /// Committer time of a locally available commit.
    fn commit_time(&self, commit_hash: &str, cancel: &CancellationToken)
        -> Result<OffsetDateTime>;

    /// Turn a requested version into a concrete revision.
    fn read_revision(
        &self,
        requested: &RequestedVersion,
        cancel: &CancellationToken,
    ) -> Result<Revision> {
        resolver::resolve(self, requested, cancel)
    }
}

/// How [`GitRepository`] talks to remotes.
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// The `git` executable.
    pub git_program: PathBuf,
    /// Prepended to the module name to form the remote URL.
    pub remote_prefix: String,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            git_program: PathBuf::from("git"),
            remote_prefix: "https://".to_string(),
        }
    }
}

/// [`Repository`] backed by a local bare clone and the `git` CLI.
pub struct GitRepository {
    module_name: String,
    dir: PathBuf,
    git_program: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitRepository")
            .field("module_name", &self.module_name)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl GitRepository {
    /// Open the bare repository at `dir`, initializing it with an `origin` remote when it
    /// does not exist yet.
    pub fn open(
        dir: &Path,
        module_name: &str,
        runner: Arc<dyn CommandRunner>,
        options: &RepositoryOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let repo = Self {
            module_name: module_name.to_string(),
            dir: dir.to_path_buf(),
            git_program: options.git_program.clone(),
            runner,
        };

        if !is_bare_repository(dir) {
            fs::create_dir_all(dir).map_err(ModError::io(dir))?;
            let remote = format!("{}{}", options.remote_prefix, module_name);
            tracing::debug!(
                target = "easyp.git",
                module = module_name,
                dir = %dir.display(),
                remote,
                "initializing bare repository"
            );
            repo.git_output(&["init", "--bare"], cancel)?;
            repo.git_output(&["remote", "add", "origin", remote.as_str()], cancel)?;
        }

        Ok(repo)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn spec(&self, args: &[&str]) -> CommandSpec {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        CommandSpec::new(&self.dir, &self.git_program, &args)
    }

    fn git(&self, args: &[&str], cancel: &CancellationToken) -> Result<(CommandSpec, CommandResult)> {
        if cancel.is_cancelled() {
            return Err(ModError::Cancelled);
        }
        let spec = self.spec(args);
        let result = self
            .runner
            .run(&spec, cancel)
            .map_err(|source| ModError::Spawn { source })?;
        if result.cancelled {
            return Err(ModError::Cancelled);
        }
        if result.output.truncated {
            return Err(ModError::OutputTruncated {
                command: spec.to_string(),
            });
        }
        Ok((spec, result))
    }

    /// Run `git` and return stdout, turning a nonzero exit into [`ModError::Command`].
    fn git_output(&self, args: &[&str], cancel: &CancellationToken) -> Result<String> {
        let (spec, result) = self.git(args, cancel)?;
        if !result.success() {
            return Err(command_error(&spec, &result));
        }
        Ok(result.output.stdout_lossy().into_owned())
    }
}

fn command_error(spec: &CommandSpec, result: &CommandResult) -> ModError {
    ModError::Command {
        command: spec.to_string(),
        status: result.status.to_string(),
        stderr: result.output.stderr.trim().to_string(),
    }
}

fn is_bare_repository(dir: &Path) -> bool {
    dir.join("HEAD").is_file() && dir.join("objects").is_dir()
}

impl Repository for GitRepository {
    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn fetch(&self, revision: &Revision, cancel: &CancellationToken) -> Result<()> {
        let probe = format!("{}^{{commit}}", revision.commit_hash);
        let (_, result) = self.git(&["cat-file", "-e", probe.as_str()], cancel)?;
        if result.success() {
            tracing::trace!(
                target = "easyp.git",
                module = %self.module_name,
                commit = %revision.commit_hash,
                "commit already present, skipping fetch"
            );
            return Ok(());
        }

        tracing::debug!(
            target = "easyp.git",
            module = %self.module_name,
            commit = %revision.commit_hash,
            "fetching"
        );
        self.git_output(
            &[
                "fetch",
                "-f",
                "origin",
                "--depth=1",
                revision.commit_hash.as_str(),
            ],
            cancel,
        )?;
        Ok(())
    }

    fn get_files(
        &self,
        revision: &Revision,
        dirs: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut args = vec!["ls-tree", "-r", "--name-only", revision.commit_hash.as_str()];
        if !dirs.is_empty() {
            args.push("--");
            args.extend(dirs.iter().map(String::as_str));
        }
        let stdout = self.git_output(&args, cancel)?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn read_file(
        &self,
        revision: &Revision,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let object = format!("{}:{path}", revision.commit_hash);
        let (_, result) = self.git(&["show", object.as_str()], cancel)?;
        if !result.success() {
            return Err(ModError::FileNotFound {
                path: format!("{path} at {}", revision.commit_hash),
            });
        }
        Ok(result.output.stdout)
    }

    fn archive(
        &self,
        revision: &Revision,
        archive_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let output = archive_path.to_string_lossy();
        self.git_output(
            &[
                "archive",
                "--format=zip",
                "-o",
                output.as_ref(),
                revision.commit_hash.as_str(),
                "--",
                ARCHIVE_PATHSPEC,
            ],
            cancel,
        )?;
        Ok(())
    }

    fn ls_remote(
        &self,
        pattern: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteRef>> {
        let mut args = vec!["ls-remote", "origin"];
        args.extend(pattern);
        let stdout = self.git_output(&args, cancel)?;
        Ok(parse_ls_remote(&stdout))
    }

    fn commit_time(&self, commit_hash: &str, cancel: &CancellationToken) -> Result<OffsetDateTime> {
        let args = ["show", "-s", "--format=%ct", commit_hash];
        let stdout = self.git_output(&args, cancel)?;
        let unexpected = || ModError::UnexpectedOutput {
            command: self.spec(&args).to_string(),
            output: stdout.clone(),
        };
        let seconds: i64 = stdout.trim().parse().map_err(|_| unexpected())?;
        OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| unexpected())
    }
}

/// Parse `<sha>\t<ref>` lines; anything else is skipped.
pub fn parse_ls_remote(output: &str) -> Vec<RemoteRef> {
    output
        .lines()
        .filter_map(|line| {
            let (hash, name) = line.split_once(char::is_whitespace)?;
            let name = name.trim();
            if hash.is_empty() || name.is_empty() {
                return None;
            }
            Some(RemoteRef {
                commit_hash: hash.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}
