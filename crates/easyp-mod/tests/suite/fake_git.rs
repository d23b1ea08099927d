//! An in-memory stand-in for the `git` binary.
//!
//! Each module is a [`FakeRemote`]; the runner maps the bare repository directory a command
//! runs in back to its module through the `sha256(name)` directory naming.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Mutex;

use easyp_mod::CancellationToken;
use easyp_process::{BoundedOutput, CommandResult, CommandRunner, CommandSpec};
use sha2::{Digest, Sha256};
use zip::write::FileOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub cwd: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeCommit {
    pub files: BTreeMap<String, String>,
    pub committed_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    pub head: String,
    /// `(commit, ref name)` in advertisement order.
    pub refs: Vec<(String, String)>,
    pub commits: HashMap<String, FakeCommit>,
}

impl FakeRemote {
    /// A remote whose default branch points at `commit`.
    pub fn with_head(commit: &str, files: &[(&str, &str)]) -> Self {
        let mut remote = Self {
            head: commit.to_string(),
            refs: vec![(commit.to_string(), "refs/heads/main".to_string())],
            commits: HashMap::new(),
        };
        remote.add_commit(commit, files);
        remote
    }

    pub fn add_commit(&mut self, commit: &str, files: &[(&str, &str)]) -> &mut Self {
        self.commits.insert(
            commit.to_string(),
            FakeCommit {
                files: files
                    .iter()
                    .map(|(path, body)| (path.to_string(), body.to_string()))
                    .collect(),
                committed_at: 1_708_645_603,
            },
        );
        self
    }

    pub fn tag(&mut self, commit: &str, tag: &str) -> &mut Self {
        self.refs.push((commit.to_string(), format!("refs/tags/{tag}")));
        self
    }

    fn find_commit(&self, rev: &str) -> Option<(&String, &FakeCommit)> {
        let mut matches = self
            .commits
            .iter()
            .filter(|(hash, _)| hash.starts_with(rev) && !rev.is_empty());
        let first = matches.next()?;
        matches.next().is_none().then_some(first)
    }
}

#[derive(Debug, Default)]
struct State {
    invocations: Vec<Invocation>,
    fetched: HashSet<(PathBuf, String)>,
}

#[derive(Debug, Default)]
pub struct FakeGit {
    remotes: HashMap<String, FakeRemote>,
    state: Mutex<State>,
    /// Cancel the token and report a cancelled run when this subcommand is invoked.
    cancel_on: Option<String>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(mut self, name: &str, remote: FakeRemote) -> Self {
        self.remotes.insert(name.to_string(), remote);
        self
    }

    pub fn cancel_on(mut self, subcommand: &str) -> Self {
        self.cancel_on = Some(subcommand.to_string());
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().invocations.clone()
    }

    /// Invocations whose first argument is `subcommand`.
    pub fn calls(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.invocations()
            .into_iter()
            .filter(|inv| inv.args.first().map(String::as_str) == Some(subcommand))
            .map(|inv| inv.args)
            .collect()
    }

    pub fn clear_invocations(&self) {
        self.state.lock().unwrap().invocations.clear();
    }

    fn remote_for(&self, cwd: &Path) -> Option<&FakeRemote> {
        let dir_name = cwd.file_name()?.to_str()?;
        self.remotes
            .iter()
            .find(|(name, _)| hex::encode(Sha256::digest(name.as_bytes())) == dir_name)
            .map(|(_, remote)| remote)
    }

    fn handle(&self, cwd: &Path, args: &[&str]) -> io::Result<(i32, String, String)> {
        let ok = |stdout: String| Ok((0, stdout, String::new()));
        let fail = |stderr: &str| Ok((128, String::new(), format!("fatal: {stderr}\n")));

        match args {
            ["init", "--bare"] => {
                std::fs::create_dir_all(cwd.join("objects"))?;
                std::fs::write(cwd.join("HEAD"), "ref: refs/heads/main\n")?;
                ok(String::new())
            }
            ["remote", "add", "origin", _url] => ok(String::new()),
            ["ls-remote", "origin", rest @ ..] => {
                let Some(remote) = self.remote_for(cwd) else {
                    return fail("repository not found");
                };
                let mut out = String::new();
                match rest {
                    [] => {
                        out.push_str(&format!("{}\tHEAD\n", remote.head));
                        for (hash, name) in &remote.refs {
                            out.push_str(&format!("{hash}\t{name}\n"));
                        }
                    }
                    ["HEAD"] => out.push_str(&format!("{}\tHEAD\n", remote.head)),
                    [pattern] => {
                        for (hash, name) in &remote.refs {
                            let tail = name.trim_end_matches("^{}");
                            if tail.ends_with(&format!("/{pattern}")) {
                                out.push_str(&format!("{hash}\t{name}\n"));
                            }
                        }
                    }
                    _ => return fail("unsupported ls-remote"),
                }
                ok(out)
            }
            ["cat-file", "-e", object] => {
                let rev = object.trim_end_matches("^{commit}");
                let fetched = self.resolve_fetched(cwd, rev);
                if fetched.is_some() {
                    ok(String::new())
                } else {
                    Ok((1, String::new(), String::new()))
                }
            }
            ["fetch", "-f", "origin", "--depth=1", rev] => {
                let Some(remote) = self.remote_for(cwd) else {
                    return fail("repository not found");
                };
                let Some((hash, _)) = remote.find_commit(rev) else {
                    return fail(&format!("couldn't find remote ref {rev}"));
                };
                self.state
                    .lock()
                    .unwrap()
                    .fetched
                    .insert((cwd.to_path_buf(), hash.clone()));
                ok(String::new())
            }
            ["show", "-s", "--format=%ct", rev] => match self.resolve_fetched(cwd, rev) {
                Some(commit) => ok(format!("{}\n", commit.committed_at)),
                None => fail("bad object"),
            },
            ["show", object] => {
                let Some((rev, path)) = object.split_once(':') else {
                    return fail("bad object");
                };
                let Some(commit) = self.resolve_fetched(cwd, rev) else {
                    return fail("bad object");
                };
                match commit.files.get(path) {
                    Some(body) => ok(body.clone()),
                    None => fail(&format!("path '{path}' does not exist in '{rev}'")),
                }
            }
            ["ls-tree", "-r", "--name-only", rev, rest @ ..] => {
                let Some(commit) = self.resolve_fetched(cwd, rev) else {
                    return fail("not a tree object");
                };
                let dirs: Vec<&str> = rest.iter().copied().filter(|arg| *arg != "--").collect();
                let out: String = commit
                    .files
                    .keys()
                    .filter(|path| {
                        dirs.is_empty()
                            || dirs
                                .iter()
                                .any(|dir| path.starts_with(&format!("{}/", dir.trim_end_matches('/'))))
                    })
                    .map(|path| format!("{path}\n"))
                    .collect();
                ok(out)
            }
            ["archive", "--format=zip", "-o", output, rev, "--", "*.proto"] => {
                let Some(commit) = self.resolve_fetched(cwd, rev) else {
                    return fail("not a tree object");
                };
                write_zip(Path::new(output), &commit)?;
                ok(String::new())
            }
            _ => fail(&format!("unexpected git invocation {args:?}")),
        }
    }

    fn resolve_fetched(&self, cwd: &Path, rev: &str) -> Option<FakeCommit> {
        let remote = self.remote_for(cwd)?;
        let (hash, commit) = remote.find_commit(rev)?;
        let state = self.state.lock().unwrap();
        state
            .fetched
            .contains(&(cwd.to_path_buf(), hash.clone()))
            .then(|| commit.clone())
    }
}

fn write_zip(path: &Path, commit: &FakeCommit) -> io::Result<()> {
    let mut writer = zip::ZipWriter::new(std::fs::File::create(path)?);
    for (name, body) in &commit.files {
        if !name.ends_with(".proto") {
            continue;
        }
        writer
            .start_file(name.as_str(), FileOptions::<()>::default())
            .map_err(io::Error::other)?;
        writer.write_all(body.as_bytes())?;
    }
    writer.finish().map_err(io::Error::other)?;
    Ok(())
}

impl CommandRunner for FakeGit {
    fn run(&self, command: &CommandSpec, cancel: &CancellationToken) -> io::Result<CommandResult> {
        self.state.lock().unwrap().invocations.push(Invocation {
            cwd: command.cwd.clone(),
            args: command.args.clone(),
        });

        if self.cancel_on.as_deref() == command.subcommand() {
            cancel.cancel();
            return Ok(CommandResult {
                status: ExitStatus::from_raw(9),
                output: BoundedOutput::default(),
                cancelled: true,
            });
        }

        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        let (code, stdout, stderr) = self.handle(&command.cwd, &args)?;
        Ok(CommandResult {
            status: ExitStatus::from_raw(code << 8),
            output: BoundedOutput {
                stdout: stdout.into_bytes(),
                stderr,
                truncated: false,
            },
            cancelled: false,
        })
    }
}
