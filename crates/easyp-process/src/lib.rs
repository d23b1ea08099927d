//! Helpers for spawning the VCS binary and other external commands.
//!
//! Commands are always spawned from an argv array (never through a shell). Output is
//! captured up to a per-stream bound, and a [`CancellationToken`] can terminate the child
//! (and its process group on Unix) while it is still running.
//!
//! [`CommandRunner`] is the seam callers depend on; [`DefaultCommandRunner`] spawns real
//! processes, tests substitute recording fakes.

use std::{
    fmt,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

pub use tokio_util::sync::CancellationToken;

/// Captured stdout/stderr from a command, truncated to a maximum size.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoundedOutput {
    /// Raw stdout; `git show` output is not necessarily UTF-8.
    pub stdout: Vec<u8>,
    pub stderr: String,
    /// Set when either stdout or stderr had more bytes than were captured.
    pub truncated: bool,
}

impl BoundedOutput {
    pub fn stdout_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }
}

/// Options controlling command execution.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum bytes to capture *per stream* (stdout and stderr).
    pub max_bytes: usize,
    /// When cancelled, the process is terminated and `cancelled` is set on the result.
    pub cancellation: Option<CancellationToken>,
    /// How long to wait after sending a graceful termination signal before
    /// force-killing the process tree.
    pub kill_grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            // `git ls-remote` on large monorepos can print many thousands of refs; 16MiB per
            // stream is plenty while keeping memory bounded.
            max_bytes: 16 * 1024 * 1024,
            cancellation: None,
            kill_grace: Duration::from_millis(250),
        }
    }
}

/// A full command invocation (cwd + program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(cwd: &Path, program: &Path, args: &[String]) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            program: program.to_path_buf(),
            args: args.to_vec(),
        }
    }

    /// First argument, which for `git` is the subcommand.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Human-readable debugging output, not a round-trippable shell snippet.
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') || arg.contains('\t') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Result of running a command with bounded output capture.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub output: BoundedOutput,
    pub cancelled: bool,
}

impl CommandResult {
    /// `true` when the process exited with status zero and was not cancelled.
    pub fn success(&self) -> bool {
        self.status.success() && !self.cancelled
    }
}

/// Executes commands on behalf of higher layers.
pub trait CommandRunner: Send + Sync + fmt::Debug {
    fn run(&self, command: &CommandSpec, cancel: &CancellationToken) -> io::Result<CommandResult>;
}

/// Spawns real child processes via [`run_command`].
#[derive(Debug, Clone)]
pub struct DefaultCommandRunner {
    pub max_bytes: usize,
    pub kill_grace: Duration,
}

impl Default for DefaultCommandRunner {
    fn default() -> Self {
        let defaults = RunOptions::default();
        Self {
            max_bytes: defaults.max_bytes,
            kill_grace: defaults.kill_grace,
        }
    }
}

impl CommandRunner for DefaultCommandRunner {
    fn run(&self, command: &CommandSpec, cancel: &CancellationToken) -> io::Result<CommandResult> {
        tracing::trace!(target = "easyp.process", command = %command, "spawning command");
        run_command_spec(
            command,
            RunOptions {
                max_bytes: self.max_bytes,
                cancellation: Some(cancel.clone()),
                kill_grace: self.kill_grace,
            },
        )
        .map_err(|err| io::Error::new(err.kind(), format!("failed to run `{command}`: {err}")))
    }
}

/// Run a command, capturing at most `opts.max_bytes` bytes of stdout and stderr
/// each.
///
/// The function always returns the process `ExitStatus`. When the cancellation token is
/// triggered, the process is killed and `cancelled` is set to `true`.
pub fn run_command(
    cwd: &Path,
    program: &Path,
    args: &[String],
    opts: RunOptions,
) -> io::Result<CommandResult> {
    let command = CommandSpec::new(cwd, program, args);
    run_command_spec(&command, opts)
}

fn run_command_spec(command: &CommandSpec, opts: RunOptions) -> io::Result<CommandResult> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Put the child into its own process group on Unix so cancellation can kill the
    // whole process tree (git spawns helpers such as `git-remote-https`).
    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;

        cmd.pre_exec(|| {
            // SAFETY: `setpgid` is async-signal-safe and does not allocate.
            // This is executed after `fork` in the child process.
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;

    let Some(stdout) = child.stdout.take() else {
        return Err(io::Error::other("child stdout was not captured"));
    };
    let Some(stderr) = child.stderr.take() else {
        return Err(io::Error::other("child stderr was not captured"));
    };

    let max_bytes = opts.max_bytes;
    let stdout_handle = thread::spawn(move || read_bounded(stdout, max_bytes));
    let stderr_handle = thread::spawn(move || read_bounded(stderr, max_bytes));

    let mut cancelled = false;

    let status = match opts.cancellation.as_ref() {
        Some(token) => {
            let poll = Duration::from_millis(20);
            loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if token.is_cancelled() {
                    cancelled = true;
                    break terminate_process_tree(&mut child, opts.kill_grace)?;
                }
                thread::sleep(poll);
            }
        }
        None => child.wait()?,
    };

    let (stdout_bytes, stdout_truncated) = join_reader(stdout_handle, "stdout")??;
    let (stderr_bytes, stderr_truncated) = join_reader(stderr_handle, "stderr")??;

    Ok(CommandResult {
        status,
        output: BoundedOutput {
            stdout: stdout_bytes,
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            truncated: stdout_truncated || stderr_truncated,
        },
        cancelled,
    })
}

fn terminate_process_tree(
    child: &mut std::process::Child,
    grace: Duration,
) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        // Negative pid targets the process group created by `setpgid(0, 0)` in `pre_exec`.
        unsafe {
            let _ = libc::kill(-pid, libc::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(25));
        }

        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
        child.wait()
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        let _ = child.kill();
        child.wait()
    }
}

fn join_reader(
    handle: thread::JoinHandle<io::Result<(Vec<u8>, bool)>>,
    stream: &'static str,
) -> io::Result<io::Result<(Vec<u8>, bool)>> {
    handle
        .join()
        .map_err(|_| io::Error::other(format!("{stream} reader thread panicked")))
}

fn read_bounded(mut reader: impl Read, max_bytes: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }

        if out.len() < max_bytes {
            let remaining = max_bytes - out.len();
            let to_store = remaining.min(n);
            out.extend_from_slice(&buf[..to_store]);
            if to_store < n {
                truncated = true;
            }
        } else {
            truncated = true;
        }
    }

    Ok((out, truncated))
}
