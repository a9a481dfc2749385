#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::{Context, anyhow};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    time::timeout,
};

/// Errors raised while supervising a subprocess.
#[derive(Error, Debug)]
pub enum RunError {
    /// The process did not finish within its deadline and was killed.
    #[error("subprocess timed out after {0:?}")]
    TimedOut(Duration),
    /// Spawning, waiting on, or reading from the process failed.
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Drop guard that terminates a spawned child process (and its process
/// group) if callers forget to await it.
struct ChildDropGuard {
    /// The supervised child, `None` once disarmed.
    child: Option<Child>,
    /// Process id captured at spawn time, doubles as the process group id.
    pid:   Option<u32>,
}

impl ChildDropGuard {
    /// Wraps the provided child process with the drop guard.
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Returns a mutable reference to the underlying child process.
    fn child_mut(&mut self) -> anyhow::Result<&mut Child> {
        self.child
            .as_mut()
            .context("child process already taken from guard")
    }

    /// Sends SIGKILL to every process in the child's group.
    fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid
            && let Ok(pgid) = libc::pid_t::try_from(pid)
        {
            // SAFETY: killpg has no memory-safety preconditions; a stale
            // group id only yields ESRCH.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }

    /// Kills the whole process tree and reaps the child.
    async fn kill_and_reap(&mut self) {
        self.kill_group();
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    /// Prevents the guard from killing the process on drop.
    fn disarm(mut self) {
        self.child = None;
    }
}

impl Drop for ChildDropGuard {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.kill_group();
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct Collected {
    /// Exit status returned by the process.
    pub status: std::process::ExitStatus,
    /// Contents written to stdout.
    pub stdout: Vec<u8>,
    /// Contents written to stderr.
    pub stderr: Vec<u8>,
}

/// Describes how stdin should be wired for the spawned process.
#[derive(Debug)]
pub enum StdinSource {
    /// Attach nothing to stdin.
    Null,
    /// Write the provided bytes, then close stdin.
    Bytes(Vec<u8>),
    /// Redirect stdin from a file on disk.
    File(PathBuf),
}

/// Reads a child pipe to completion on a background task.
fn drain<R>(pipe: R, label: &'static str) -> tokio::task::JoinHandle<anyhow::Result<Vec<u8>>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .with_context(|| format!("failed to read {label}"))?;
        Ok(buf)
    })
}

/// Spawns a command, optionally feeds stdin, and collects stdout/stderr.
///
/// When `deadline` elapses the child's entire process group is killed and
/// [`RunError::TimedOut`] is returned; nothing from the killed process is
/// reported.
pub async fn run_collect(
    program: impl AsRef<OsStr>,
    args: &[OsString],
    stdin: StdinSource,
    cwd: Option<&Path>,
    env: &[(OsString, OsString)],
    deadline: Option<Duration>,
) -> Result<Collected, RunError> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());

    match &stdin {
        StdinSource::Null => {
            cmd.stdin(Stdio::null());
        }
        StdinSource::Bytes(_) => {
            cmd.stdin(Stdio::piped());
        }
        StdinSource::File(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {} for stdin", path.display()))?;
            cmd.stdin(Stdio::from(file));
        }
    }

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let mut guard = ChildDropGuard::new(cmd.spawn().context("failed to spawn process")?);

    if let StdinSource::Bytes(bytes) = stdin
        && let Some(mut handle) = guard.child_mut()?.stdin.take()
    {
        tokio::spawn(async move {
            if !bytes.is_empty() {
                let _ = handle.write_all(&bytes).await;
            }
            let _ = handle.shutdown().await;
        });
    }

    let stdout = guard
        .child_mut()?
        .stdout
        .take()
        .context("missing stdout pipe")?;
    let stderr = guard
        .child_mut()?
        .stderr
        .take()
        .context("missing stderr pipe")?;

    let out_task = drain(stdout, "stdout");
    let err_task = drain(stderr, "stderr");

    let waited = match deadline {
        Some(limit) => timeout(limit, guard.child_mut()?.wait())
            .await
            .map_err(|_| limit),
        None => Ok(guard.child_mut()?.wait().await),
    };
    let status = match waited {
        Ok(waited) => waited.context("failed to wait on process")?,
        Err(limit) => {
            guard.kill_and_reap().await;
            out_task.abort();
            err_task.abort();
            return Err(RunError::TimedOut(limit));
        }
    };

    // Anything the child left behind in its group would hold the pipes open.
    guard.kill_group();

    let stdout = out_task
        .await
        .map_err(|e| anyhow!("stdout task join error: {e}"))??;
    let stderr = err_task
        .await
        .map_err(|e| anyhow!("stderr task join error: {e}"))??;
    guard.disarm();

    Ok(Collected {
        status,
        stdout,
        stderr,
    })
}
