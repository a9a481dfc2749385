#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    path::{Path, PathBuf},
    process::ExitStatus,
    time::Duration,
};

use anyhow::{Context, Result};

use crate::{
    engine::{CredentialTier, QueryEngine},
    process::{self, RunError, StdinSource},
};

/// Exit codes that mean the execution was killed for running too long:
/// `timeout(1)` reports 124, a SIGKILLed container reports 128 + 9.
const TIMEOUT_EXIT_CODES: &[i32] = &[124, 137];

/// The classified result of running one query file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The engine accepted the query; its output is at this path.
    Success(PathBuf),
    /// There was no query file to run.
    NoSubmission,
    /// The query exceeded its time budget and was killed.
    Timeout,
    /// The engine rejected the query with this diagnostic.
    SyntaxError(String),
    /// The engine's output was not valid UTF-8.
    DecodeError,
}

impl ExecutionOutcome {
    /// Whether the query ran to completion without an engine error.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }
}

/// Runs query files against the shared engine, one at a time.
#[derive(Debug, Clone)]
pub struct Executor {
    /// Engine the queries are sent to.
    engine:      QueryEngine,
    /// Working directory for the client process.
    working_dir: Option<PathBuf>,
}

impl Executor {
    /// Creates an executor for `engine`.
    pub fn new(engine: QueryEngine) -> Self {
        Self {
            engine,
            working_dir: None,
        }
    }

    /// Runs the client from `dir`, so relative paths inside queries resolve
    /// there.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Returns the engine handle.
    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Runs `query` against `database` (empty for none) and writes what it
    /// produced to `output`.
    ///
    /// Only infrastructure failures (the client cannot be spawned, the output
    /// cannot be written) are returned as errors; everything a submission
    /// can cause is an [`ExecutionOutcome`].
    pub async fn execute(
        &self,
        tier: CredentialTier,
        query: &Path,
        database: &str,
        output: &Path,
        budget: Duration,
    ) -> Result<ExecutionOutcome> {
        if !query.is_file() {
            return Ok(ExecutionOutcome::NoSubmission);
        }

        remove_stale(output).await?;

        let data_dir = self.working_dir.as_deref().unwrap_or(Path::new("."));
        let (program, args) = self.engine.command(tier, database, data_dir);
        let collected = match process::run_collect(
            &program,
            &args,
            StdinSource::File(query.to_path_buf()),
            self.working_dir.as_deref(),
            &[],
            Some(budget),
        )
        .await
        {
            Ok(collected) => collected,
            Err(RunError::TimedOut(_)) => {
                tracing::warn!("{} ran past {budget:?}, killed", query.display());
                self.engine.terminate().await;
                return Ok(ExecutionOutcome::Timeout);
            }
            Err(RunError::Io(e)) => {
                return Err(e).with_context(|| format!("Could not run {}", query.display()));
            }
        };

        if killed_by_timeout(&collected.status) {
            tracing::warn!("{} was killed ({})", query.display(), collected.status);
            return Ok(ExecutionOutcome::Timeout);
        }

        let (Ok(stdout), Ok(stderr)) = (
            String::from_utf8(collected.stdout),
            String::from_utf8(collected.stderr),
        ) else {
            tracing::debug!("{} produced output that is not UTF-8", query.display());
            return Ok(ExecutionOutcome::DecodeError);
        };

        let outcome = if collected.status.success() {
            write_output(output, &stdout).await?;
            ExecutionOutcome::Success(output.to_path_buf())
        } else {
            let diagnostic = diagnostic_line(&stderr);
            let mut contents = stdout;
            contents.push_str(&diagnostic);
            contents.push('\n');
            write_output(output, &contents).await?;
            ExecutionOutcome::SyntaxError(diagnostic)
        };

        tracing::debug!("{} -> {:?}", query.display(), outcome);
        Ok(outcome)
    }
}

/// Whether the exit status says the process was killed for overrunning.
#[cfg(unix)]
fn killed_by_timeout(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;

    match status.code() {
        Some(code) => TIMEOUT_EXIT_CODES.contains(&code),
        None => status.signal() == Some(libc::SIGKILL),
    }
}

/// Whether the exit status says the process was killed for overrunning.
#[cfg(not(unix))]
fn killed_by_timeout(status: &ExitStatus) -> bool {
    status
        .code()
        .is_some_and(|code| TIMEOUT_EXIT_CODES.contains(&code))
}

/// Picks the engine's error message out of its stderr.
///
/// The first line is the client's banner (e.g. the insecure-password
/// warning); the error is on the second. Without a second line the whole
/// stream is used.
pub fn diagnostic_line(stderr: &str) -> String {
    match stderr.lines().nth(1) {
        Some(line) if !line.trim().is_empty() => line.trim_end().to_string(),
        _ => stderr.trim().to_string(),
    }
}

/// Deletes an output file left over from an earlier run.
async fn remove_stale(output: &Path) -> Result<()> {
    match tokio::fs::remove_file(output).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("Could not remove stale output {}", output.display()))
        }
    }
}

/// Writes produced output for later comparison.
async fn write_output(output: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(output, contents)
        .await
        .with_context(|| format!("Could not write output to {}", output.display()))
}
