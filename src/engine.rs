#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Access to the external query engine.
//!
//! The engine is never linked into this crate. Every query is run by
//! spawning a client command (by default a throw-away `mysql` client
//! container) whose stdin is the query file and whose stdout is the result
//! set as tab-separated text.

use std::{ffi::OsString, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use which::which;

use crate::process::{self, StdinSource};

/// Name given to the ephemeral execution so it can be killed by name.
pub const DEFAULT_EXECUTION_NAME: &str = "sqlgrade-exec";

/// How long the kill-by-name command itself may take.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(15);

/// A user/password pair for the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub user:     String,
    /// Account password, may be empty.
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user:     user.into(),
            password: password.into(),
        }
    }
}

/// Which credential a query runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialTier {
    /// Elevated account used for schema setup and reference answers.
    Admin,
    /// Restricted account used for student queries.
    Student,
}

/// Default administrative credential.
fn default_admin() -> Credentials {
    Credentials::new("root", "")
}

/// Default restricted credential.
fn default_student() -> Credentials {
    Credentials::new("student", "")
}

/// Default execution name, used by serde.
fn default_execution_name() -> String {
    DEFAULT_EXECUTION_NAME.to_string()
}

/// Describes how to launch (and kill) one query execution.
///
/// `args` and `kill_args` are templates: `{user}`, `{password}`,
/// `{database}`, `{name}` and `{data}` are substituted before spawning.
/// Arguments that render to an empty string are dropped, so a template
/// argument of just `{database}` disappears when no database is targeted.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct EngineConfig {
    /// Client program to spawn.
    #[builder(setter(into))]
    pub program:        String,
    /// Argument template for `program`.
    #[serde(default)]
    #[builder(default)]
    pub args:           Vec<String>,
    /// Program used to kill a runaway execution by name.
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub kill_program:   Option<String>,
    /// Argument template for `kill_program`.
    #[serde(default)]
    #[builder(default)]
    pub kill_args:      Vec<String>,
    /// Name of the ephemeral execution.
    #[serde(default = "default_execution_name")]
    #[builder(default = default_execution_name(), setter(into))]
    pub execution_name: String,
    /// Credential for schema setup and reference answers.
    #[serde(default = "default_admin")]
    #[builder(default = default_admin())]
    pub admin:          Credentials,
    /// Credential for student queries.
    #[serde(default = "default_student")]
    #[builder(default = default_student())]
    pub student:        Credentials,
}

impl EngineConfig {
    /// A `mysql` client run in a disposable docker container against a
    /// server listening on `host:port`. The data directory is mounted
    /// read-only at the same path and used as the container's working
    /// directory, so `LOAD DATA LOCAL INFILE` sees the same relative paths
    /// as the host.
    pub fn mysql_docker(image: &str, host: &str, port: u16) -> Self {
        let port = port.to_string();
        let args = [
            "run",
            "--rm",
            "-i",
            "--name",
            "{name}",
            "--network",
            "host",
            "-v",
            "{data}:{data}:ro",
            "-w",
            "{data}",
            image,
            "mysql",
            "-h",
            host,
            "-P",
            port.as_str(),
            "--local-infile=1",
            "-u{user}",
            "-p{password}",
            "-N",
            "-B",
            "{database}",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        Self::builder()
            .program("docker")
            .args(args)
            .kill_program("docker")
            .kill_args(vec!["kill".to_string(), "{name}".to_string()])
            .build()
    }

    /// Loads an engine description from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read engine config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Could not parse engine config {}", path.display()))
    }

    /// Returns the credential for `tier`.
    pub fn credentials(&self, tier: CredentialTier) -> &Credentials {
        match tier {
            CredentialTier::Admin => &self.admin,
            CredentialTier::Student => &self.student,
        }
    }
}

/// Values substituted into an argument template.
struct Placeholders<'a> {
    /// Credential of the selected tier.
    creds:    &'a Credentials,
    /// Target database, empty for none.
    database: &'a str,
    /// Execution name.
    name:     &'a str,
    /// Absolute data directory.
    data:     String,
}

impl Placeholders<'_> {
    /// Renders every template, dropping arguments that end up empty.
    fn render_all(&self, templates: &[String]) -> Vec<OsString> {
        templates
            .iter()
            .map(|template| {
                template
                    .replace("{user}", &self.creds.user)
                    .replace("{password}", &self.creds.password)
                    .replace("{database}", self.database)
                    .replace("{name}", self.name)
                    .replace("{data}", &self.data)
            })
            .filter(|arg| !arg.is_empty())
            .map(OsString::from)
            .collect()
    }
}

/// Absolute form of `dir`, as given when it cannot be resolved.
fn absolute_dir(dir: &Path) -> String {
    std::path::absolute(dir)
        .unwrap_or_else(|_| dir.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// A handle on the shared query engine.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    /// How executions are launched.
    config: EngineConfig,
}

impl QueryEngine {
    /// Wraps an engine description.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Returns the underlying description.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ensures the client program can be found on `PATH`.
    pub fn locate(&self) -> Result<()> {
        which(&self.config.program).with_context(|| {
            format!("Cannot find the query engine client on path ({})", self.config.program)
        })?;
        Ok(())
    }

    /// Builds the program and arguments for one execution against
    /// `database` (empty for none), with `data_dir` as the data directory.
    pub fn command(
        &self,
        tier: CredentialTier,
        database: &str,
        data_dir: &Path,
    ) -> (OsString, Vec<OsString>) {
        let placeholders = Placeholders {
            creds: self.config.credentials(tier),
            database,
            name: &self.config.execution_name,
            data: absolute_dir(data_dir),
        };
        let args = placeholders.render_all(&self.config.args);
        (OsString::from(&self.config.program), args)
    }

    /// Kills the in-flight execution by name, if a kill command is
    /// configured. Failures are logged, not returned: by the time this runs
    /// the execution may already be gone.
    pub async fn terminate(&self) {
        let Some(program) = self.config.kill_program.as_deref() else {
            return;
        };
        let name = &self.config.execution_name;
        let args = Placeholders {
            creds: &self.config.admin,
            database: "",
            name,
            data: String::new(),
        }
        .render_all(&self.config.kill_args);

        match process::run_collect(
            program,
            &args,
            StdinSource::Null,
            None,
            &[],
            Some(TERMINATE_TIMEOUT),
        )
        .await
        {
            Ok(out) if out.status.success() => {
                tracing::debug!("Terminated execution `{name}`");
            }
            Ok(out) => {
                tracing::debug!(
                    "Kill command for `{name}` exited with {}: {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
            }
            Err(e) => tracing::warn!("Could not terminate execution `{name}`: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_docker_renders_credentials_and_database() {
        let engine = QueryEngine::new(EngineConfig::mysql_docker("mysql:8", "db.local", 3307));
        let (program, args) = engine.command(CredentialTier::Student, "hw", Path::new("/srv/data"));
        assert_eq!(program, "docker");
        assert!(args.contains(&OsString::from("-ustudent")));
        assert!(args.contains(&OsString::from("3307")));
        assert!(args.contains(&OsString::from(DEFAULT_EXECUTION_NAME)));
        assert_eq!(args.last(), Some(&OsString::from("hw")));
    }

    #[test]
    fn admin_tier_uses_admin_account() {
        let config = EngineConfig::builder()
            .program("client")
            .args(vec!["--user={user}".into(), "--pass={password}".into()])
            .admin(Credentials::new("boss", "s3cret"))
            .build();
        let (_, args) =
            QueryEngine::new(config).command(CredentialTier::Admin, "db", Path::new("."));
        assert_eq!(args, vec![OsString::from("--user=boss"), OsString::from("--pass=s3cret")]);
    }

    #[test]
    fn mysql_docker_mounts_the_data_directory() {
        let engine = QueryEngine::new(EngineConfig::mysql_docker("mysql:8", "db.local", 3306));
        let (_, args) = engine.command(CredentialTier::Admin, "hw", Path::new("/srv/data"));
        let position = |arg: &str| args.iter().position(|a| a == arg);
        let mount = position("/srv/data:/srv/data:ro").expect("mount");
        assert_eq!(position("-v"), Some(mount - 1));
        let workdir = position("-w").expect("workdir flag");
        assert_eq!(args[workdir + 1], OsString::from("/srv/data"));
        assert!(position("--local-infile=1").is_some());
    }

    #[test]
    fn empty_database_drops_the_argument() {
        let engine = QueryEngine::new(EngineConfig::mysql_docker("mysql:8", "db.local", 3306));
        let (_, with_db) = engine.command(CredentialTier::Admin, "hw", Path::new("/srv/data"));
        let (_, without_db) = engine.command(CredentialTier::Admin, "", Path::new("/srv/data"));
        assert_eq!(without_db.len() + 1, with_db.len());
        assert_eq!(without_db.last(), Some(&OsString::from("-B")));
    }

    #[test]
    fn relative_data_directory_is_made_absolute() {
        let config = EngineConfig::builder()
            .program("client")
            .args(vec!["{data}".into()])
            .build();
        let (_, args) =
            QueryEngine::new(config).command(CredentialTier::Student, "db", Path::new("data"));
        assert!(Path::new(&args[0]).is_absolute());
        assert!(Path::new(&args[0]).ends_with("data"));
    }

    #[test]
    fn engine_config_fills_defaults_from_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "program": "mysql", "args": ["{database}"] }"#)
                .expect("parse");
        assert_eq!(config.execution_name, DEFAULT_EXECUTION_NAME);
        assert_eq!(config.admin.user, "root");
        assert_eq!(config.student.user, "student");
        assert!(config.kill_program.is_none());
    }
}
