#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::{Context, Result};

use crate::engine::{Credentials, EngineConfig};

/// Default per-query execution budget in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default name of the database student queries run against.
pub const DEFAULT_DATABASE: &str = "grading";

/// Runtime configuration shared across the crate.
pub struct ConfigState {
    /// How long a single query may run before it is killed.
    timeout:  Duration,
    /// Database targeted by reference and student queries.
    database: String,
    /// How the query engine is reached.
    engine:   EngineConfig,
}

impl ConfigState {
    /// Construct a new configuration instance from the environment.
    fn new() -> Result<Self> {
        let timeout = read_timeout_secs("SQLGRADE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let database =
            std::env::var("SQLGRADE_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());

        let mut engine = match std::env::var_os("SQLGRADE_ENGINE_CONFIG") {
            Some(path) => EngineConfig::load(&PathBuf::from(path))?,
            None => EngineConfig::mysql_docker(
                &read_or("SQLGRADE_MYSQL_IMAGE", "mysql:8"),
                &read_or("SQLGRADE_MYSQL_HOST", "127.0.0.1"),
                std::env::var("SQLGRADE_MYSQL_PORT")
                    .ok()
                    .map(|port| port.parse::<u16>())
                    .transpose()
                    .context("SQLGRADE_MYSQL_PORT is not a valid port")?
                    .unwrap_or(3306),
            ),
        };

        if let Some(admin) = credentials_from_env("SQLGRADE_ADMIN_USER", "SQLGRADE_ADMIN_PASSWORD")
        {
            engine.admin = admin;
        }
        if let Some(student) =
            credentials_from_env("SQLGRADE_STUDENT_USER", "SQLGRADE_STUDENT_PASSWORD")
        {
            engine.student = student;
        }

        Ok(Self {
            timeout,
            database,
            engine,
        })
    }

    /// Returns the configured execution budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the configured grading database.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the configured engine description.
    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }
}

/// Shared configuration handle used throughout the crate.
#[derive(Clone)]
pub struct ConfigHandle(Arc<ConfigState>);

impl std::ops::Deref for ConfigHandle {
    type Target = ConfigState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Global storage for the lazily constructed configuration state.
static CONFIG_SLOT: OnceLock<Mutex<Option<Arc<ConfigState>>>> = OnceLock::new();

/// Returns the mutex guarding the global configuration slot.
fn slot() -> &'static Mutex<Option<Arc<ConfigState>>> {
    CONFIG_SLOT.get_or_init(|| Mutex::new(None))
}

/// Ensure the global configuration has been initialized and return a handle.
pub fn ensure_initialized() -> Result<ConfigHandle> {
    let mut guard = slot()
        .lock()
        .map_err(|_| anyhow::anyhow!("config slot poisoned"))?;
    if let Some(cfg) = guard.as_ref() {
        return Ok(ConfigHandle(Arc::clone(cfg)));
    }

    let cfg = Arc::new(ConfigState::new()?);
    *guard = Some(Arc::clone(&cfg));
    Ok(ConfigHandle(cfg))
}

/// Reads a credential pair, requiring the user to be set and non-empty.
fn credentials_from_env(user_var: &str, password_var: &str) -> Option<Credentials> {
    let user = std::env::var(user_var).ok()?.trim().to_owned();
    if user.is_empty() {
        return None;
    }
    let password = std::env::var(password_var).unwrap_or_default();
    Some(Credentials::new(user, password))
}

/// Reads an environment variable, falling back to `default` when unset.
fn read_or(env: &str, default: &str) -> String {
    std::env::var(env)
        .map(|value| value.trim().to_owned())
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parses an environment variable into a `Duration`, falling back to
/// `default_secs` when parsing fails or the variable is missing.
fn read_timeout_secs(env: &str, default_secs: u64) -> Duration {
    std::env::var(env)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}
