use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "tenant-migrator.toml";
pub const ENV_PREFIX: &str = "MIGRATOR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub migrations_dir: PathBuf,
    /// Connection string used when a request does not carry one.
    pub database_url: Option<String>,
    pub lock_wait_secs: u64,
    pub request_timeout_secs: Option<u64>,
    /// Take the runner's advisory lock around mutating commands.
    pub runner_locking: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8000,
            migrations_dir: PathBuf::from("."),
            database_url: None,
            lock_wait_secs: 30,
            request_timeout_secs: None,
            runner_locking: true,
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` (or `tenant-migrator.toml` if present),
    /// then `MIGRATOR_*` environment variables. `DATABASE_URL` fills in
    /// `database_url` when nothing else did.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path.to_path_buf()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let mut config = Self::build(file, true)?;
        if config.database_url.is_none() {
            config.database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        }

        config.validate()?;
        debug!(
            migrations_dir = %config.migrations_dir.display(),
            port = config.server_port,
            "configuration resolved"
        );
        Ok(config)
    }

    /// Load from a single file, ignoring the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::build(File::from(path.to_path_buf()).required(true), false)?;
        config.validate()?;
        Ok(config)
    }

    fn build<F>(file: F, with_env: bool) -> Result<Self, ConfigError>
    where
        F: config::Source + Send + Sync + 'static,
    {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("server_host", defaults.server_host)?
            .set_default("server_port", i64::from(defaults.server_port))?
            .set_default("migrations_dir", defaults.migrations_dir.to_string_lossy().to_string())?
            .set_default("lock_wait_secs", defaults.lock_wait_secs as i64)?
            .set_default("runner_locking", defaults.runner_locking)?
            .add_source(file);
        if with_env {
            builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::Invalid("server_host must not be empty".to_string()));
        }
        if self.migrations_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("migrations_dir must not be empty".to_string()));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
