//! Configuration utilities re-exported at the crate root.
//!
//! [`ShorelineConfig::load`] reads `config/config.toml` (optional) and overlays
//! environment variables prefixed with `SHORELINE`, using `__` as the nesting
//! separator, e.g. `SHORELINE__DATABASE__HOST` or `SHORELINE__MIGRATIONS__DIRECTORY`.

pub use crate::pool::config::*;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the optional configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Top-level configuration: target database plus migration settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShorelineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

/// Where migrations live and how the ledger and lock behave
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationsConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
    #[serde(default)]
    pub allow_out_of_order: bool,
    /// Advisory lock key; derived from `table_name` when unset
    #[serde(default)]
    pub lock_key: Option<i64>,
}

fn default_directory() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_table_name() -> String {
    crate::migration::DEFAULT_LEDGER_TABLE.to_string()
}

fn default_lock_timeout_seconds() -> u64 {
    60
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            table_name: default_table_name(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            allow_out_of_order: false,
            lock_key: None,
        }
    }
}

impl MigrationsConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Message` if the ledger table name is not a plain identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::migration::ledger::validate_table_name(&self.table_name)
            .map_err(|e| ConfigError::Message(format!("migrations.table_name: {e}")))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    pub fn lock_key(&self) -> i64 {
        self.lock_key
            .unwrap_or_else(|| crate::migration::lock::lock_key_for(&self.table_name))
    }
}

impl ShorelineConfig {
    /// Load from `config/config.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from the given TOML file (optional) overlaid with `SHORELINE__*` env vars
    ///
    /// If the file exists but cannot be parsed, a warning is logged and the
    /// configuration is rebuilt from the environment alone.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let builder = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(env_source());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if path.exists() {
                    log::warn!(
                        "failed to load config file {}, falling back to env: {err}",
                        path.display()
                    );
                }
                Config::builder()
                    .add_source(env_source())
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        settings.try_deserialize()
    }

    /// Parse configuration from a TOML document, without consulting the environment
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Validate both sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.migrations.validate()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("SHORELINE").separator("__")
}
