//! Resolve CLI settings from the config file, environment and flags

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use shoreline::config::{DatabaseConfig, ShorelineConfig, DEFAULT_CONFIG_PATH};

/// Environment variables consulted for a database URL, in priority order
pub const DATABASE_URL_VARS: [&str; 2] = ["SHORELINE_DATABASE_URL", "DATABASE_URL"];

/// `--database-url`, else the first non-empty variable of [`DATABASE_URL_VARS`]
pub fn resolve_database_url(
    flag: Option<String>,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    flag.or_else(|| {
        DATABASE_URL_VARS
            .iter()
            .filter_map(|var| env(var))
            .find(|url| !url.trim().is_empty())
    })
}

/// Load configuration and apply command-line overrides
///
/// A database URL replaces the individual connection fields of the file;
/// pool settings are kept.
pub fn load_config(
    config_path: Option<&Path>,
    database_url: Option<String>,
    migrations_dir: Option<PathBuf>,
) -> Result<ShorelineConfig> {
    let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    let mut config = ShorelineConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    if let Some(url) = resolve_database_url(database_url, |var| std::env::var(var).ok()) {
        config.database = DatabaseConfig {
            max_connections: config.database.max_connections,
            pool_timeout_seconds: config.database.pool_timeout_seconds,
            ..DatabaseConfig::from_url(url)
        };
    }
    if let Some(dir) = migrations_dir {
        config.migrations.directory = dir;
    }

    Ok(config)
}
