use config::ConfigError;
use serde::Deserialize;
use std::fmt;

use crate::connection::validate_connection_string;

/// Credentials and pool sizing for the target database
///
/// Either `url` is set, or the individual `host`/`port`/`database`/`user`/`password`
/// fields are. Call [`DatabaseConfig::validate`] before building a pool.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_pool_timeout_seconds")]
    pub pool_timeout_seconds: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    10
}

fn default_pool_timeout_seconds() -> u64 {
    30 // Default timeout of 30 seconds
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            max_connections: default_max_connections(),
            pool_timeout_seconds: default_pool_timeout_seconds(),
        }
    }
}

// Hand-written so the password never ends up in logs.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("pool_timeout_seconds", &self.pool_timeout_seconds)
            .finish()
    }
}

impl DatabaseConfig {
    /// Build a config from a connection URL, keeping the default pool settings
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Check that every credential needed to connect is present
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the first missing or invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Message(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }

        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return validate_connection_string(url)
                .map_err(|e| ConfigError::Message(format!("database.url: {e}")));
        }

        let required = [
            ("database.host", &self.host),
            ("database.database", &self.database),
            ("database.user", &self.user),
            ("database.password", &self.password),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!("{key} must not be empty")));
            }
        }

        if self.port == 0 {
            return Err(ConfigError::Message(
                "database.port must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the settings as a `may_postgres` connection string
    ///
    /// A configured `url` wins; otherwise a key-value string is built with every
    /// value quoted, so passwords containing spaces or quotes survive.
    pub fn connection_string(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }

        format!(
            "host={} port={} dbname={} user={} password={}",
            quote(&self.host),
            self.port,
            quote(&self.database),
            quote(&self.user),
            quote(&self.password),
        )
    }
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
