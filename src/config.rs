use crate::error::{RdfsError, Result};

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

static CONFIG_FILE_ENV_KEY: &str = "RDFS_CONFIG_FILE";

static DEFAULT_HOST: &str = "localhost";
static DEFAULT_PORT: u16 = 9000;
static DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
static DEFAULT_IO_TIMEOUT_MS: u64 = 30_000;
static DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
static DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
static DEFAULT_IO_BUFFER_SIZE: usize = 64 * 1024;

/// Validated, immutable parameters for one logical namenode connection.
///
/// Built through [`ConnectionConfig::builder`]; once built it never changes,
/// and it outlives any session created from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    credentials: Option<String>,
    connect_timeout_ms: u64,
    io_timeout_ms: u64,
    retry_max_attempts: u32,
    retry_base_delay_ms: u64,
    io_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn builder(host: impl Into<String>, port: u16) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            host: host.into(),
            port,
            credentials: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn retry_max_attempts(&self) -> u32 {
        self.retry_max_attempts
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn io_buffer_size(&self) -> usize {
        self.io_buffer_size
    }
}

/// Assembles a [`ConnectionConfig`]. Setters take and return the builder by
/// value; nothing is shared until `build` validates the result.
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    host: String,
    port: u16,
    credentials: Option<String>,
    connect_timeout_ms: u64,
    io_timeout_ms: u64,
    retry_max_attempts: u32,
    retry_base_delay_ms: u64,
    io_buffer_size: usize,
}

impl ConnectionConfigBuilder {
    pub fn credentials(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(token.into());
        self
    }

    pub fn connect_timeout_ms(mut self, millis: u64) -> Self {
        self.connect_timeout_ms = millis;
        self
    }

    pub fn io_timeout_ms(mut self, millis: u64) -> Self {
        self.io_timeout_ms = millis;
        self
    }

    pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = attempts;
        self
    }

    pub fn retry_base_delay_ms(mut self, millis: u64) -> Self {
        self.retry_base_delay_ms = millis;
        self
    }

    pub fn io_buffer_size(mut self, bytes: usize) -> Self {
        self.io_buffer_size = bytes;
        self
    }

    /// Pure validation; no network access happens here.
    pub fn build(self) -> Result<ConnectionConfig> {
        if self.host.trim().is_empty() {
            return Err(RdfsError::ConfigError(
                "namenode host must not be empty".to_owned(),
            ));
        }
        if self.port == 0 {
            return Err(RdfsError::ConfigError(
                "namenode port must be in range 1-65535".to_owned(),
            ));
        }
        if self.io_buffer_size == 0 {
            return Err(RdfsError::ConfigError(
                "io_buffer_size must be greater than zero".to_owned(),
            ));
        }

        Ok(ConnectionConfig {
            host: self.host,
            port: self.port,
            credentials: self.credentials,
            connect_timeout_ms: self.connect_timeout_ms,
            io_timeout_ms: self.io_timeout_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            io_buffer_size: self.io_buffer_size,
        })
    }
}

/// File-based configuration, loaded from the TOML file named by the
/// `RDFS_CONFIG_FILE` environment variable.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: Connection,
    pub retry: Retry,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub host: String,
    pub port: u16,
    pub credentials: Option<String>,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub io_buffer_size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Config {
    pub fn load_from_file() -> Result<Self> {
        let path = std::env::var(CONFIG_FILE_ENV_KEY).map_err(|_| {
            RdfsError::ConfigError(format!(
                "Could not read {} environment variable.",
                CONFIG_FILE_ENV_KEY
            ))
        })?;
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RdfsError::ConfigError(format!(
                "{} does not exist.",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(RdfsError::ConfigError(format!(
                "{} is not a file.",
                path.display()
            )));
        }

        let config = std::fs::read_to_string(path)?;
        let config: Self = toml::de::from_str(&config)?;

        Ok(config)
    }

    /// Lowers the file config into a validated [`ConnectionConfig`].
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        let mut builder = ConnectionConfig::builder(&self.connection.host, self.connection.port)
            .connect_timeout_ms(self.connection.connect_timeout_ms)
            .io_timeout_ms(self.connection.io_timeout_ms)
            .io_buffer_size(self.connection.io_buffer_size)
            .retry_max_attempts(self.retry.max_attempts)
            .retry_base_delay_ms(self.retry.base_delay_ms);
        if let Some(ref token) = self.connection.credentials {
            builder = builder.credentials(token);
        }
        builder.build()
    }
}

impl std::default::Default for Connection {
    fn default() -> Self {
        Self {
            host: String::from(DEFAULT_HOST),
            port: DEFAULT_PORT,
            credentials: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
        }
    }
}

impl std::default::Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}
