//! Configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Server
//! - `ORDER_DESK_DATA_DIR` - Database directory (default: ./data)
//! - `ORDER_DESK_HOST` - Bind address (default: 127.0.0.1)
//! - `ORDER_DESK_PORT` - Listen port (default: 5000)
//! - `ORDER_DESK_LOG_DIR` - Log directory (default: <data dir>/logs)
//! - `ORDER_DESK_STAFF_TOKEN` - Bearer token for staff routes (optional)
//! - `ORDER_DESK_FRONTEND_URL` - Allowed CORS origin (optional)
//! - `ORDER_DESK_SEED_CATALOG` - Seed the sample menu into an empty catalog (default: false)
//!
//! ## Client
//! - `ORDER_DESK_API_URL` - Order server base URL (required)
//! - `ORDER_DESK_CLIENT_DATA_DIR` - Local store directory (default: ./client-data)
//! - `ORDER_DESK_REQUEST_TIMEOUT_SECS` - Per-attempt timeout (default: 10)
//! - `ORDER_DESK_STARTUP_SYNC_DELAY_MS` - Delay before the startup sync (default: 2000)
//! - `ORDER_DESK_PROBE_INTERVAL_SECS` - Health probe interval (default: 15)

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::client::ClientOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub host: IpAddr,
    pub port: u16,
    pub log_dir: PathBuf,
    pub staff_token: Option<String>,
    pub frontend_url: Option<String>,
    pub seed_catalog: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("data_dir", &self.data_dir)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_dir", &self.log_dir)
            .field("staff_token", &self.staff_token.as_ref().map(|_| "[REDACTED]"))
            .field("frontend_url", &self.frontend_url)
            .field("seed_catalog", &self.seed_catalog)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub startup_sync_delay: Duration,
    pub probe_interval: Duration,
}

impl ServerConfig {
    /// Load from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let data_dir = PathBuf::from(env.or_default("ORDER_DESK_DATA_DIR", "./data"));
        let log_dir = env
            .optional("ORDER_DESK_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));

        Ok(Self {
            host: env.parsed("ORDER_DESK_HOST", "127.0.0.1")?,
            port: env.parsed("ORDER_DESK_PORT", "5000")?,
            staff_token: env.optional("ORDER_DESK_STAFF_TOKEN"),
            frontend_url: env.optional("ORDER_DESK_FRONTEND_URL"),
            seed_catalog: env.flag("ORDER_DESK_SEED_CATALOG")?,
            data_dir,
            log_dir,
        })
    }

    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        Ok(Self {
            api_url: env.required("ORDER_DESK_API_URL")?,
            data_dir: PathBuf::from(env.or_default("ORDER_DESK_CLIENT_DATA_DIR", "./client-data")),
            request_timeout: Duration::from_secs(
                env.non_zero("ORDER_DESK_REQUEST_TIMEOUT_SECS", "10")?,
            ),
            startup_sync_delay: Duration::from_millis(
                env.parsed("ORDER_DESK_STARTUP_SYNC_DELAY_MS", "2000")?,
            ),
            probe_interval: Duration::from_secs(
                env.non_zero("ORDER_DESK_PROBE_INTERVAL_SECS", "15")?,
            ),
        })
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            request_timeout: self.request_timeout,
            startup_sync_delay: self.startup_sync_delay,
        }
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.or_default(key, default)
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    }

    fn non_zero(&self, key: &str, default: &str) -> Result<u64, ConfigError> {
        match self.parsed::<u64>(key, default)? {
            0 => Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                "must be greater than zero".to_string(),
            )),
            n => Ok(n),
        }
    }

    fn flag(&self, key: &str) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("0" | "false" | "no" | "off") => Ok(false),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some(other) => Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("expected a boolean, got {other:?}"),
            )),
        }
    }
}
