//! Connection configuration.
//!
//! A `ConnectionConfig` is immutable once a pool has been built from it.
//! Validation runs before any network attempt, so a config with a garbage
//! port never opens a socket.

use crate::error::{ConduitError, ConduitResult};
use crate::models::backend::{AuthMode, BackendKind};
use serde::{Deserialize, Serialize};

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Configuration for one backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub backend: BackendKind,
    pub host: String,
    /// Kept as u32 so an out-of-range value from a UI form survives long
    /// enough to be rejected by `validate()` instead of wrapping.
    pub port: u32,
    pub username: Option<String>,
    /// Contains sensitive data - never log, never serialize
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    /// Database name, Redis database index, or SQLite file path.
    pub database: Option<String>,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auth_mode: AuthMode,
}

fn default_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl ConnectionConfig {
    /// Minimal config for a network backend; credentials and options via
    /// the builder-style setters.
    pub fn new(backend: BackendKind, host: impl Into<String>, port: u32) -> Self {
        Self {
            backend,
            host: host.into(),
            port,
            username: None,
            password: None,
            database: None,
            use_tls: false,
            timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            auth_mode: AuthMode::None,
        }
    }

    /// Config for a SQLite file.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Sqlite,
            host: String::new(),
            port: 0,
            username: None,
            password: None,
            database: Some(path.into()),
            use_tls: false,
            timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            auth_mode: AuthMode::None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self.auth_mode = AuthMode::Password;
        self
    }

    /// Redis-style password-only auth.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self.auth_mode = AuthMode::Password;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Validate the config. Must pass before any I/O is attempted.
    pub fn validate(&self) -> ConduitResult<()> {
        if self.timeout_secs == 0 {
            return Err(ConduitError::config("timeout_secs must be greater than 0"));
        }

        if self.backend.is_file_based() {
            match self.database.as_deref() {
                Some(path) if !path.is_empty() => {}
                _ => {
                    return Err(ConduitError::config(
                        "sqlite requires a database file path",
                    ));
                }
            }
            return Ok(());
        }

        if self.host.is_empty() {
            return Err(ConduitError::config(format!(
                "{} connection requires a host",
                self.backend
            )));
        }
        if self.port == 0 || self.port > 65535 {
            return Err(ConduitError::config(format!(
                "port {} is out of range (expected 1-65535)",
                self.port
            )));
        }

        if self.auth_mode == AuthMode::Password {
            if self.password.as_deref().unwrap_or("").is_empty() {
                return Err(ConduitError::config(
                    "password auth selected but no password provided",
                ));
            }
            // Redis accepts password-only auth; SQL backends need a user.
            if !self.backend.is_key_value() && self.username.as_deref().unwrap_or("").is_empty() {
                return Err(ConduitError::config(format!(
                    "{} password auth requires a username",
                    self.backend
                )));
            }
        }

        Ok(())
    }

    /// Deterministic pool identity derived from the key fields.
    ///
    /// Equal (backend, host, port, database) always produce the same
    /// identity; a difference in any of the four produces a different one.
    pub fn pool_identity(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.backend.as_str(),
            self.host,
            self.port,
            self.database.as_deref().unwrap_or("")
        )
    }

    /// Credential-free endpoint string for logs and error messages.
    pub fn masked_endpoint(&self) -> String {
        if self.backend.is_file_based() {
            return format!("sqlite:{}", self.database.as_deref().unwrap_or("?"));
        }
        match &self.username {
            Some(user) => format!(
                "{}://{}:****@{}:{}",
                self.backend.as_str(),
                user,
                self.host,
                self.port
            ),
            None => format!("{}://{}:{}", self.backend.as_str(), self.host, self.port),
        }
    }
}
