//! Backend identification.
//!
//! `BackendKind` is a closed enum: the factory matches on it exhaustively,
//! so adding a backend is a compile-time-checked change rather than a
//! string falling through a default arm.

use serde::{Deserialize, Serialize};

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    MySql,
    Postgres,
    Sqlite,
    Redis,
    /// Stub backend: constructs, but every operation fails with
    /// `NotImplemented`.
    Mongo,
}

impl BackendKind {
    /// Stable identifier used in pool identities and URL schemes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::Redis => "redis",
            Self::Mongo => "mongodb",
        }
    }

    /// Parse from a URL scheme or identifier string.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            "redis" | "rediss" => Some(Self::Redis),
            "mongodb" => Some(Self::Mongo),
            _ => None,
        }
    }

    /// Default port for network backends. SQLite is file-based.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
            Self::Redis => Some(6379),
            Self::Mongo => Some(27017),
        }
    }

    /// Key-value backends dispatch commands instead of executing SQL.
    pub fn is_key_value(&self) -> bool {
        matches!(self, Self::Redis)
    }

    /// File-based backends have no host/port to validate.
    pub fn is_file_based(&self) -> bool {
        matches!(self, Self::Sqlite)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the backend authenticates the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No credentials (trust auth, local sockets, unprotected Redis).
    #[default]
    None,
    /// Username/password (Redis accepts password-only).
    Password,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_scheme() {
        assert_eq!(BackendKind::from_scheme("mysql"), Some(BackendKind::MySql));
        assert_eq!(
            BackendKind::from_scheme("mariadb"),
            Some(BackendKind::MySql)
        );
        assert_eq!(
            BackendKind::from_scheme("POSTGRESQL"),
            Some(BackendKind::Postgres)
        );
        assert_eq!(
            BackendKind::from_scheme("rediss"),
            Some(BackendKind::Redis)
        );
        assert_eq!(BackendKind::from_scheme("oracle"), None);
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(BackendKind::MySql.default_port(), Some(3306));
        assert_eq!(BackendKind::Redis.default_port(), Some(6379));
        assert_eq!(BackendKind::Sqlite.default_port(), None);
    }

    #[test]
    fn test_classification() {
        assert!(BackendKind::Redis.is_key_value());
        assert!(!BackendKind::Postgres.is_key_value());
        assert!(BackendKind::Sqlite.is_file_based());
    }
}
