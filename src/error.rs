//! Error types for db-conduit.
//!
//! All errors are defined with `thiserror`. Connection failures carry the
//! backend diagnostic fields verbatim (driver error code, host, port, vendor
//! hint) because the operator debugging a broken connection needs them more
//! than a terse message.
//!
//! Statement-level failures never surface here: they are captured into
//! [`QueryResult::error`](crate::models::QueryResult) so that batch callers
//! can inspect partial results. Everything in this module is a lifecycle
//! failure (validation, connect, pool, dispatch).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConduitError {
    /// Configuration rejected before any I/O was attempted.
    #[error("Invalid configuration: {message}")]
    ConfigValidation { message: String },

    /// Network or authentication failure while connecting or talking to a
    /// backend. Diagnostic fields are preserved from the driver.
    #[error("Connection failed: {message}")]
    Connection {
        message: String,
        /// Driver/vendor error code, e.g. "28P01" or "ER_ACCESS_DENIED_ERROR"
        code: Option<String>,
        host: Option<String>,
        port: Option<u32>,
        /// Vendor hint for the operator, e.g. "check that the server accepts
        /// TCP connections on this port"
        hint: Option<String>,
    },

    /// `acquire()` waited the full acquire timeout without getting a
    /// connection.
    #[error(
        "Connection pool '{identity}' exhausted: no connection became available within {waited_secs}s"
    )]
    PoolExhausted { identity: String, waited_secs: u64 },

    /// An operation referenced a pool identity the registry does not know.
    #[error("Connection pool not found: {identity}")]
    PoolNotFound { identity: String },

    /// An operation was attempted on a pool after `destroy()`.
    #[error("Connection pool '{identity}' has been destroyed")]
    PoolDestroyed { identity: String },

    /// Key-value dispatcher received a command outside the closed
    /// vocabulary.
    #[error("Unsupported command: {command}")]
    UnsupportedCommand { command: String },

    /// A native transaction failed and was rolled back.
    #[error("Transaction failed: {message}")]
    Transaction { message: String },

    /// Metadata lookup failed (missing table, unknown object).
    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    /// The backend cannot perform this operation. Stub backends return this
    /// for everything; real backends return it for genuine capability gaps
    /// (e.g. listing databases on SQLite).
    #[error("{backend} does not implement {operation}")]
    NotImplemented { backend: String, operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ConduitError {
    /// Create a config validation error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a connection error without endpoint context.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            code: None,
            host: None,
            port: None,
            hint: None,
        }
    }

    /// Create a connection error with the full diagnostic set.
    pub fn connection_detailed(
        message: impl Into<String>,
        code: Option<String>,
        host: impl Into<String>,
        port: u32,
        hint: impl Into<String>,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            code,
            host: Some(host.into()),
            port: Some(port),
            hint: Some(hint.into()),
        }
    }

    pub fn pool_exhausted(identity: impl Into<String>, waited_secs: u64) -> Self {
        Self::PoolExhausted {
            identity: identity.into(),
            waited_secs,
        }
    }

    pub fn pool_not_found(identity: impl Into<String>) -> Self {
        Self::PoolNotFound {
            identity: identity.into(),
        }
    }

    pub fn pool_destroyed(identity: impl Into<String>) -> Self {
        Self::PoolDestroyed {
            identity: identity.into(),
        }
    }

    pub fn unsupported_command(command: impl Into<String>) -> Self {
        Self::UnsupportedCommand {
            command: command.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn not_implemented(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotImplemented {
            backend: backend.into(),
            operation: operation.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation has any chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::PoolExhausted { .. } | Self::PoolNotFound { .. }
        )
    }
}

/// Classify a sqlx error as connection-level (the session is unusable and
/// the failure must propagate) versus statement-level (capture into
/// `QueryResult.error`).
pub fn is_connection_fault(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed
    )
}

/// Convert sqlx errors into the conduit vocabulary. Used on lifecycle paths
/// (connect, begin/commit); statement paths stringify into `QueryResult`
/// instead.
impl From<sqlx::Error> for ConduitError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => ConduitError::config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                ConduitError::Connection {
                    message: db_err.message().to_string(),
                    code,
                    host: None,
                    port: None,
                    hint: None,
                }
            }
            sqlx::Error::Io(io_err) => ConduitError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => {
                ConduitError::connection(format!("TLS error: {}", tls_err))
            }
            sqlx::Error::Protocol(msg) => {
                ConduitError::connection(format!("Protocol error: {}", msg))
            }
            other => ConduitError::internal(format!("Database error: {}", other)),
        }
    }
}

impl From<redis::RedisError> for ConduitError {
    fn from(err: redis::RedisError) -> Self {
        ConduitError::Connection {
            message: err.to_string(),
            code: err.code().map(|c| c.to_string()),
            host: None,
            port: None,
            hint: None,
        }
    }
}

/// Result type alias used throughout the crate.
pub type ConduitResult<T> = Result<T, ConduitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConduitError::connection_detailed(
            "refused",
            Some("ECONNREFUSED".to_string()),
            "db.internal",
            5432,
            "check that the server is running",
        );
        assert!(err.to_string().contains("Connection failed"));
        match err {
            ConduitError::Connection {
                code, host, port, ..
            } => {
                assert_eq!(code.as_deref(), Some("ECONNREFUSED"));
                assert_eq!(host.as_deref(), Some("db.internal"));
                assert_eq!(port, Some(5432));
            }
            _ => panic!("expected Connection variant"),
        }
    }

    #[test]
    fn test_pool_errors_display_identity() {
        assert!(
            ConduitError::pool_not_found("mysql:h:3306:db")
                .to_string()
                .contains("mysql:h:3306:db")
        );
        assert!(
            ConduitError::pool_exhausted("redis:h:6379:", 30)
                .to_string()
                .contains("30s")
        );
        assert!(
            ConduitError::pool_destroyed("sqlite::0:a.db")
                .to_string()
                .contains("destroyed")
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ConduitError::connection("down").is_retryable());
        assert!(ConduitError::pool_exhausted("p", 30).is_retryable());
        assert!(!ConduitError::config("bad port").is_retryable());
        assert!(!ConduitError::unsupported_command("EVAL").is_retryable());
    }

    #[test]
    fn test_not_implemented_names_operation() {
        let err = ConduitError::not_implemented("mongodb", "listTables");
        assert_eq!(err.to_string(), "mongodb does not implement listTables");
    }

    #[test]
    fn test_connection_fault_classification() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(is_connection_fault(&io));
        assert!(!is_connection_fault(&sqlx::Error::RowNotFound));
    }
}
