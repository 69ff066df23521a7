//! Helpers shared by the relational session variants.

use crate::error::ConduitError;
use crate::models::ConnectionConfig;
use std::time::Instant;

/// Leading keywords of statements that produce a row stream. Everything
/// else goes through the execute path and reports affected rows.
const ROW_RETURNING_PREFIXES: &[&str] = &[
    "select", "show", "pragma", "explain", "with", "describe", "desc", "values",
];

/// Whether a statement should be fetched (rows) rather than executed
/// (affected count).
pub(crate) fn is_row_returning(statement: &str) -> bool {
    let first = statement
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    ROW_RETURNING_PREFIXES.contains(&first.as_str())
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

pub(crate) fn not_connected(config: &ConnectionConfig) -> ConduitError {
    ConduitError::connection(format!("{} session is not connected", config.backend))
}

/// Build the enriched connection error for a failed connect: driver code,
/// endpoint, and an operator hint, all preserved.
pub(crate) fn connect_error(config: &ConnectionConfig, err: sqlx::Error) -> ConduitError {
    let code = match &err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.to_string()),
        _ => None,
    };
    let message = err.to_string();
    let hint = connect_hint(config, &message);
    ConduitError::connection_detailed(message, code, config.host.clone(), config.port, hint)
}

fn connect_hint(config: &ConnectionConfig, message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("connection refused") {
        return format!(
            "check that the {} server is running and accepting connections on {}:{}",
            config.backend, config.host, config.port
        );
    }
    if lower.contains("authentication") || lower.contains("password") || lower.contains("denied") {
        return "verify the username and password".to_string();
    }
    if lower.contains("does not exist") || lower.contains("unknown database") {
        return "check that the database name exists on the server".to_string();
    }
    if lower.contains("tls") || lower.contains("ssl") {
        return "check the TLS configuration or try disabling it".to_string();
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return "check network connectivity and firewall rules".to_string();
    }
    format!("verify the {} connection settings", config.backend)
}

pub(crate) fn connect_timeout_error(config: &ConnectionConfig) -> ConduitError {
    ConduitError::connection_detailed(
        format!("connect timed out after {}s", config.timeout_secs),
        None,
        config.host.clone(),
        config.port,
        "check network connectivity and firewall rules",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendKind;

    #[test]
    fn test_row_returning_detection() {
        assert!(is_row_returning("SELECT 1"));
        assert!(is_row_returning("  select * from t"));
        assert!(is_row_returning("PRAGMA table_info('t')"));
        assert!(is_row_returning("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(is_row_returning("SHOW DATABASES"));
        assert!(!is_row_returning("INSERT INTO t VALUES (1)"));
        assert!(!is_row_returning("UPDATE t SET a = 1"));
        assert!(!is_row_returning("USE sales"));
        assert!(!is_row_returning(""));
    }

    #[test]
    fn test_connect_hint_refused() {
        let config = ConnectionConfig::new(BackendKind::Postgres, "db.internal", 5432);
        let hint = connect_hint(&config, "Connection refused (os error 111)");
        assert!(hint.contains("db.internal:5432"));
    }

    #[test]
    fn test_connect_hint_auth() {
        let config = ConnectionConfig::new(BackendKind::MySql, "h", 3306);
        let hint = connect_hint(&config, "Access denied for user 'root'@'%'");
        assert!(hint.contains("username and password"));
    }
}
