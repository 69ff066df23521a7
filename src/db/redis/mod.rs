//! Redis session variant: command dispatch over a multiplexed connection.
//!
//! `execute_query` here is command dispatch, not SQL: the statement is
//! tokenized and matched against the closed vocabulary in [`command`].
//! Publish/subscribe never runs on this session - a subscribed connection
//! cannot issue ordinary commands, so the registry keeps a separate
//! [`subscriber::RedisSubscriber`] per pool.

pub mod command;
pub mod subscriber;

use crate::db::connection::Connection;
use crate::db::statement::elapsed_ms;
use crate::error::{ConduitError, ConduitResult};
use crate::models::{
    BackendKind, ConnectionConfig, DatabaseInfo, QueryParam, QueryResult, TableInfo, TableSchema,
};
use async_trait::async_trait;
use command::{CommandError, build_command};
use serde_json::{Map, Value as JsonValue};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Build the connection URL from config fields. The database field is the
/// numeric database index (0-15).
pub(crate) fn redis_url(config: &ConnectionConfig) -> String {
    let scheme = if config.use_tls { "rediss" } else { "redis" };
    let database = config.database.as_deref().unwrap_or("0");
    match (&config.username, &config.password) {
        (Some(user), Some(pass)) => format!(
            "{}://{}:{}@{}:{}/{}",
            scheme, user, pass, config.host, config.port, database
        ),
        (None, Some(pass)) => format!(
            "{}://:{}@{}:{}/{}",
            scheme, pass, config.host, config.port, database
        ),
        _ => format!("{}://{}:{}/{}", scheme, config.host, config.port, database),
    }
}

pub struct RedisSession {
    config: ConnectionConfig,
    conn: Option<redis::aio::MultiplexedConnection>,
}

impl RedisSession {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, conn: None }
    }

    fn connection_error(&self, err: &redis::RedisError) -> ConduitError {
        let hint = if err.to_string().contains("NOAUTH")
            || err.to_string().contains("Authentication")
        {
            "the server requires a password; set one in the connection settings"
        } else {
            "check that the Redis server is reachable and credentials are correct"
        };
        ConduitError::connection_detailed(
            err.to_string(),
            err.code().map(|c| c.to_string()),
            self.config.host.clone(),
            self.config.port,
            hint,
        )
    }

    async fn raw_info(&mut self, section: Option<&str>) -> ConduitResult<String> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ConduitError::connection("redis session is not connected"))?;
        let mut cmd = redis::cmd("INFO");
        if let Some(section) = section {
            cmd.arg(section);
        }
        let info: String = cmd
            .query_async(conn)
            .await
            .map_err(ConduitError::from)?;
        Ok(info)
    }
}

#[async_trait]
impl Connection for RedisSession {
    fn backend(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn connect(&mut self) -> ConduitResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let client = redis::Client::open(redis_url(&self.config))
            .map_err(|e| self.connection_error(&e))?;
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let mut conn =
            tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| {
                    ConduitError::connection_detailed(
                        format!("connect timed out after {}s", self.config.timeout_secs),
                        None,
                        self.config.host.clone(),
                        self.config.port,
                        "check network connectivity and firewall rules",
                    )
                })?
                .map_err(|e| self.connection_error(&e))?;

        // Auth failures surface on the first command, not on connect, so
        // verify with a PING before declaring the session live.
        let pong: Result<String, redis::RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(reply) => {
                if reply != "PONG" {
                    warn!(reply = %reply, "unexpected PING reply");
                }
            }
            Err(e) => return Err(self.connection_error(&e)),
        }

        debug!(endpoint = %self.config.masked_endpoint(), "Redis session connected");
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) -> ConduitResult<()> {
        // Dropping the multiplexed handle closes our clone of the pipe.
        self.conn = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn ping(&mut self) -> ConduitResult<()> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ConduitError::connection("redis session is not connected"))?;
        let reply: String = redis::cmd("PING")
            .query_async(conn)
            .await
            .map_err(|e| ConduitError::connection(format!("ping failed: {}", e)))?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(ConduitError::connection(format!(
                "unexpected ping reply: {}",
                reply
            )))
        }
    }

    async fn execute_query(
        &mut self,
        statement: &str,
        params: &[QueryParam],
    ) -> ConduitResult<QueryResult> {
        let started = Instant::now();
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ConduitError::connection("redis session is not connected"))?;

        let (command, cmd) = match build_command(statement, params) {
            Ok(built) => built,
            Err(CommandError::Unknown(name)) => {
                return Err(ConduitError::unsupported_command(name));
            }
            Err(arity @ CommandError::Arity { .. }) => {
                return Ok(QueryResult::failure(arity.to_string(), elapsed_ms(started)));
            }
        };

        let reply: Result<redis::Value, redis::RedisError> = cmd.query_async(conn).await;
        match reply {
            Ok(value) => {
                let (columns, rows) = reply_to_rows(&value);
                debug!(
                    command = command.name(),
                    rows = rows.len(),
                    duration_ms = elapsed_ms(started),
                    "redis command completed"
                );
                Ok(QueryResult::with_rows(columns, rows, elapsed_ms(started)))
            }
            Err(e) if e.is_connection_dropped() || e.is_io_error() => {
                self.conn = None;
                Err(ConduitError::from(e))
            }
            Err(e) => Ok(QueryResult::failure(e.to_string(), elapsed_ms(started))),
        }
    }

    /// Best-effort: Redis has no rollback, so statements run sequentially
    /// and earlier effects persist even when a later one fails. Returns
    /// whether every statement succeeded.
    async fn execute_transaction(&mut self, statements: &[String]) -> ConduitResult<bool> {
        let mut all_ok = true;
        for statement in statements {
            let result = self.execute_query(statement, &[]).await?;
            if !result.success {
                warn!(
                    statement = %statement,
                    error = result.error.as_deref().unwrap_or(""),
                    "redis transaction statement failed (no rollback)"
                );
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    async fn get_database_info(&mut self) -> ConduitResult<DatabaseInfo> {
        let info = self.raw_info(None).await?;
        let mut server_version = None;
        let mut size_bytes = None;
        for line in info.lines() {
            if let Some(version) = line.strip_prefix("redis_version:") {
                server_version = Some(version.trim().to_string());
            } else if let Some(memory) = line.strip_prefix("used_memory:") {
                size_bytes = memory.trim().parse::<u64>().ok();
            }
        }
        Ok(DatabaseInfo {
            backend: BackendKind::Redis,
            server_version,
            database: self.config.database.clone(),
            size_bytes,
        })
    }

    async fn get_table_structure(&mut self, _table: &str) -> ConduitResult<TableSchema> {
        Err(ConduitError::not_implemented("redis", "getTableStructure"))
    }

    async fn list_tables(&mut self) -> ConduitResult<Vec<TableInfo>> {
        Err(ConduitError::not_implemented("redis", "listTables"))
    }

    async fn list_databases(&mut self) -> ConduitResult<Vec<String>> {
        // Keyspace section lists only databases that hold keys:
        // "db0:keys=12,expires=0,avg_ttl=0"
        let info = self.raw_info(Some("keyspace")).await?;
        Ok(info
            .lines()
            .filter(|line| line.starts_with("db"))
            .filter_map(|line| line.split(':').next())
            .map(|name| name.to_string())
            .collect())
    }
}

const REPLY_COLUMNS: [&str; 2] = ["key", "value"];

/// Normalize a command reply into key/value-shaped rows.
///
/// Scalars become a single row with a null key; arrays become one row per
/// element (nested arrays, as SCAN returns, are flattened); maps and sets
/// keep their natural key/member shape.
fn reply_to_rows(value: &redis::Value) -> (Vec<String>, Vec<Map<String, JsonValue>>) {
    let columns: Vec<String> = REPLY_COLUMNS.iter().map(|c| c.to_string()).collect();
    let rows = match value {
        redis::Value::Nil => Vec::new(),
        redis::Value::Array(items) => {
            let mut rows = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match item {
                    // SCAN replies are [cursor, [key, key, ...]]
                    redis::Value::Array(inner) => {
                        for element in inner {
                            rows.push(make_row(JsonValue::Null, reply_to_json(element)));
                        }
                    }
                    _ => rows.push(make_row(
                        JsonValue::String(i.to_string()),
                        reply_to_json(item),
                    )),
                }
            }
            rows
        }
        redis::Value::Map(entries) => entries
            .iter()
            .map(|(k, v)| make_row(reply_to_json(k), reply_to_json(v)))
            .collect(),
        redis::Value::Set(members) => members
            .iter()
            .enumerate()
            .map(|(i, v)| make_row(JsonValue::String(i.to_string()), reply_to_json(v)))
            .collect(),
        scalar => vec![make_row(JsonValue::Null, reply_to_json(scalar))],
    };
    (columns, rows)
}

fn make_row(key: JsonValue, value: JsonValue) -> Map<String, JsonValue> {
    let mut row = Map::new();
    row.insert(REPLY_COLUMNS[0].to_string(), key);
    row.insert(REPLY_COLUMNS[1].to_string(), value);
    row
}

/// Convert one reply value to JSON.
fn reply_to_json(value: &redis::Value) -> JsonValue {
    match value {
        redis::Value::Nil => JsonValue::Null,
        redis::Value::Int(n) => JsonValue::from(*n),
        redis::Value::Double(d) => serde_json::Number::from_f64(*d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        redis::Value::Boolean(b) => JsonValue::Bool(*b),
        redis::Value::Okay => JsonValue::String("OK".to_string()),
        redis::Value::SimpleString(s) => JsonValue::String(s.clone()),
        redis::Value::BulkString(bytes) => {
            JsonValue::String(String::from_utf8_lossy(bytes).into_owned())
        }
        redis::Value::VerbatimString { text, .. } => JsonValue::String(text.clone()),
        redis::Value::BigNumber(n) => JsonValue::String(format!("{:?}", n)),
        redis::Value::Array(items) => {
            JsonValue::Array(items.iter().map(reply_to_json).collect())
        }
        redis::Value::Set(members) => {
            JsonValue::Array(members.iter().map(reply_to_json).collect())
        }
        redis::Value::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                let key = match reply_to_json(k) {
                    JsonValue::String(s) => s,
                    other => other.to_string(),
                };
                map.insert(key, reply_to_json(v));
            }
            JsonValue::Object(map)
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendKind;

    #[test]
    fn test_redis_url_variants() {
        let plain = ConnectionConfig::new(BackendKind::Redis, "localhost", 6379);
        assert_eq!(redis_url(&plain), "redis://localhost:6379/0");

        let with_db = plain.clone().with_database("3");
        assert_eq!(redis_url(&with_db), "redis://localhost:6379/3");

        let with_pass = plain.clone().with_password("pw");
        assert_eq!(redis_url(&with_pass), "redis://:pw@localhost:6379/0");

        let full = plain.with_credentials("user", "pw").with_tls(true);
        assert_eq!(redis_url(&full), "rediss://user:pw@localhost:6379/0");
    }

    #[test]
    fn test_reply_scalar_becomes_single_row() {
        let (columns, rows) = reply_to_rows(&redis::Value::Int(7));
        assert_eq!(columns, vec!["key", "value"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["value"], serde_json::json!(7));
        assert_eq!(rows[0]["key"], JsonValue::Null);
    }

    #[test]
    fn test_reply_nil_is_empty() {
        let (_, rows) = reply_to_rows(&redis::Value::Nil);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_reply_array_one_row_per_element() {
        let value = redis::Value::Array(vec![
            redis::Value::BulkString(b"a".to_vec()),
            redis::Value::BulkString(b"b".to_vec()),
        ]);
        let (_, rows) = reply_to_rows(&value);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["key"], serde_json::json!("0"));
        assert_eq!(rows[0]["value"], serde_json::json!("a"));
        assert_eq!(rows[1]["value"], serde_json::json!("b"));
    }

    #[test]
    fn test_reply_scan_shape_flattens_nested_array() {
        // SCAN returns [cursor, [keys...]]
        let value = redis::Value::Array(vec![
            redis::Value::BulkString(b"0".to_vec()),
            redis::Value::Array(vec![
                redis::Value::BulkString(b"user:1".to_vec()),
                redis::Value::BulkString(b"user:2".to_vec()),
            ]),
        ]);
        let (_, rows) = reply_to_rows(&value);
        // cursor row plus one row per key
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["value"], serde_json::json!("user:1"));
        assert_eq!(rows[2]["value"], serde_json::json!("user:2"));
    }

    #[test]
    fn test_reply_map_keeps_fields() {
        let value = redis::Value::Map(vec![(
            redis::Value::BulkString(b"name".to_vec()),
            redis::Value::BulkString(b"alice".to_vec()),
        )]);
        let (_, rows) = reply_to_rows(&value);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["key"], serde_json::json!("name"));
        assert_eq!(rows[0]["value"], serde_json::json!("alice"));
    }
}
