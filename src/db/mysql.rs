//! MySQL session variant.
//!
//! Statements without parameters run through the plain-text protocol path:
//! session-context-mutating statements (`USE`, `SET`, DDL) do not reliably
//! propagate session state through prepared execution, and some statements
//! cannot be prepared at all. Parameterized statements use the prepared
//! path with binds.

use crate::db::connection::Connection;
use crate::db::statement::{
    connect_error, connect_timeout_error, elapsed_ms, is_row_returning, not_connected,
};
use crate::db::value::{column_names, mysql_row_to_json};
use crate::error::{ConduitError, ConduitResult, is_connection_fault};
use crate::models::{
    BackendKind, ColumnDefinition, ConnectionConfig, DatabaseInfo, QueryParam, QueryResult,
    TableInfo, TableSchema, TableType,
};
use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlRow, MySqlSslMode};
use sqlx::{ConnectOptions, Executor, Row};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct MySqlSession {
    config: ConnectionConfig,
    conn: Option<sqlx::MySqlConnection>,
}

impl MySqlSession {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, conn: None }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let mut opts = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port as u16)
            .charset("utf8mb4")
            .ssl_mode(if self.config.use_tls {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Preferred
            });
        if let Some(user) = &self.config.username {
            opts = opts.username(user);
        }
        if let Some(pass) = &self.config.password {
            opts = opts.password(pass);
        }
        if let Some(db) = &self.config.database {
            opts = opts.database(db);
        }
        opts
    }

    async fn run_statement(
        &mut self,
        statement: &str,
        params: &[QueryParam],
    ) -> ConduitResult<QueryResult> {
        let started = Instant::now();
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        let fetch = is_row_returning(statement);

        let outcome: Result<QueryResult, sqlx::Error> = if params.is_empty() {
            // Plain-text path
            if fetch {
                (&mut *conn).fetch_all(statement).await.map(|rows| {
                    rows_to_result(&rows, started)
                })
            } else {
                (&mut *conn).execute(statement).await.map(|done| {
                    QueryResult::with_affected(done.rows_affected(), elapsed_ms(started))
                })
            }
        } else {
            let mut query = sqlx::query(statement);
            for param in params {
                query = bind_param(query, param);
            }
            if fetch {
                query
                    .fetch_all(&mut *conn)
                    .await
                    .map(|rows| rows_to_result(&rows, started))
            } else {
                query.execute(&mut *conn).await.map(|done| {
                    QueryResult::with_affected(done.rows_affected(), elapsed_ms(started))
                })
            }
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e) if is_connection_fault(&e) => Err(ConduitError::from(e)),
            Err(e) => {
                debug!(error = %e, "MySQL statement failed");
                Ok(QueryResult::failure(e.to_string(), elapsed_ms(started)))
            }
        }
    }
}

fn rows_to_result(rows: &[MySqlRow], started: Instant) -> QueryResult {
    let columns = rows.first().map(column_names).unwrap_or_default();
    let json_rows = rows.iter().map(mysql_row_to_json).collect();
    QueryResult::with_rows(columns, json_rows, elapsed_ms(started))
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

#[async_trait]
impl Connection for MySqlSession {
    fn backend(&self) -> BackendKind {
        BackendKind::MySql
    }

    async fn connect(&mut self) -> ConduitResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let conn = tokio::time::timeout(timeout, self.connect_options().connect())
            .await
            .map_err(|_| connect_timeout_error(&self.config))?
            .map_err(|e| connect_error(&self.config, e))?;
        debug!(endpoint = %self.config.masked_endpoint(), "MySQL session connected");
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) -> ConduitResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = sqlx::Connection::close(conn).await {
                warn!(error = %e, "MySQL close reported an error");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn ping(&mut self) -> ConduitResult<()> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        sqlx::Connection::ping(conn)
            .await
            .map_err(|e| ConduitError::connection(format!("ping failed: {}", e)))
    }

    async fn execute_query(
        &mut self,
        statement: &str,
        params: &[QueryParam],
    ) -> ConduitResult<QueryResult> {
        self.run_statement(statement, params).await
    }

    async fn execute_transaction(&mut self, statements: &[String]) -> ConduitResult<bool> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        let mut tx = sqlx::Connection::begin(conn).await.map_err(ConduitError::from)?;
        for statement in statements {
            if let Err(e) = (&mut *tx).execute(statement.as_str()).await {
                warn!(error = %e, "MySQL transaction statement failed, rolling back");
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                return Ok(false);
            }
        }
        match tx.commit().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "MySQL commit failed");
                Ok(false)
            }
        }
    }

    async fn get_database_info(&mut self) -> ConduitResult<DatabaseInfo> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        let version: Option<String> = sqlx::query_scalar("SELECT version()")
            .fetch_optional(&mut *conn)
            .await
            .map_err(ConduitError::from)?;
        let database: Option<String> = sqlx::query_scalar("SELECT DATABASE()")
            .fetch_one(&mut *conn)
            .await
            .unwrap_or(None);
        Ok(DatabaseInfo {
            backend: BackendKind::MySql,
            server_version: version,
            database,
            size_bytes: None,
        })
    }

    async fn get_table_structure(&mut self, table: &str) -> ConduitResult<TableSchema> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        let rows = sqlx::query(
            r#"
            SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_KEY, COLUMN_DEFAULT
            FROM information_schema.COLUMNS
            WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE()
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(ConduitError::from)?;

        if rows.is_empty() {
            return Err(ConduitError::schema(
                format!("table '{}' not found", table),
                table,
            ));
        }

        let columns = rows
            .iter()
            .map(|row| {
                let name = get_text(row, "COLUMN_NAME");
                let data_type = get_text(row, "COLUMN_TYPE");
                let nullable = get_text(row, "IS_NULLABLE") == "YES";
                let is_pk = get_text(row, "COLUMN_KEY") == "PRI";
                let mut col =
                    ColumnDefinition::new(name, data_type, nullable).with_primary_key(is_pk);
                if let Some(default) = get_optional_text(row, "COLUMN_DEFAULT") {
                    col = col.with_default(default);
                }
                col
            })
            .collect();

        Ok(TableSchema::from_columns(table, columns))
    }

    async fn list_tables(&mut self) -> ConduitResult<Vec<TableInfo>> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        let rows = sqlx::query(
            r#"
            SELECT TABLE_NAME, TABLE_TYPE
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
            ORDER BY TABLE_NAME
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(ConduitError::from)?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = get_text(row, "TABLE_NAME");
                if name.is_empty() {
                    return None;
                }
                let table_type = TableType::parse(&get_text(row, "TABLE_TYPE"));
                Some(TableInfo::new(name, table_type))
            })
            .collect())
    }

    async fn list_databases(&mut self) -> ConduitResult<Vec<String>> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        let rows = sqlx::query("SHOW DATABASES")
            .fetch_all(&mut *conn)
            .await
            .map_err(ConduitError::from)?;
        Ok(rows
            .iter()
            .filter_map(|row| get_text_by_index(row, 0))
            .collect())
    }
}

// MySQL may hand back VARBINARY instead of VARCHAR depending on charset
// configuration, so every text read falls back to raw bytes.

fn get_text(row: &MySqlRow, column: &str) -> String {
    row.try_get::<String, _>(column)
        .ok()
        .or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .unwrap_or_default()
}

fn get_optional_text(row: &MySqlRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(column)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

fn get_text_by_index(row: &MySqlRow, index: usize) -> Option<String> {
    row.try_get::<String, _>(index).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(index)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}
