//! SQLite session variant.
//!
//! File-based: `database` in the config is the file path. Listing
//! databases is a capability gap (each file is a database).

use crate::db::connection::Connection;
use crate::db::statement::{elapsed_ms, is_row_returning, not_connected};
use crate::db::value::{column_names, sqlite_row_to_json};
use crate::error::{ConduitError, ConduitResult, is_connection_fault};
use crate::models::{
    BackendKind, ColumnDefinition, ConnectionConfig, DatabaseInfo, QueryParam, QueryResult,
    TableInfo, TableSchema, TableType,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Executor, Row};
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

pub struct SqliteSession {
    config: ConnectionConfig,
    conn: Option<sqlx::SqliteConnection>,
}

impl SqliteSession {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, conn: None }
    }

    fn file_path(&self) -> &str {
        self.config.database.as_deref().unwrap_or_default()
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
            if fetch {
                (&mut *conn)
                    .fetch_all(statement)
                    .await
                    .map(|rows| rows_to_result(&rows, started))
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
                debug!(error = %e, "SQLite statement failed");
                Ok(QueryResult::failure(e.to_string(), elapsed_ms(started)))
            }
        }
    }
}

fn rows_to_result(rows: &[SqliteRow], started: Instant) -> QueryResult {
    let columns = rows.first().map(column_names).unwrap_or_default();
    let json_rows = rows.iter().map(sqlite_row_to_json).collect();
    QueryResult::with_rows(columns, json_rows, elapsed_ms(started))
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
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
impl Connection for SqliteSession {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn connect(&mut self) -> ConduitResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let opts = SqliteConnectOptions::from_str(self.file_path())
            .map_err(|e| {
                ConduitError::config(format!("invalid SQLite path '{}': {}", self.file_path(), e))
            })?
            .create_if_missing(true);
        let conn = opts.connect().await.map_err(|e| {
            ConduitError::connection_detailed(
                format!("failed to open {}: {}", self.file_path(), e),
                None,
                self.file_path(),
                0,
                "check that the file path exists and is writable",
            )
        })?;
        debug!(path = %self.file_path(), "SQLite session opened");
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) -> ConduitResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = sqlx::Connection::close(conn).await {
                warn!(error = %e, "SQLite close reported an error");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
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
                warn!(error = %e, "SQLite transaction statement failed, rolling back");
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                return Ok(false);
            }
        }
        match tx.commit().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "SQLite commit failed");
                Ok(false)
            }
        }
    }

    async fn get_database_info(&mut self) -> ConduitResult<DatabaseInfo> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        let version: Option<String> = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_optional(&mut *conn)
            .await
            .map_err(ConduitError::from)?;
        let size_bytes = std::fs::metadata(self.file_path()).ok().map(|m| m.len());
        Ok(DatabaseInfo {
            backend: BackendKind::Sqlite,
            server_version: version,
            database: self.config.database.clone(),
            size_bytes,
        })
    }

    async fn get_table_structure(&mut self, table: &str) -> ConduitResult<TableSchema> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        // PRAGMA does not take bind parameters
        let pragma = format!("PRAGMA table_info('{}')", table.replace('\'', "''"));
        let rows = sqlx::query(&pragma)
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
                let name: String = row.get("name");
                let data_type: String = row.get("type");
                let notnull: i32 = row.get("notnull");
                let pk: i32 = row.get("pk");
                let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
                let mut col = ColumnDefinition::new(name, data_type, notnull == 0)
                    .with_primary_key(pk > 0);
                if let Some(default) = default_value {
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
            SELECT name, type FROM sqlite_master
            WHERE type IN ('table', 'view')
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(ConduitError::from)?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let type_str: String = row.get("type");
                TableInfo::new(name, TableType::parse(&type_str))
            })
            .collect())
    }

    async fn list_databases(&mut self) -> ConduitResult<Vec<String>> {
        // Each SQLite file is a database; there is no server to enumerate.
        Err(ConduitError::not_implemented("sqlite", "listDatabases"))
    }
}
