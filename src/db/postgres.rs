//! PostgreSQL session variant.
//!
//! Same routing rule as the MySQL variant: parameterless statements run on
//! the plain-text path, parameterized statements are prepared and bound.

use crate::db::connection::Connection;
use crate::db::statement::{
    connect_error, connect_timeout_error, elapsed_ms, is_row_returning, not_connected,
};
use crate::db::value::{column_names, postgres_row_to_json};
use crate::error::{ConduitError, ConduitResult, is_connection_fault};
use crate::models::{
    BackendKind, ColumnDefinition, ConnectionConfig, DatabaseInfo, QueryParam, QueryResult,
    TableInfo, TableSchema, TableType,
};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow, PgSslMode};
use sqlx::{ConnectOptions, Executor, Row};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct PostgresSession {
    config: ConnectionConfig,
    conn: Option<sqlx::PgConnection>,
}

impl PostgresSession {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, conn: None }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port as u16)
            .ssl_mode(if self.config.use_tls {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
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
                debug!(error = %e, "PostgreSQL statement failed");
                Ok(QueryResult::failure(e.to_string(), elapsed_ms(started)))
            }
        }
    }
}

fn rows_to_result(rows: &[PgRow], started: Instant) -> QueryResult {
    let columns = rows.first().map(column_names).unwrap_or_default();
    let json_rows = rows.iter().map(postgres_row_to_json).collect();
    QueryResult::with_rows(columns, json_rows, elapsed_ms(started))
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
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
impl Connection for PostgresSession {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
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
        debug!(endpoint = %self.config.masked_endpoint(), "PostgreSQL session connected");
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) -> ConduitResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = sqlx::Connection::close(conn).await {
                warn!(error = %e, "PostgreSQL close reported an error");
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
                warn!(error = %e, "PostgreSQL transaction statement failed, rolling back");
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "rollback failed");
                }
                return Ok(false);
            }
        }
        match tx.commit().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "PostgreSQL commit failed");
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
        let database: Option<String> = sqlx::query_scalar("SELECT current_database()")
            .fetch_optional(&mut *conn)
            .await
            .unwrap_or(None);
        let size_bytes: Option<i64> =
            sqlx::query_scalar("SELECT pg_database_size(current_database())")
                .fetch_optional(&mut *conn)
                .await
                .unwrap_or(None);
        Ok(DatabaseInfo {
            backend: BackendKind::Postgres,
            server_version: version,
            database,
            size_bytes: size_bytes.map(|s| s as u64),
        })
    }

    async fn get_table_structure(&mut self, table: &str) -> ConduitResult<TableSchema> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        let rows = sqlx::query(
            r#"
            SELECT
                c.column_name,
                c.data_type,
                c.is_nullable,
                c.column_default,
                EXISTS (
                    SELECT 1
                    FROM information_schema.table_constraints tc
                    JOIN information_schema.key_column_usage kcu
                        ON tc.constraint_name = kcu.constraint_name
                        AND tc.table_schema = kcu.table_schema
                    WHERE tc.constraint_type = 'PRIMARY KEY'
                    AND tc.table_name = c.table_name
                    AND tc.table_schema = c.table_schema
                    AND kcu.column_name = c.column_name
                ) AS is_primary_key
            FROM information_schema.columns c
            WHERE c.table_name = $1 AND c.table_schema = 'public'
            ORDER BY c.ordinal_position
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
                let name: String = row.get("column_name");
                let data_type: String = row.get("data_type");
                let nullable: String = row.get("is_nullable");
                let is_pk: bool = row.get("is_primary_key");
                let default_value: Option<String> =
                    row.try_get("column_default").ok().flatten();
                let mut col = ColumnDefinition::new(name, data_type, nullable == "YES")
                    .with_primary_key(is_pk);
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
            SELECT table_name, table_type
            FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY table_name
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(ConduitError::from)?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("table_name");
                let type_str: String = row.get("table_type");
                TableInfo::new(name, TableType::parse(&type_str)).with_schema("public")
            })
            .collect())
    }

    async fn list_databases(&mut self) -> ConduitResult<Vec<String>> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(&self.config))?;
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(ConduitError::from)?;
        Ok(names)
    }
}
