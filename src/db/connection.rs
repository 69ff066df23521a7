//! The capability contract every backend session implements.
//!
//! A session is exclusively owned: the pool holds it while idle and lends
//! it to exactly one caller while checked out, so methods take `&mut self`
//! and no interior locking is needed.

use crate::error::{ConduitError, ConduitResult};
use crate::models::{
    BackendKind, DatabaseInfo, QueryParam, QueryResult, TableInfo, TableSchema,
};
use async_trait::async_trait;

/// One live backend session.
///
/// Contract notes:
/// - `execute_query` captures statement-level failures into
///   [`QueryResult::error`] and only returns `Err` for connection-level
///   failures (not connected, socket dead).
/// - `disconnect` is idempotent.
/// - `execute_transaction` returns `Ok(false)` after a rollback; backends
///   without native transactions run best-effort and must say so in their
///   docs rather than pretending atomicity.
/// - Metadata operations a backend cannot support fail with
///   [`ConduitError::NotImplemented`], never with an empty success.
#[async_trait]
pub trait Connection: Send {
    fn backend(&self) -> BackendKind;

    async fn connect(&mut self) -> ConduitResult<()>;

    async fn disconnect(&mut self) -> ConduitResult<()>;

    /// Cheap, non-blocking status check.
    fn is_connected(&self) -> bool;

    /// Liveness probe. The default runs a trivial round-trip query;
    /// backends with a native ping override this.
    async fn ping(&mut self) -> ConduitResult<()> {
        let result = self.execute_query("SELECT 1", &[]).await?;
        if result.success {
            Ok(())
        } else {
            Err(ConduitError::connection(format!(
                "ping failed: {}",
                result.error.unwrap_or_else(|| "unknown error".to_string())
            )))
        }
    }

    async fn execute_query(
        &mut self,
        statement: &str,
        params: &[QueryParam],
    ) -> ConduitResult<QueryResult>;

    /// Execute statements inside a native transaction where the backend has
    /// one. Returns `Ok(true)` on commit, `Ok(false)` after rollback.
    async fn execute_transaction(&mut self, statements: &[String]) -> ConduitResult<bool>;

    async fn get_database_info(&mut self) -> ConduitResult<DatabaseInfo>;

    async fn get_table_structure(&mut self, table: &str) -> ConduitResult<TableSchema>;

    async fn list_tables(&mut self) -> ConduitResult<Vec<TableInfo>>;

    async fn list_databases(&mut self) -> ConduitResult<Vec<String>>;
}

/// Creates connected sessions for a pool.
///
/// The pool never knows which backend it is pooling; it only asks the
/// factory for another live session. Tests supply mock factories.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new session and connect it.
    async fn create(&self) -> ConduitResult<Box<dyn Connection>>;
}
