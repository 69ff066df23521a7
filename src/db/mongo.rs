//! MongoDB stub variant.
//!
//! No mature driver is wired up yet; the variant exists so that a MongoDB
//! profile constructs, validates, and fails every operation with a
//! deterministic `NotImplemented` instead of a string-typed fallthrough.

use crate::db::connection::Connection;
use crate::error::{ConduitError, ConduitResult};
use crate::models::{
    BackendKind, ConnectionConfig, DatabaseInfo, QueryParam, QueryResult, TableInfo, TableSchema,
};
use async_trait::async_trait;

pub struct MongoSession {
    #[allow(dead_code)]
    config: ConnectionConfig,
}

impl MongoSession {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn unsupported(operation: &str) -> ConduitError {
        ConduitError::not_implemented("mongodb", operation)
    }
}

#[async_trait]
impl Connection for MongoSession {
    fn backend(&self) -> BackendKind {
        BackendKind::Mongo
    }

    async fn connect(&mut self) -> ConduitResult<()> {
        Err(Self::unsupported("connect"))
    }

    async fn disconnect(&mut self) -> ConduitResult<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn ping(&mut self) -> ConduitResult<()> {
        Err(Self::unsupported("ping"))
    }

    async fn execute_query(
        &mut self,
        _statement: &str,
        _params: &[QueryParam],
    ) -> ConduitResult<QueryResult> {
        Err(Self::unsupported("executeQuery"))
    }

    async fn execute_transaction(&mut self, _statements: &[String]) -> ConduitResult<bool> {
        Err(Self::unsupported("executeTransaction"))
    }

    async fn get_database_info(&mut self) -> ConduitResult<DatabaseInfo> {
        Err(Self::unsupported("getDatabaseInfo"))
    }

    async fn get_table_structure(&mut self, _table: &str) -> ConduitResult<TableSchema> {
        Err(Self::unsupported("getTableStructure"))
    }

    async fn list_tables(&mut self) -> ConduitResult<Vec<TableInfo>> {
        Err(Self::unsupported("listTables"))
    }

    async fn list_databases(&mut self) -> ConduitResult<Vec<String>> {
        Err(Self::unsupported("listDatabases"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_operation_fails_not_implemented() {
        let config = ConnectionConfig::new(BackendKind::Mongo, "localhost", 27017);
        let mut session = MongoSession::new(config);

        assert!(matches!(
            session.connect().await,
            Err(ConduitError::NotImplemented { .. })
        ));
        assert!(matches!(
            session.execute_query("find", &[]).await,
            Err(ConduitError::NotImplemented { .. })
        ));
        assert!(matches!(
            session.list_tables().await,
            Err(ConduitError::NotImplemented { .. })
        ));
        // disconnect stays idempotent even on a stub
        assert!(session.disconnect().await.is_ok());
        assert!(!session.is_connected());
    }
}
