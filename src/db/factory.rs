//! Session construction.
//!
//! The match on `BackendKind` is exhaustive on purpose: wiring up a new
//! backend fails to compile until the factory handles it.

use crate::db::connection::{Connection, ConnectionFactory};
use crate::db::mongo::MongoSession;
use crate::db::mysql::MySqlSession;
use crate::db::postgres::PostgresSession;
use crate::db::redis::RedisSession;
use crate::db::sqlite::SqliteSession;
use crate::error::ConduitResult;
use crate::models::{BackendKind, ConnectionConfig};
use async_trait::async_trait;
use tracing::debug;

/// Production factory: builds the variant for the configured backend and
/// connects it.
pub struct BackendFactory {
    config: ConnectionConfig,
}

impl BackendFactory {
    /// Validates the config once up front; every session the factory
    /// creates afterwards reuses it unchanged.
    pub fn new(config: ConnectionConfig) -> ConduitResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for BackendFactory {
    async fn create(&self) -> ConduitResult<Box<dyn Connection>> {
        let mut session: Box<dyn Connection> = match self.config.backend {
            BackendKind::MySql => Box::new(MySqlSession::new(self.config.clone())),
            BackendKind::Postgres => Box::new(PostgresSession::new(self.config.clone())),
            BackendKind::Sqlite => Box::new(SqliteSession::new(self.config.clone())),
            BackendKind::Redis => Box::new(RedisSession::new(self.config.clone())),
            BackendKind::Mongo => Box::new(MongoSession::new(self.config.clone())),
        };
        session.connect().await?;
        debug!(
            backend = %self.config.backend,
            endpoint = %self.config.masked_endpoint(),
            "session created"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_invalid_config() {
        let config = ConnectionConfig::new(BackendKind::Redis, "localhost", 99999);
        assert!(BackendFactory::new(config).is_err());
    }

    #[tokio::test]
    async fn test_factory_stub_backend_fails_deterministically() {
        let config = ConnectionConfig::new(BackendKind::Mongo, "localhost", 27017);
        let factory = BackendFactory::new(config).unwrap();
        let err = factory.create().await.err().unwrap();
        assert!(err.to_string().contains("does not implement"));
    }
}
