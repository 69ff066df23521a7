//! Pool registry: the public command surface.
//!
//! Maps deterministic pool identities to pools and orchestrates
//! acquire-execute-release around every operation. The registry is a plain
//! value owned by the embedding service and shared by `Arc` - there is no
//! process-wide global.
//!
//! Duplicate-create policy: `create_pool` is idempotent. An existing pool
//! for the same identity is returned untouched; the same
//! lookup-by-identity rule applies uniformly to queries, metadata calls
//! and `disconnect`.

use crate::config::PoolSettings;
use crate::db::factory::BackendFactory;
use crate::db::pool::{ConnectionPool, PoolStatus, PooledConnection};
use crate::db::redis::subscriber::{PubSubEvent, RedisSubscriber};
use crate::error::{ConduitError, ConduitResult};
use crate::models::{
    BackendKind, ConnectionConfig, DatabaseInfo, QueryParam, QueryResult, TableInfo, TableSchema,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

pub struct PoolRegistry {
    pools: RwLock<HashMap<String, Arc<ConnectionPool>>>,
    /// Snapshots of what each identity was built from; consulted by the
    /// recreate-once retry when a pool vanished out-of-band.
    configs: RwLock<HashMap<String, (ConnectionConfig, PoolSettings)>>,
    subscribers: Mutex<HashMap<String, RedisSubscriber>>,
    events_tx: mpsc::UnboundedSender<PubSubEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<PubSubEvent>>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            pools: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
        }
    }

    /// Take the pub/sub event stream. Single consumer; returns `None` once
    /// taken.
    pub fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<PubSubEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Find or create the pool for this config and return its identity.
    pub async fn create_pool(
        &self,
        config: ConnectionConfig,
        settings: Option<PoolSettings>,
    ) -> ConduitResult<String> {
        config.validate()?;
        let settings = settings.unwrap_or_default();
        settings.validate()?;
        let identity = config.pool_identity();

        {
            let pools = self.pools.read().await;
            if pools.contains_key(&identity) {
                debug!(pool_id = %identity, "pool already exists, reusing");
                return Ok(identity);
            }
        }

        info!(
            pool_id = %identity,
            endpoint = %config.masked_endpoint(),
            "creating connection pool"
        );
        let file_based = config.backend.is_file_based();
        let factory = Arc::new(BackendFactory::new(config.clone())?);
        let pool = ConnectionPool::new(identity.clone(), factory, &settings, file_based);
        if let Err(e) = pool.initialize().await {
            pool.destroy().await;
            return Err(e);
        }

        // Re-check after the async work: a concurrent create for the same
        // identity may have won. Keep the winner, tear ours down.
        let lost_race = {
            let mut pools = self.pools.write().await;
            if pools.contains_key(&identity) {
                true
            } else {
                pools.insert(identity.clone(), pool.clone());
                false
            }
        };
        if lost_race {
            pool.destroy().await;
            return Ok(identity);
        }

        self.configs
            .write()
            .await
            .insert(identity.clone(), (config, settings));
        Ok(identity)
    }

    async fn lookup(&self, identity: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.read().await.get(identity).cloned()
    }

    /// Centralized missing-pool policy: look the pool up, and on a miss
    /// recreate it once from the retained snapshot before giving up. This
    /// is the only place that retry lives.
    async fn pool_or_recreate(&self, identity: &str) -> ConduitResult<Arc<ConnectionPool>> {
        if let Some(pool) = self.lookup(identity).await {
            return Ok(pool);
        }
        let snapshot = self.configs.read().await.get(identity).cloned();
        let Some((config, settings)) = snapshot else {
            return Err(ConduitError::pool_not_found(identity));
        };
        warn!(pool_id = %identity, "pool missing, recreating from retained config");
        self.create_pool(config, Some(settings)).await?;
        self.lookup(identity)
            .await
            .ok_or_else(|| ConduitError::pool_not_found(identity))
    }

    /// Acquire a session, run `op`, release on every path.
    async fn with_connection<T, F>(&self, identity: &str, op: F) -> ConduitResult<T>
    where
        F: AsyncFnOnce(&mut PooledConnection) -> ConduitResult<T>,
    {
        let pool = self.pool_or_recreate(identity).await?;
        let mut conn = pool.acquire().await?;
        let result = op(&mut conn).await;
        pool.release(conn).await;
        result
    }

    /// Execute one statement on a pooled session.
    pub async fn execute_query(
        &self,
        identity: &str,
        statement: &str,
        params: &[QueryParam],
    ) -> ConduitResult<QueryResult> {
        self.with_connection(identity, async |conn| {
            conn.session_mut().execute_query(statement, params).await
        })
        .await
    }

    /// Execute statements sequentially on one session, so session-scoped
    /// state (a selected database, temp tables) survives across the batch.
    /// Best-effort: execution continues past statement failures, and the
    /// returned vector has one entry per statement.
    pub async fn execute_batch(
        &self,
        identity: &str,
        statements: &[String],
    ) -> ConduitResult<Vec<QueryResult>> {
        self.with_connection(identity, async |conn| {
            let mut results = Vec::with_capacity(statements.len());
            for statement in statements {
                let result = conn.session_mut().execute_query(statement, &[]).await?;
                results.push(result);
            }
            Ok(results)
        })
        .await
    }

    /// Execute statements atomically where the backend supports it.
    pub async fn execute_transaction(
        &self,
        identity: &str,
        statements: &[String],
    ) -> ConduitResult<bool> {
        self.with_connection(identity, async |conn| {
            conn.session_mut().execute_transaction(statements).await
        })
        .await
    }

    pub async fn get_database_info(&self, identity: &str) -> ConduitResult<DatabaseInfo> {
        self.with_connection(identity, async |conn| {
            conn.session_mut().get_database_info().await
        })
        .await
    }

    pub async fn get_table_structure(
        &self,
        identity: &str,
        table: &str,
    ) -> ConduitResult<TableSchema> {
        self.with_connection(identity, async |conn| {
            conn.session_mut().get_table_structure(table).await
        })
        .await
    }

    pub async fn list_tables(&self, identity: &str) -> ConduitResult<Vec<TableInfo>> {
        self.with_connection(identity, async |conn| conn.session_mut().list_tables().await)
            .await
    }

    pub async fn list_databases(&self, identity: &str) -> ConduitResult<Vec<String>> {
        self.with_connection(identity, async |conn| {
            conn.session_mut().list_databases().await
        })
        .await
    }

    /// Subscribe the pool's subscriber connection to channels or patterns.
    /// The subscriber is created lazily on first use.
    pub async fn subscribe(
        &self,
        identity: &str,
        entries: &[String],
        is_pattern: bool,
    ) -> ConduitResult<bool> {
        let (config, _) = self
            .configs
            .read()
            .await
            .get(identity)
            .cloned()
            .ok_or_else(|| ConduitError::pool_not_found(identity))?;
        if config.backend != BackendKind::Redis {
            return Err(ConduitError::not_implemented(
                config.backend.as_str(),
                "subscribe",
            ));
        }

        let mut subscribers = self.subscribers.lock().await;
        if !subscribers.contains_key(identity) {
            let subscriber = RedisSubscriber::connect(
                &config,
                identity.to_string(),
                self.events_tx.clone(),
            )
            .await?;
            subscribers.insert(identity.to_string(), subscriber);
            debug!(pool_id = %identity, "subscriber connection created");
        }
        let subscriber = subscribers
            .get_mut(identity)
            .expect("subscriber inserted above");
        subscriber.subscribe(entries, is_pattern).await?;
        Ok(true)
    }

    /// Unsubscribe channels or patterns. Tears the subscriber connection
    /// down when nothing remains subscribed. Returns false when no
    /// subscriber exists for the identity.
    pub async fn unsubscribe(
        &self,
        identity: &str,
        entries: &[String],
        is_pattern: bool,
    ) -> ConduitResult<bool> {
        let mut subscribers = self.subscribers.lock().await;
        let Some(subscriber) = subscribers.get_mut(identity) else {
            return Ok(false);
        };
        subscriber.unsubscribe(entries, is_pattern).await?;
        if subscriber.is_idle() {
            if let Some(subscriber) = subscribers.remove(identity) {
                subscriber.shutdown();
            }
            debug!(pool_id = %identity, "last subscription removed, subscriber torn down");
        }
        Ok(true)
    }

    /// Destroy the pool and forget the identity. Unknown identities are a
    /// no-op so cleanup call sites stay simple.
    pub async fn disconnect(&self, identity: &str) {
        if let Some(subscriber) = self.subscribers.lock().await.remove(identity) {
            subscriber.shutdown();
        }
        self.configs.write().await.remove(identity);
        let pool = self.pools.write().await.remove(identity);
        match pool {
            Some(pool) => {
                pool.destroy().await;
                info!(pool_id = %identity, "disconnected");
            }
            None => debug!(pool_id = %identity, "disconnect on unknown pool, ignoring"),
        }
    }

    /// Destroy everything. Used on shutdown.
    pub async fn destroy_all(&self) {
        for (_, subscriber) in self.subscribers.lock().await.drain() {
            subscriber.shutdown();
        }
        self.configs.write().await.clear();
        let pools: Vec<(String, Arc<ConnectionPool>)> =
            self.pools.write().await.drain().collect();
        for (identity, pool) in pools {
            pool.destroy().await;
            debug!(pool_id = %identity, "destroyed");
        }
        info!("all pools destroyed");
    }

    pub async fn pool_status(&self, identity: &str) -> ConduitResult<PoolStatus> {
        let pool = self
            .lookup(identity)
            .await
            .ok_or_else(|| ConduitError::pool_not_found(identity))?;
        Ok(pool.status().await)
    }

    pub async fn pool_settings(&self, identity: &str) -> ConduitResult<PoolSettings> {
        self.configs
            .read()
            .await
            .get(identity)
            .map(|(_, settings)| settings.clone())
            .ok_or_else(|| ConduitError::pool_not_found(identity))
    }

    pub async fn list_pools(&self) -> Vec<String> {
        self.pools.read().await.keys().cloned().collect()
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_starts_empty() {
        let registry = PoolRegistry::new();
        assert_eq!(registry.pool_count().await, 0);
        assert!(registry.list_pools().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_identity_fails() {
        let registry = PoolRegistry::new();
        let err = registry
            .execute_query("mysql:nowhere:3306:db", "SELECT 1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::PoolNotFound { .. }));

        let err = registry.pool_status("mysql:nowhere:3306:db").await.unwrap_err();
        assert!(matches!(err, ConduitError::PoolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_unknown_identity_is_noop() {
        let registry = PoolRegistry::new();
        registry.disconnect("redis:nowhere:6379:").await;
        assert_eq!(registry.pool_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_without_subscriber_returns_false() {
        let registry = PoolRegistry::new();
        let handled = registry
            .unsubscribe("redis:nowhere:6379:", &["events".to_string()], false)
            .await
            .unwrap();
        assert!(!handled);
    }

    #[tokio::test]
    async fn test_event_stream_taken_once() {
        let registry = PoolRegistry::new();
        assert!(registry.take_event_stream().is_some());
        assert!(registry.take_event_stream().is_none());
    }

    #[tokio::test]
    async fn test_create_pool_rejects_invalid_config() {
        let registry = PoolRegistry::new();
        let config = ConnectionConfig::new(BackendKind::Redis, "localhost", 99999);
        let err = registry.create_pool(config, None).await.unwrap_err();
        assert!(matches!(err, ConduitError::ConfigValidation { .. }));
        assert_eq!(registry.pool_count().await, 0);
    }
}
