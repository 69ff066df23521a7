//! Pool behavior tests against a mock backend.
//!
//! The pool is generic over `ConnectionFactory`, so these tests inject an
//! in-memory session and exercise capacity limits, waiter fairness,
//! acquire timeouts, teardown and test-on-borrow without any server.

use async_trait::async_trait;
use db_conduit::config::PoolSettings;
use db_conduit::db::{Connection, ConnectionFactory, ConnectionPool};
use db_conduit::error::{ConduitError, ConduitResult};
use db_conduit::models::{
    BackendKind, DatabaseInfo, QueryParam, QueryResult, TableInfo, TableSchema,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct MockSession {
    serial: usize,
    connected: bool,
    healthy: Arc<AtomicBool>,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for MockSession {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn connect(&mut self) -> ConduitResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> ConduitResult<()> {
        if self.connected {
            self.connected = false;
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn ping(&mut self) -> ConduitResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConduitError::connection("mock session went away"))
        }
    }

    async fn execute_query(
        &mut self,
        _statement: &str,
        _params: &[QueryParam],
    ) -> ConduitResult<QueryResult> {
        // The serial number makes individual sessions observable.
        Ok(QueryResult::with_affected(self.serial as u64, 0))
    }

    async fn execute_transaction(&mut self, _statements: &[String]) -> ConduitResult<bool> {
        Ok(true)
    }

    async fn get_database_info(&mut self) -> ConduitResult<DatabaseInfo> {
        Err(ConduitError::not_implemented("mock", "getDatabaseInfo"))
    }

    async fn get_table_structure(&mut self, _table: &str) -> ConduitResult<TableSchema> {
        Err(ConduitError::not_implemented("mock", "getTableStructure"))
    }

    async fn list_tables(&mut self) -> ConduitResult<Vec<TableInfo>> {
        Err(ConduitError::not_implemented("mock", "listTables"))
    }

    async fn list_databases(&mut self) -> ConduitResult<Vec<String>> {
        Err(ConduitError::not_implemented("mock", "listDatabases"))
    }
}

#[derive(Default)]
struct MockFactory {
    created: AtomicUsize,
    fail_creation: AtomicBool,
    healthy: Arc<AtomicBool>,
    disconnects: Arc<AtomicUsize>,
}

impl MockFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            healthy: Arc::new(AtomicBool::new(true)),
            ..Default::default()
        })
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create(&self) -> ConduitResult<Box<dyn Connection>> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(ConduitError::connection("mock creation failure"));
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MockSession {
            serial,
            connected: true,
            healthy: self.healthy.clone(),
            disconnects: self.disconnects.clone(),
        }))
    }
}

fn settings(max: u32, min: u32, acquire_secs: u64, test_on_borrow: bool) -> PoolSettings {
    PoolSettings {
        max_connections: Some(max),
        min_connections: Some(min),
        acquire_timeout_secs: Some(acquire_secs),
        // pruning is not under test here
        idle_timeout_secs: Some(0),
        test_on_borrow: Some(test_on_borrow),
    }
}

fn make_pool(factory: Arc<MockFactory>, s: &PoolSettings) -> Arc<ConnectionPool> {
    ConnectionPool::new("mock:localhost:1:", factory, s, false)
}

#[tokio::test]
async fn test_two_acquires_succeed_third_blocks_until_release() {
    let factory = MockFactory::new();
    let pool = make_pool(factory.clone(), &settings(2, 0, 5, false));

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    assert_eq!(factory.created(), 2);

    let blocked = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished(), "third acquire must suspend");
    let status = pool.status().await;
    assert_eq!(status.total, 2);
    assert_eq!(status.waiting, 1);

    pool.release(a).await;
    let handed = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("waiter must be unblocked by the release")
        .unwrap()
        .unwrap();

    // Handed to the waiter directly, never parked on the idle list
    assert_eq!(pool.status().await.idle, 0);
    assert_eq!(factory.created(), 2, "no extra session was created");

    pool.release(handed).await;
    pool.release(b).await;
    pool.destroy().await;
}

#[tokio::test]
async fn test_capacity_never_exceeded_under_contention() {
    let factory = MockFactory::new();
    let pool = make_pool(factory.clone(), &settings(3, 0, 10, false));

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let conn = pool.acquire().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            pool.release(conn).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(factory.created() <= 3, "created {} > max 3", factory.created());
    let status = pool.status().await;
    assert!(status.total <= 3);
    assert_eq!(status.waiting, 0);
    pool.destroy().await;
}

#[tokio::test]
async fn test_release_serves_oldest_waiter_first() {
    let factory = MockFactory::new();
    let pool = make_pool(factory.clone(), &settings(1, 0, 10, false));
    let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let held = pool.acquire().await.unwrap();

    let first = tokio::spawn({
        let (pool, order) = (pool.clone(), order.clone());
        async move {
            let conn = pool.acquire().await.unwrap();
            order.lock().await.push(1);
            pool.release(conn).await;
        }
    });
    // Deterministic queue order: the second waiter enqueues strictly later
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = tokio::spawn({
        let (pool, order) = (pool.clone(), order.clone());
        async move {
            let conn = pool.acquire().await.unwrap();
            order.lock().await.push(2);
            pool.release(conn).await;
        }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(pool.status().await.waiting, 2);

    pool.release(held).await;
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(*order.lock().await, vec![1, 2]);
    pool.destroy().await;
}

#[tokio::test]
async fn test_acquire_times_out_with_pool_exhausted() {
    let factory = MockFactory::new();
    let pool = make_pool(factory.clone(), &settings(1, 0, 1, false));

    let held = pool.acquire().await.unwrap();
    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, ConduitError::PoolExhausted { .. }));
    assert!(waited >= Duration::from_millis(900), "failed too early: {:?}", waited);
    assert!(waited < Duration::from_secs(3), "failed too late: {:?}", waited);

    // The timed-out waiter deregistered itself
    assert_eq!(pool.status().await.waiting, 0);

    // A later release must not vanish into a stale waiter
    pool.release(held).await;
    assert_eq!(pool.status().await.idle, 1);
    pool.destroy().await;
}

#[tokio::test]
async fn test_destroy_rejects_pending_waiters() {
    let factory = MockFactory::new();
    let pool = make_pool(factory.clone(), &settings(1, 0, 30, false));

    let held = pool.acquire().await.unwrap();
    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(pool.status().await.waiting, 1);

    pool.destroy().await;

    let err = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter must be rejected, not left hanging")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ConduitError::PoolDestroyed { .. }));

    // acquire after destroy always fails
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, ConduitError::PoolDestroyed { .. }));

    // releasing the checked-out session disconnects it
    pool.release(held).await;
    assert_eq!(factory.disconnects(), 1);
}

#[tokio::test]
async fn test_test_on_borrow_replaces_broken_session() {
    let factory = MockFactory::new();
    let pool = make_pool(factory.clone(), &settings(1, 1, 5, true));
    pool.initialize().await.unwrap();
    assert_eq!(factory.created(), 1);

    // The idle session dies while parked
    factory.healthy.store(false, Ordering::SeqCst);

    let mut conn = pool.acquire().await.unwrap();
    // Broken session was discarded and a replacement created
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.disconnects(), 1);
    let result = conn
        .session_mut()
        .execute_query("SELECT 1", &[])
        .await
        .unwrap();
    assert_eq!(result.rows_affected, Some(2));

    pool.release(conn).await;
    pool.destroy().await;
}

#[tokio::test]
async fn test_initialize_creates_min_sessions() {
    let factory = MockFactory::new();
    let pool = make_pool(factory.clone(), &settings(4, 2, 5, false));
    pool.initialize().await.unwrap();

    assert_eq!(factory.created(), 2);
    let status = pool.status().await;
    assert_eq!(status.total, 2);
    assert_eq!(status.idle, 2);
    assert_eq!(status.active, 0);
    pool.destroy().await;
}

#[tokio::test]
async fn test_initialize_surfaces_creation_failure() {
    let factory = MockFactory::new();
    factory.fail_creation.store(true, Ordering::SeqCst);
    let pool = make_pool(factory.clone(), &settings(4, 2, 5, false));

    let err = pool.initialize().await.unwrap_err();
    assert!(matches!(err, ConduitError::Connection { .. }));
    assert_eq!(pool.status().await.total, 0);
    pool.destroy().await;
}

#[tokio::test]
async fn test_idle_reuse_is_lifo() {
    let factory = MockFactory::new();
    let pool = make_pool(factory.clone(), &settings(2, 0, 5, false));

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    pool.release(first).await;
    pool.release(second).await;

    // Most recently released session comes back first
    let mut conn = pool.acquire().await.unwrap();
    let result = conn
        .session_mut()
        .execute_query("SELECT 1", &[])
        .await
        .unwrap();
    assert_eq!(result.rows_affected, Some(2));
    pool.release(conn).await;
    pool.destroy().await;
}

#[tokio::test]
async fn test_release_of_untracked_session_is_noop() {
    let factory = MockFactory::new();
    let pool_a = make_pool(factory.clone(), &settings(2, 0, 5, false));
    let pool_b = make_pool(factory.clone(), &settings(2, 0, 5, false));

    let conn = pool_a.acquire().await.unwrap();
    pool_b.release(conn).await;

    // The foreign session never entered pool B
    let status = pool_b.status().await;
    assert_eq!(status.total, 0);
    assert_eq!(status.idle, 0);
    // Pool A still accounts for it as checked out
    assert_eq!(pool_a.status().await.total, 1);

    pool_a.destroy().await;
    pool_b.destroy().await;
}

#[tokio::test]
async fn test_idle_sessions_are_pruned_after_timeout() {
    let factory = MockFactory::new();
    let s = PoolSettings {
        max_connections: Some(2),
        min_connections: Some(0),
        acquire_timeout_secs: Some(5),
        idle_timeout_secs: Some(1),
        test_on_borrow: Some(false),
    };
    let pool = make_pool(factory.clone(), &s);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    pool.release(a).await;
    pool.release(b).await;
    assert_eq!(pool.status().await.idle, 2);

    // Both sessions sit idle past the timeout and get closed
    tokio::time::sleep(Duration::from_millis(2600)).await;
    let status = pool.status().await;
    assert_eq!(status.idle, 0);
    assert_eq!(status.total, 0);
    assert_eq!(factory.disconnects(), 2);

    // The pool still works afterwards
    let conn = pool.acquire().await.unwrap();
    pool.release(conn).await;
    pool.destroy().await;
}

#[tokio::test]
async fn test_creation_failure_frees_reserved_slot() {
    let factory = MockFactory::new();
    let pool = make_pool(factory.clone(), &settings(1, 0, 5, false));

    factory.fail_creation.store(true, Ordering::SeqCst);
    assert!(pool.acquire().await.is_err());

    // The reserved slot was returned; the next attempt may create again
    factory.fail_creation.store(false, Ordering::SeqCst);
    let conn = pool.acquire().await.unwrap();
    pool.release(conn).await;
    pool.destroy().await;
}
