//! The bounded connection pool.
//!
//! One pool owns all sessions for one connection configuration. Sessions
//! cycle through `Idle -> CheckedOut -> Idle`; a session leaves the cycle
//! when validation fails, when it is pruned for sitting idle too long, or
//! when the pool is destroyed.
//!
//! # Concurrency
//!
//! Every piece of mutable pool state (`total`, `live`, `idle`, `waiters`,
//! `destroyed`) lives behind one `tokio::sync::Mutex` - the check-then-act
//! sequences in `acquire`/`release` are not safe under parallel mutation
//! otherwise. The lock is never held across driver I/O: connect, ping and
//! disconnect all happen between lock scopes.
//!
//! # Fairness
//!
//! Waiters queue FIFO, and `release()` always hands a connection to the
//! oldest waiter directly - it never touches the idle list while someone
//! is waiting. A timed-out waiter deregisters itself under the lock; if a
//! handoff raced the timeout, the waiter recovers the connection from its
//! own channel and gives it back, so no connection ends up checked out
//! with no holder.

use crate::config::PoolSettings;
use crate::db::connection::{Connection, ConnectionFactory};
use crate::error::{ConduitError, ConduitResult};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
}

/// A session checked out of (or owned by) a pool.
pub struct PooledConnection {
    id: Uuid,
    session: Box<dyn Connection>,
}

impl PooledConnection {
    fn new(session: Box<dyn Connection>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session_mut(&mut self) -> &mut dyn Connection {
        self.session.as_mut()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("backend", &self.session.backend())
            .finish()
    }
}

struct IdleEntry {
    conn: PooledConnection,
    since: Instant,
}

struct Waiter {
    id: Uuid,
    tx: oneshot::Sender<ConduitResult<PooledConnection>>,
}

struct PoolState {
    /// All sessions the pool accounts for: idle + checked out + being
    /// created. Never exceeds `max`.
    total: usize,
    /// Ids of sessions currently tracked (idle or checked out).
    live: HashSet<Uuid>,
    /// LIFO: the most recently released session is reused first.
    idle: Vec<IdleEntry>,
    /// FIFO queue of suspended `acquire()` calls.
    waiters: VecDeque<Waiter>,
    destroyed: bool,
}

enum AcquirePlan {
    Reuse(PooledConnection),
    Create,
    Wait(Uuid, oneshot::Receiver<ConduitResult<PooledConnection>>),
}

pub struct ConnectionPool {
    identity: String,
    factory: Arc<dyn ConnectionFactory>,
    max: usize,
    min: usize,
    acquire_timeout: Duration,
    idle_timeout: Duration,
    test_on_borrow: bool,
    state: Mutex<PoolState>,
    /// Synchronous storage so destroy() can abort without awaiting.
    prune_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Build a pool. `file_based` selects the SQLite capacity default.
    pub fn new(
        identity: impl Into<String>,
        factory: Arc<dyn ConnectionFactory>,
        settings: &PoolSettings,
        file_based: bool,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            identity: identity.into(),
            factory,
            max: settings.max_connections_or_default(file_based) as usize,
            min: settings.min_connections_or_default() as usize,
            acquire_timeout: settings.acquire_timeout(),
            idle_timeout: settings.idle_timeout(),
            test_on_borrow: settings.test_on_borrow_or_default(),
            state: Mutex::new(PoolState {
                total: 0,
                live: HashSet::new(),
                idle: Vec::new(),
                waiters: VecDeque::new(),
                destroyed: false,
            }),
            prune_handle: std::sync::Mutex::new(None),
        });

        // idle_timeout of zero disables pruning
        if !pool.idle_timeout.is_zero() {
            Self::spawn_prune_task(&pool);
        }
        pool
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Eagerly create the configured minimum of sessions. The first
    /// creation failure surfaces to the caller instead of silently
    /// under-provisioning.
    pub async fn initialize(&self) -> ConduitResult<()> {
        for _ in 0..self.min {
            let session = self.factory.create().await?;
            let conn = PooledConnection::new(session);
            let mut state = self.state.lock().await;
            if state.destroyed {
                drop(state);
                let mut conn = conn;
                let _ = conn.session.disconnect().await;
                return Err(ConduitError::pool_destroyed(&self.identity));
            }
            state.total += 1;
            state.live.insert(conn.id);
            state.idle.push(IdleEntry {
                conn,
                since: Instant::now(),
            });
        }
        debug!(pool_id = %self.identity, min = self.min, "pool initialized");
        Ok(())
    }

    /// Check a session out of the pool.
    ///
    /// Order of preference: idle session (validated when `test_on_borrow`
    /// is set), then a fresh session if under capacity, then a FIFO wait
    /// bounded by the acquire timeout.
    pub async fn acquire(&self) -> ConduitResult<PooledConnection> {
        loop {
            let plan = {
                let mut state = self.state.lock().await;
                if state.destroyed {
                    return Err(ConduitError::pool_destroyed(&self.identity));
                }
                if let Some(entry) = state.idle.pop() {
                    AcquirePlan::Reuse(entry.conn)
                } else if state.total < self.max {
                    // Reserve the slot before the await so concurrent
                    // acquires cannot overshoot max.
                    state.total += 1;
                    AcquirePlan::Create
                } else {
                    let (tx, rx) = oneshot::channel();
                    let id = Uuid::new_v4();
                    state.waiters.push_back(Waiter { id, tx });
                    AcquirePlan::Wait(id, rx)
                }
            };

            match plan {
                AcquirePlan::Reuse(mut conn) => {
                    if self.test_on_borrow {
                        if let Err(e) = conn.session.ping().await {
                            warn!(
                                pool_id = %self.identity,
                                error = %e,
                                "idle session failed validation, discarding"
                            );
                            self.discard(conn).await;
                            continue;
                        }
                    }
                    debug!(pool_id = %self.identity, conn_id = %conn.id, "acquired idle session");
                    return Ok(conn);
                }

                AcquirePlan::Create => match self.factory.create().await {
                    Ok(session) => {
                        let conn = PooledConnection::new(session);
                        let mut state = self.state.lock().await;
                        if state.destroyed {
                            state.total -= 1;
                            drop(state);
                            let mut conn = conn;
                            let _ = conn.session.disconnect().await;
                            return Err(ConduitError::pool_destroyed(&self.identity));
                        }
                        state.live.insert(conn.id);
                        debug!(
                            pool_id = %self.identity,
                            conn_id = %conn.id,
                            total = state.total,
                            "created session"
                        );
                        return Ok(conn);
                    }
                    Err(e) => {
                        let mut state = self.state.lock().await;
                        state.total -= 1;
                        return Err(e);
                    }
                },

                AcquirePlan::Wait(waiter_id, mut rx) => {
                    debug!(pool_id = %self.identity, "pool at capacity, waiting");
                    match tokio::time::timeout(self.acquire_timeout, &mut rx).await {
                        Ok(Ok(result)) => return result,
                        // Sender dropped without a value: destroy() path
                        Ok(Err(_)) => {
                            return Err(ConduitError::pool_destroyed(&self.identity));
                        }
                        Err(_) => {
                            self.abandon_waiter(waiter_id, &mut rx).await;
                            return Err(ConduitError::pool_exhausted(
                                &self.identity,
                                self.acquire_timeout.as_secs(),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Deregister a timed-out waiter. If `release()` won the race and the
    /// connection is already in our channel, recover it and give it back -
    /// a stale handoff would otherwise leak a checked-out session with no
    /// holder.
    async fn abandon_waiter(
        &self,
        waiter_id: Uuid,
        rx: &mut oneshot::Receiver<ConduitResult<PooledConnection>>,
    ) {
        let to_close = {
            let mut state = self.state.lock().await;
            let before = state.waiters.len();
            state.waiters.retain(|w| w.id != waiter_id);
            if state.waiters.len() < before {
                None
            } else if let Ok(Ok(conn)) = rx.try_recv() {
                if state.destroyed {
                    state.live.remove(&conn.id);
                    state.total = state.total.saturating_sub(1);
                    Some(conn)
                } else {
                    Self::hand_off_or_park(&mut state, conn);
                    None
                }
            } else {
                None
            }
        };
        if let Some(mut conn) = to_close {
            let _ = conn.session.disconnect().await;
        }
    }

    /// Return a session to the pool.
    ///
    /// The oldest waiter, if any, receives it directly; only with an empty
    /// waiter queue does it land on the idle list. Releasing into a
    /// destroyed pool disconnects the session; releasing a session this
    /// pool does not track is a no-op.
    pub async fn release(&self, conn: PooledConnection) {
        let to_close = {
            let mut state = self.state.lock().await;
            if state.destroyed {
                state.live.remove(&conn.id);
                state.total = state.total.saturating_sub(1);
                Some(conn)
            } else if !state.live.contains(&conn.id) {
                warn!(
                    pool_id = %self.identity,
                    conn_id = %conn.id,
                    "released session is not tracked by this pool"
                );
                Some(conn)
            } else {
                Self::hand_off_or_park(&mut state, conn);
                None
            }
        };
        if let Some(mut conn) = to_close {
            let _ = conn.session.disconnect().await;
        }
    }

    /// Hand the session to the oldest live waiter, or park it on the idle
    /// list. Waiters whose receiver is already gone are skipped.
    fn hand_off_or_park(state: &mut PoolState, conn: PooledConnection) {
        let mut give = Some(conn);
        while let Some(conn) = give.take() {
            match state.waiters.pop_front() {
                Some(waiter) => {
                    if let Err(Ok(conn)) = waiter.tx.send(Ok(conn)) {
                        give = Some(conn);
                    }
                }
                None => {
                    state.idle.push(IdleEntry {
                        conn,
                        since: Instant::now(),
                    });
                }
            }
        }
    }

    /// Drop a session from the pool's accounting and close it.
    async fn discard(&self, mut conn: PooledConnection) {
        {
            let mut state = self.state.lock().await;
            state.live.remove(&conn.id);
            state.total = state.total.saturating_sub(1);
        }
        let _ = conn.session.disconnect().await;
    }

    /// Tear the pool down: reject every pending waiter, disconnect every
    /// idle session, refuse all future acquires. Checked-out sessions are
    /// disconnected when their holder releases them.
    pub async fn destroy(&self) {
        if let Some(handle) = self.prune_handle.lock().unwrap().take() {
            handle.abort();
        }

        let (idle, waiters) = {
            let mut state = self.state.lock().await;
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            let idle: Vec<IdleEntry> = state.idle.drain(..).collect();
            let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
            for entry in &idle {
                state.live.remove(&entry.conn.id);
            }
            state.total = state.total.saturating_sub(idle.len());
            (idle, waiters)
        };

        for waiter in waiters {
            let _ = waiter
                .tx
                .send(Err(ConduitError::pool_destroyed(&self.identity)));
        }
        for mut entry in idle {
            let _ = entry.conn.session.disconnect().await;
        }
        info!(pool_id = %self.identity, "pool destroyed");
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.state.lock().await;
        PoolStatus {
            total: state.total,
            active: state.total - state.idle.len(),
            idle: state.idle.len(),
            waiting: state.waiters.len(),
        }
    }

    fn spawn_prune_task(pool: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(pool);
        let period = pool.idle_timeout.min(Duration::from_secs(60));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else {
                    return;
                };
                pool.prune_idle().await;
                drop(pool);
            }
        });
        *pool.prune_handle.lock().unwrap() = Some(handle);
    }

    /// Close idle sessions unused beyond the idle timeout, keeping at
    /// least `min` sessions alive.
    async fn prune_idle(&self) {
        let now = Instant::now();
        let pruned = {
            let mut state = self.state.lock().await;
            if state.destroyed {
                return;
            }
            let entries: Vec<IdleEntry> = state.idle.drain(..).collect();
            let mut remaining = state.total;
            let mut keep = Vec::new();
            let mut pruned = Vec::new();
            for entry in entries {
                let expired = now.saturating_duration_since(entry.since) > self.idle_timeout;
                if expired && remaining > self.min {
                    remaining -= 1;
                    pruned.push(entry);
                } else {
                    keep.push(entry);
                }
            }
            state.idle = keep;
            for entry in &pruned {
                state.live.remove(&entry.conn.id);
            }
            state.total = remaining;
            pruned
        };
        for mut entry in pruned {
            debug!(
                pool_id = %self.identity,
                conn_id = %entry.conn.id,
                "pruned idle session"
            );
            let _ = entry.conn.session.disconnect().await;
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("identity", &self.identity)
            .field("max", &self.max)
            .field("min", &self.min)
            .finish()
    }
}
