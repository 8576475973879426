//! Connection pool registry.
//!
//! Pools are created lazily per [`ConnectionFingerprint`] and live until they
//! are closed explicitly, evicted (opt-in), or the process shuts down.
//!
//! # Concurrency
//!
//! - **`OnceCell` per fingerprint**: concurrent first-use callers share one
//!   creation attempt; later callers reuse the winner's pool.
//! - **Failed creation leaves nothing behind**: the empty cell is removed
//!   under the write lock once no other caller still holds it.
//! - **No lock across pool I/O**: connects and closes happen after the
//!   registry lock is released.

use crate::config::{DEFAULT_EVICTION_INTERVAL_SECS, GatewayConfig};
use crate::error::{GatewayError, GatewayResult, driver_message};
use crate::models::{ConnectionFingerprint, ConnectionParams, Driver};
use futures_util::future::join_all;
use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{MySqlPool, PgPool, SqlitePool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    /// Close the pool, waiting for borrowed connections to come back.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::Sqlite(pool) => pool.close().await,
        }
    }

    /// Get the driver for this pool.
    pub fn driver(&self) -> Driver {
        match self {
            DbPool::MySql(_) => Driver::MySql,
            DbPool::Postgres(_) => Driver::Postgres,
            DbPool::Sqlite(_) => Driver::Sqlite,
        }
    }

    /// Current connection counts.
    pub fn stats(&self) -> PoolStats {
        let (size, idle) = match self {
            DbPool::MySql(pool) => (pool.size(), pool.num_idle()),
            DbPool::Postgres(pool) => (pool.size(), pool.num_idle()),
            DbPool::Sqlite(pool) => (pool.size(), pool.num_idle()),
        };
        PoolStats { size, idle }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::MySql(pool) => pool.is_closed(),
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::Sqlite(pool) => pool.is_closed(),
        }
    }
}

/// Connection counts of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Open connections, idle or borrowed.
    pub size: u32,
    pub idle: usize,
}

impl PoolStats {
    /// Connections currently borrowed by callers.
    pub fn in_use(&self) -> usize {
        (self.size as usize).saturating_sub(self.idle)
    }
}

struct PoolEntry {
    pool: DbPool,
    /// std lock: never held across an await.
    last_accessed: std::sync::RwLock<Instant>,
    created_at: Instant,
}

impl PoolEntry {
    fn new(pool: DbPool) -> Self {
        let now = Instant::now();
        Self {
            pool,
            last_accessed: std::sync::RwLock::new(now),
            created_at: now,
        }
    }

    fn touch(&self) {
        if let Ok(mut last_accessed) = self.last_accessed.write() {
            *last_accessed = Instant::now();
        }
    }

    fn last_accessed(&self) -> Instant {
        self.last_accessed
            .read()
            .map(|guard| *guard)
            .unwrap_or(self.created_at)
    }

    fn is_evictable(&self, now: Instant, idle_for: Duration) -> bool {
        self.pool.stats().in_use() == 0
            && now.saturating_duration_since(self.last_accessed()) > idle_for
    }
}

type PoolCell = Arc<OnceCell<PoolEntry>>;

/// Registry of live pools keyed by connection fingerprint.
pub struct PoolManager {
    config: GatewayConfig,
    pools: RwLock<HashMap<ConnectionFingerprint, PoolCell>>,
    pools_created: AtomicU64,
    eviction_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PoolManager {
    /// Create an empty registry.
    ///
    /// When idle eviction is configured, a background task is spawned; this
    /// must then be called from within a tokio runtime.
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let eviction_idle = config.pool.eviction_idle();
        let manager = Arc::new(Self {
            config,
            pools: RwLock::new(HashMap::new()),
            pools_created: AtomicU64::new(0),
            eviction_handle: std::sync::Mutex::new(None),
        });

        if let Some(idle_for) = eviction_idle {
            let interval = Duration::from_secs(DEFAULT_EVICTION_INTERVAL_SECS).min(idle_for);
            manager.start_eviction(interval, idle_for);
        }

        manager
    }

    /// Start the idle-pool eviction task, replacing any running one.
    pub fn start_eviction(self: &Arc<Self>, interval: Duration, idle_for: Duration) {
        let weak_manager = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            Self::eviction_task(weak_manager, interval, idle_for).await;
        });

        if let Ok(mut guard) = self.eviction_handle.lock() {
            if let Some(previous) = guard.replace(handle) {
                previous.abort();
            }
        }
        info!(
            idle_secs = idle_for.as_secs(),
            "Idle pool eviction enabled"
        );
    }

    /// Fingerprint `params` the way this registry keys them.
    pub fn fingerprint(&self, params: &ConnectionParams) -> ConnectionFingerprint {
        params.fingerprint(self.config.default_port, self.config.key_pools_by_password)
    }

    /// Return the pool for `params`, creating it on first use.
    ///
    /// An existing pool is returned unchanged; the password of this call is
    /// only used if the pool has to be created.
    pub async fn get_or_create_pool(&self, params: &ConnectionParams) -> GatewayResult<DbPool> {
        let fingerprint = self.fingerprint(params);

        let cell = {
            let pools = self.pools.read().await;
            if let Some(cell) = pools.get(&fingerprint) {
                Arc::clone(cell)
            } else {
                drop(pools);
                let mut pools = self.pools.write().await;
                // Double-check after acquiring write lock
                Arc::clone(pools.entry(fingerprint.clone()).or_default())
            }
        };

        let created = cell
            .get_or_try_init(|| async {
                debug!(fingerprint = %fingerprint, "Creating new pool");
                let pool = self.create_pool(params, &fingerprint).await?;
                let total = self.pools_created.fetch_add(1, Ordering::AcqRel) + 1;
                info!(fingerprint = %fingerprint, pools_created = total, "Pool created");
                Ok::<_, GatewayError>(PoolEntry::new(pool))
            })
            .await;

        match created {
            Ok(entry) => self.adopt(&fingerprint, &cell, entry).await,
            Err(e) => {
                self.forget_failed(&fingerprint, &cell).await;
                Err(e)
            }
        }
    }

    /// Hand out the pool of `cell` only while that cell is still the registered
    /// one. A pool whose cell was drained during creation has no owner left to
    /// close it, so it is closed here instead.
    async fn adopt(
        &self,
        fingerprint: &ConnectionFingerprint,
        cell: &PoolCell,
        entry: &PoolEntry,
    ) -> GatewayResult<DbPool> {
        let registered = {
            let pools = self.pools.read().await;
            pools
                .get(fingerprint)
                .is_some_and(|current| Arc::ptr_eq(current, cell))
        };

        if registered {
            entry.touch();
            return Ok(entry.pool.clone());
        }

        warn!(fingerprint = %fingerprint, "Pool was unregistered while being created");
        if let Err(e) = self.close_entry(fingerprint, entry).await {
            warn!(error = %e, "Unregistered pool did not close cleanly");
        }
        Err(GatewayError::pool_creation(
            fingerprint,
            "pool registry was closed while the pool was being created",
        ))
    }

    /// Drop an uninitialized cell unless another caller is still waiting on it.
    async fn forget_failed(&self, fingerprint: &ConnectionFingerprint, cell: &PoolCell) {
        let mut pools = self.pools.write().await;
        let removable = pools.get(fingerprint).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && current.get().is_none()
        }) && Arc::strong_count(cell) == 2;

        if removable {
            pools.remove(fingerprint);
            debug!(fingerprint = %fingerprint, "Discarded failed pool registration");
        }
    }

    /// Close one pool and remove it from the registry. No-op if absent.
    pub async fn close_pool(&self, fingerprint: &ConnectionFingerprint) -> GatewayResult<()> {
        let removed = {
            let mut pools = self.pools.write().await;
            match pools.get(fingerprint) {
                Some(cell) if cell.get().is_some() => pools.remove(fingerprint),
                _ => None,
            }
        }; // Lock released here

        match removed.as_ref().and_then(|cell| cell.get()) {
            Some(entry) => self.close_entry(fingerprint, entry).await,
            None => Ok(()),
        }
    }

    /// Close every registered pool concurrently and clear the registry.
    ///
    /// All closes are attempted; the first failure is returned afterwards.
    pub async fn close_all(&self) -> GatewayResult<()> {
        if let Ok(mut guard) = self.eviction_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }

        // Drain pools under lock, close outside lock
        let drained: Vec<(ConnectionFingerprint, PoolCell)> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };

        let closes = drained.iter().filter_map(|(fingerprint, cell)| {
            cell.get()
                .map(|entry| self.close_entry(fingerprint, entry))
        });
        let results = join_all(closes).await;

        let failures = results.iter().filter(|r| r.is_err()).count();
        info!(
            pools = results.len(),
            failures, "Closed all pools"
        );

        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }

    async fn close_entry(
        &self,
        fingerprint: &ConnectionFingerprint,
        entry: &PoolEntry,
    ) -> GatewayResult<()> {
        let close_timeout = self.config.close_timeout();
        info!(fingerprint = %fingerprint, "Closing pool");

        match tokio::time::timeout(close_timeout, entry.pool.close()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let stats = entry.pool.stats();
                warn!(
                    fingerprint = %fingerprint,
                    in_use = stats.in_use(),
                    "Pool did not close in time"
                );
                Err(GatewayError::pool_close(
                    fingerprint,
                    format!(
                        "timed out after {}s with {} connection(s) still in use",
                        close_timeout.as_secs(),
                        stats.in_use()
                    ),
                ))
            }
        }
    }

    /// Number of registered (initialized) pools.
    pub async fn pool_count(&self) -> usize {
        let pools = self.pools.read().await;
        pools.values().filter(|cell| cell.get().is_some()).count()
    }

    /// Total pools created over the registry's lifetime.
    pub fn pools_created(&self) -> u64 {
        self.pools_created.load(Ordering::Acquire)
    }

    /// Connection counts for a registered pool.
    pub async fn stats(&self, fingerprint: &ConnectionFingerprint) -> Option<PoolStats> {
        let pools = self.pools.read().await;
        pools
            .get(fingerprint)
            .and_then(|cell| cell.get())
            .map(|entry| entry.pool.stats())
    }

    /// Whether a pool is registered for `fingerprint`.
    pub async fn contains(&self, fingerprint: &ConnectionFingerprint) -> bool {
        self.stats(fingerprint).await.is_some()
    }

    async fn create_pool(
        &self,
        params: &ConnectionParams,
        fingerprint: &ConnectionFingerprint,
    ) -> GatewayResult<DbPool> {
        let pool_opts = &self.config.pool;
        let connect_timeout = self.config.connect_timeout();
        let idle_timeout = Some(pool_opts.idle_timeout_or_default());
        let acquire_timeout = pool_opts.acquire_timeout_or_default();

        let connecting = async {
            match params.driver {
                Driver::MySql => MySqlPoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default())
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(mysql_options(params, self.config.default_port))
                    .await
                    .map(DbPool::MySql),
                Driver::Postgres => PgPoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default())
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(postgres_options(params, self.config.default_port))
                    .await
                    .map(DbPool::Postgres),
                Driver::Sqlite => SqlitePoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default())
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_with(sqlite_options(params))
                    .await
                    .map(DbPool::Sqlite),
            }
        };

        match tokio::time::timeout(connect_timeout, connecting).await {
            Ok(Ok(pool)) => Ok(pool),
            Ok(Err(e)) => {
                warn!(fingerprint = %fingerprint, error = %e, "Pool creation failed");
                Err(GatewayError::pool_creation(fingerprint, driver_message(&e)))
            }
            Err(_) => {
                warn!(fingerprint = %fingerprint, "Pool creation timed out");
                Err(GatewayError::pool_creation(
                    fingerprint,
                    format!("connect timed out after {}s", connect_timeout.as_secs()),
                ))
            }
        }
    }

    /// Background task closing pools that stayed unused for `idle_for`.
    ///
    /// Holds only a Weak reference, so it exits once the manager is dropped.
    /// Candidates are collected under a read lock and re-checked under a
    /// brief write lock before removal; closing happens outside all locks.
    async fn eviction_task(weak_manager: Weak<Self>, interval: Duration, idle_for: Duration) {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            let Some(manager) = weak_manager.upgrade() else {
                debug!("Pool manager dropped, eviction task exiting");
                return;
            };

            let now = Instant::now();
            let candidates: Vec<ConnectionFingerprint> = {
                let pools = manager.pools.read().await;
                pools
                    .iter()
                    .filter(|(_, cell)| cell.get().is_some_and(|e| e.is_evictable(now, idle_for)))
                    .map(|(fingerprint, _)| fingerprint.clone())
                    .collect()
            };

            for fingerprint in candidates {
                let removed = {
                    let mut pools = manager.pools.write().await;
                    let still_idle = pools
                        .get(&fingerprint)
                        .and_then(|cell| cell.get())
                        .is_some_and(|e| e.is_evictable(now, idle_for));
                    if still_idle {
                        pools.remove(&fingerprint)
                    } else {
                        None
                    }
                };

                if let Some(entry) = removed.as_ref().and_then(|cell| cell.get()) {
                    info!(fingerprint = %fingerprint, "Evicting idle pool");
                    if let Err(e) = manager.close_entry(&fingerprint, entry).await {
                        warn!(error = %e, "Evicted pool did not close cleanly");
                    }
                }
            }

            // Drop strong reference before sleeping to allow manager deallocation
            drop(manager);
        }
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools_created", &self.pools_created())
            .field("key_pools_by_password", &self.config.key_pools_by_password)
            .finish_non_exhaustive()
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.eviction_handle.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// MySQL connect options built field by field, so passwords need no escaping.
pub(crate) fn mysql_options(
    params: &ConnectionParams,
    default_port: Option<u16>,
) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(&params.host)
        .port(params.resolved_port(default_port))
        .username(&params.username)
        .password(&params.password)
        .charset("utf8mb4");

    if params.database.is_empty() {
        options
    } else {
        options.database(&params.database)
    }
}

pub(crate) fn postgres_options(
    params: &ConnectionParams,
    default_port: Option<u16>,
) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&params.host)
        .port(params.resolved_port(default_port))
        .username(&params.username)
        .password(&params.password);

    if params.database.is_empty() {
        options
    } else {
        options.database(&params.database)
    }
}

/// SQLite targets must already exist; a typo should not create an empty file.
pub(crate) fn sqlite_options(params: &ConnectionParams) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(&params.database)
        .create_if_missing(false)
}
