//! Connection provider - bounded pool of physical connections.
//!
//! Capacity is a fair tokio [`Semaphore`]: every borrowed connection holds one
//! permit, so concurrent borrowers can never exceed `max_connections`, and
//! callers beyond that suspend (FIFO) until a permit frees up or the
//! acquisition timeout elapses.
//!
//! A borrowed connection returns to the pool either through
//! [`ConnectionProvider::release`] or, when its owner is cancelled, through
//! the `Drop` of [`PooledConnection`]. A connection that still carries an open
//! transaction is rolled back before it becomes idle again; the permit is
//! held until that reset finishes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use super::connection::{Connection, Connector, ExecResult, Row, Statement, TransactionOptions};
use super::error::{DbError, DbResult};
use crate::config::{
    DEFAULT_DB_ACQUIRE_TIMEOUT_MS, DEFAULT_DB_MAX_CONNECTIONS, DEFAULT_DB_MIN_CONNECTIONS,
};

/// Pool sizing and wait bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolOptions {
    pub fn new(max_connections: u32) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            max_connections,
            min_connections: DEFAULT_DB_MIN_CONNECTIONS.min(max_connections),
            acquire_timeout: Duration::from_millis(DEFAULT_DB_ACQUIRE_TIMEOUT_MS),
        }
    }

    pub fn min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections.min(self.max_connections);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new(DEFAULT_DB_MAX_CONNECTIONS)
    }
}

/// Point-in-time pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub capacity: u32,
    /// Physical connections currently open (idle + borrowed)
    pub open: u32,
    pub idle: u32,
    /// Permits currently held, including connections being reset
    pub in_use: u32,
    pub acquired_total: u64,
    pub released_total: u64,
    pub timeouts_total: u64,
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    options: PoolOptions,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Box<dyn Connection>>>,
    open: AtomicU32,
    acquired: AtomicU64,
    released: AtomicU64,
    timeouts: AtomicU64,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Box<dyn Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Return a checked-out connection, resetting it first if needed.
    async fn recycle(&self, mut checkout: Checkout) {
        if checkout.in_transaction && !checkout.broken {
            tracing::warn!("Connection returned with an open transaction, rolling back");
            if let Err(e) = checkout.conn.rollback().await {
                tracing::warn!(error = %e, "Rollback on return failed, discarding connection");
                checkout.broken = true;
            }
        }

        let Checkout {
            conn,
            permit,
            broken,
            ..
        } = checkout;

        if broken || self.is_closed() {
            self.discard(conn).await;
        } else {
            self.idle().push_back(conn);
        }

        self.released.fetch_add(1, Ordering::Relaxed);
        drop(permit);
    }

    async fn discard(&self, conn: Box<dyn Connection>) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Error while closing database connection");
        }
    }
}

/// Process-scoped pool handle. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionProvider {
    inner: Arc<PoolInner>,
}

impl ConnectionProvider {
    /// Create a pool that opens connections lazily.
    pub fn new(connector: Arc<dyn Connector>, options: PoolOptions) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_connections as usize));
        Self {
            inner: Arc::new(PoolInner {
                connector,
                options,
                permits,
                idle: Mutex::new(VecDeque::new()),
                open: AtomicU32::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a pool and open `min_connections` up front.
    pub async fn connect(connector: Arc<dyn Connector>, options: PoolOptions) -> DbResult<Self> {
        let provider = Self::new(connector, options);
        provider.warm_up().await?;
        Ok(provider)
    }

    /// Open idle connections until `min_connections` are available.
    ///
    /// Intended for process start, before any borrower exists.
    pub async fn warm_up(&self) -> DbResult<()> {
        let inner = &self.inner;
        let target = inner.options.min_connections.min(inner.options.max_connections);

        while inner.open.load(Ordering::Acquire) < target {
            let conn = inner.connector.connect().await?;
            inner.open.fetch_add(1, Ordering::AcqRel);
            inner.idle().push_back(conn);
        }

        tracing::info!(
            open = inner.open.load(Ordering::Acquire),
            capacity = inner.options.max_connections,
            "Connection pool ready"
        );
        Ok(())
    }

    /// Borrow a connection, suspending while the pool is at capacity.
    ///
    /// Fails with [`DbError::PoolExhausted`] once `acquire_timeout` elapses.
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(DbError::PoolClosed);
        }

        let started = Instant::now();
        let wait = inner.permits.clone().acquire_owned();
        let permit = match tokio::time::timeout(inner.options.acquire_timeout, wait).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DbError::PoolClosed),
            Err(_) => {
                inner.timeouts.fetch_add(1, Ordering::Relaxed);
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(
                    waited_ms,
                    capacity = inner.options.max_connections,
                    "Timed out waiting for a database connection"
                );
                return Err(DbError::PoolExhausted { waited_ms });
            }
        };

        let idle = inner.idle().pop_front();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let conn = inner.connector.connect().await?;
                let open = inner.open.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::debug!(open, "Opened database connection");
                conn
            }
        };

        inner.acquired.fetch_add(1, Ordering::Relaxed);

        Ok(PooledConnection {
            checkout: Some(Checkout {
                conn,
                permit,
                in_transaction: false,
                broken: false,
            }),
            pool: inner.clone(),
        })
    }

    /// Return a borrowed connection. Consumes the handle, so it happens once.
    pub async fn release(&self, conn: PooledConnection) {
        conn.release().await;
    }

    /// Borrow a connection and check it is alive.
    pub async fn ping(&self) -> DbResult<()> {
        let mut conn = self.acquire().await?;
        let result = conn.ping().await;
        self.release(conn).await;
        result
    }

    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let capacity = inner.options.max_connections;
        let available = inner.permits.available_permits() as u32;

        PoolStatus {
            capacity,
            open: inner.open.load(Ordering::Acquire),
            idle: inner.idle().len() as u32,
            in_use: capacity.saturating_sub(available),
            acquired_total: inner.acquired.load(Ordering::Relaxed),
            released_total: inner.released.load(Ordering::Relaxed),
            timeouts_total: inner.timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Stop handing out connections and close the idle ones.
    ///
    /// Waiting borrowers fail with [`DbError::PoolClosed`]; connections still
    /// borrowed are closed when they come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.permits.close();

        let idle: Vec<_> = self.inner.idle().drain(..).collect();
        for conn in idle {
            self.inner.discard(conn).await;
        }

        tracing::info!("Connection pool closed");
    }
}

struct Checkout {
    conn: Box<dyn Connection>,
    permit: OwnedSemaphorePermit,
    in_transaction: bool,
    broken: bool,
}

impl Checkout {
    fn track<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        if let Err(e) = &result {
            if e.is_connection_broken() {
                self.broken = true;
            }
        }
        result
    }
}

/// A connection on loan from the pool.
///
/// Tracks whether a transaction is open on it and whether the transport
/// failed, so the pool knows how to take it back.
pub struct PooledConnection {
    checkout: Option<Checkout>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    fn live(&mut self) -> DbResult<&mut Checkout> {
        self.checkout
            .as_mut()
            .ok_or_else(|| DbError::connection("connection already returned to the pool"))
    }

    pub async fn begin(&mut self, options: TransactionOptions) -> DbResult<()> {
        let checkout = self.live()?;
        // Flag first: a BEGIN cancelled in flight must still be rolled back.
        checkout.in_transaction = true;
        let result = checkout.conn.begin(options).await;
        checkout.track(result)
    }

    pub async fn execute(&mut self, statement: &Statement) -> DbResult<ExecResult> {
        let checkout = self.live()?;
        let result = checkout.conn.execute(statement).await;
        checkout.track(result)
    }

    pub async fn fetch_all(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        let checkout = self.live()?;
        let result = checkout.conn.fetch_all(statement).await;
        checkout.track(result)
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        let checkout = self.live()?;
        let result = checkout.conn.commit().await;
        if result.is_ok() {
            checkout.in_transaction = false;
        }
        checkout.track(result)
    }

    /// Roll back; a failure marks the connection unusable.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let checkout = self.live()?;
        let result = checkout.conn.rollback().await;
        match &result {
            Ok(()) => checkout.in_transaction = false,
            Err(_) => checkout.broken = true,
        }
        result
    }

    pub async fn ping(&mut self) -> DbResult<()> {
        let checkout = self.live()?;
        let result = checkout.conn.ping().await;
        checkout.track(result)
    }

    pub fn is_broken(&self) -> bool {
        self.checkout.as_ref().map_or(true, |c| c.broken)
    }

    /// Hand the connection back to its pool.
    ///
    /// A reset runs on its own task, so cancelling this future never leaves
    /// the pool's accounting half done.
    pub async fn release(mut self) {
        let Some(checkout) = self.checkout.take() else {
            return;
        };
        if let Some(reset) = hand_back(&self.pool, checkout) {
            if let Err(e) = reset.await {
                tracing::error!(error = %e, "Connection reset task failed");
            }
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("PooledConnection");
        match &self.checkout {
            Some(checkout) => debug
                .field("in_transaction", &checkout.in_transaction)
                .field("broken", &checkout.broken),
            None => debug.field("released", &true),
        };
        debug.finish_non_exhaustive()
    }
}

/// Return a checkout to the pool. Clean connections go straight back with no
/// I/O; anything else is reset on a spawned task, whose handle is returned.
fn hand_back(pool: &Arc<PoolInner>, checkout: Checkout) -> Option<JoinHandle<()>> {
    if !checkout.in_transaction && !checkout.broken && !pool.is_closed() {
        let Checkout { conn, permit, .. } = checkout;
        pool.idle().push_back(conn);
        pool.released.fetch_add(1, Ordering::Relaxed);
        drop(permit);
        return None;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let pool = pool.clone();
            Some(handle.spawn(async move {
                pool.recycle(checkout).await;
            }))
        }
        Err(_) => {
            tracing::warn!("Connection returned outside a runtime, discarding");
            pool.open.fetch_sub(1, Ordering::AcqRel);
            pool.released.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(checkout) = self.checkout.take() {
            // Nobody is left to await the reset; it completes on its own task.
            let _ = hand_back(&self.pool, checkout);
        }
    }
}
