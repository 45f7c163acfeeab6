//! Connection pool: the live handle behind one named data source.
//!
//! `ConnectionPool` owns a bounded set of physical connections opened through
//! a [`Driver`]. Callers check connections out with [`ConnectionPool::acquire`]
//! and get a [`PooledConnection`] guard that returns the connection when it is
//! dropped, on every exit path.
//!
//! All tuning in [`PoolSettings`] is live: changes apply to the next acquire
//! or release without rebuilding the pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectOptions, PoolSettings};
use crate::driver::{Connection, Driver};
use crate::error::{DataSourceError, DriverError, Result};

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// An idle connection and the moment it was returned.
struct Idle {
    conn: Box<dyn Connection>,
    since: Instant,
}

impl Idle {
    fn new(conn: Box<dyn Connection>) -> Self {
        Self {
            conn,
            since: Instant::now(),
        }
    }
}

struct PoolState {
    settings: PoolSettings,
    idle: VecDeque<Idle>,
    /// Checked out by callers.
    active: usize,
    /// Reserved slots whose connection is still being opened.
    opening: usize,
    suspended: bool,
    closed: bool,
    created: u64,
    destroyed: u64,
    total_acquisitions: u64,
}

impl PoolState {
    fn total(&self) -> usize {
        self.active + self.idle.len() + self.opening
    }

    fn has_capacity(&self) -> bool {
        self.total() < self.settings.max_active
    }

    /// Remove idle connections until `total() <= max_active` and `idle <= max_idle`.
    fn trim(&mut self) -> Vec<Idle> {
        let mut removed = Vec::new();
        while !self.idle.is_empty()
            && (self.total() > self.settings.max_active
                || self.idle.len() > self.settings.max_idle)
        {
            if let Some(entry) = self.idle.pop_front() {
                removed.push(entry);
            }
        }
        self.destroyed += removed.len() as u64;
        removed
    }
}

struct PoolInner {
    name: String,
    driver: Arc<dyn Driver>,
    options: ConnectOptions,
    state: Mutex<PoolState>,
    /// Signalled whenever a slot may have become available.
    available: Notify,
    waiting: AtomicUsize,
    evictor: CancellationToken,
}

/// Decision taken under the state lock.
enum Checkout {
    Idle(Box<dyn Connection>),
    Open,
    Wait,
}

// ---------------------------------------------------------------------------
// PoolStats
// ---------------------------------------------------------------------------

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently checked out.
    pub active: usize,
    /// Connections idle in the pool.
    pub idle: usize,
    /// Active + idle + being opened.
    pub total: usize,
    /// Tasks waiting for a connection.
    pub waiting: usize,
    /// Configured upper bound.
    pub max_active: usize,
    /// Configured acquisition wait.
    pub max_wait: Duration,
    /// Configured idle ceiling.
    pub max_idle: usize,
    /// Configured idle floor.
    pub min_idle: usize,
    /// Physical connections ever opened.
    pub created: u64,
    /// Physical connections ever closed.
    pub destroyed: u64,
    /// Successful acquisitions.
    pub total_acquisitions: u64,
    /// Whether hand-out is suspended.
    pub suspended: bool,
}

// ---------------------------------------------------------------------------
// ConnectionPool
// ---------------------------------------------------------------------------

/// Shared handle to one data source's connection pool.
///
/// Cloning is cheap; all clones refer to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Create a pool. No connection is opened until the first acquire or
    /// [`fill_min_idle`](Self::fill_min_idle).
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn Driver>,
        options: ConnectOptions,
        settings: PoolSettings,
    ) -> Result<Self> {
        let name = name.into();
        settings.validate(&name)?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                driver,
                options,
                state: Mutex::new(PoolState {
                    settings,
                    idle: VecDeque::with_capacity(settings.max_idle),
                    active: 0,
                    opening: 0,
                    suspended: false,
                    closed: false,
                    created: 0,
                    destroyed: 0,
                    total_acquisitions: 0,
                }),
                available: Notify::new(),
                waiting: AtomicUsize::new(0),
                evictor: CancellationToken::new(),
            }),
        })
    }

    /// Data source name this pool serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether both handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check out a connection, waiting up to `maxWait` for one to free up.
    ///
    /// # Errors
    /// - [`DataSourceError::PoolExhausted`] when the wait expires
    /// - [`DataSourceError::PoolClosed`] when the pool is (or becomes) closed
    /// - [`DataSourceError::Connection`] when the driver cannot open a connection
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let started = Instant::now();
        let max_wait = self.inner.state.lock().settings.max_wait;
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            // Register interest before inspecting state so a release between
            // the check and the wait is not missed.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.checkout()? {
                Checkout::Idle(conn) => {
                    let test_on_borrow = self.inner.state.lock().settings.test_on_borrow;
                    let mut guard = PooledConnection::new(conn, self.clone());
                    if !test_on_borrow {
                        return Ok(self.handed_out(guard));
                    }
                    let probed = tokio::time::timeout_at(deadline, guard.is_valid()).await;
                    let Ok(valid) = probed else {
                        guard.mark_broken();
                        return Err(self.exhausted(started.elapsed()));
                    };
                    if !valid {
                        tracing::debug!(
                            datasource = %self.inner.name,
                            "Discarding idle connection that failed validation"
                        );
                        guard.mark_broken();
                        drop(guard);
                        continue;
                    }
                    return Ok(self.handed_out(guard));
                }
                Checkout::Open => {
                    let slot = OpeningSlot::new(self);
                    let opened = tokio::time::timeout_at(deadline, self.connect()).await;
                    let Ok(connected) = opened else {
                        tracing::warn!(
                            datasource = %self.inner.name,
                            ?max_wait,
                            "Opening a connection outlasted maxWait"
                        );
                        return Err(self.exhausted(started.elapsed()));
                    };
                    let conn = connected?;
                    let closed = slot.complete(|state| {
                        if state.closed {
                            state.destroyed += 1;
                        } else {
                            state.active += 1;
                        }
                        state.closed
                    });
                    if closed {
                        return Err(DataSourceError::PoolClosed {
                            name: self.inner.name.clone(),
                        });
                    }
                    return Ok(self.handed_out(PooledConnection::new(conn, self.clone())));
                }
                Checkout::Wait => {}
            }

            let _waiter = Waiter::register(&self.inner.waiting);
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(self.exhausted(started.elapsed()));
            }
        }
    }

    fn checkout(&self) -> Result<Checkout> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(DataSourceError::PoolClosed {
                name: self.inner.name.clone(),
            });
        }
        if state.suspended || state.active + state.opening >= state.settings.max_active {
            return Ok(Checkout::Wait);
        }
        if let Some(idle) = state.idle.pop_front() {
            state.active += 1;
            return Ok(Checkout::Idle(idle.conn));
        }
        if state.has_capacity() {
            state.opening += 1;
            return Ok(Checkout::Open);
        }
        Ok(Checkout::Wait)
    }

    fn handed_out(&self, guard: PooledConnection) -> PooledConnection {
        let active = {
            let mut state = self.inner.state.lock();
            state.total_acquisitions += 1;
            state.active
        };
        tracing::debug!(datasource = %self.inner.name, active, "Acquired connection");
        guard
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        self.inner
            .driver
            .connect(&self.inner.options)
            .await
            .map_err(|source| DataSourceError::connection(&self.inner.name, source))
    }

    fn exhausted(&self, waited: Duration) -> DataSourceError {
        let state = self.inner.state.lock();
        DataSourceError::PoolExhausted {
            name: self.inner.name.clone(),
            active: state.active,
            max_active: state.settings.max_active,
            waited_ms: waited.as_millis() as u64,
        }
    }

    /// Return a connection from a dropped guard.
    fn release(&self, conn: Box<dyn Connection>, broken: bool) {
        let discarded = {
            let mut state = self.inner.state.lock();
            state.active = state.active.saturating_sub(1);
            let over_capacity = state.total() >= state.settings.max_active;
            let idle_full = state.idle.len() >= state.settings.max_idle;
            if state.closed || broken || over_capacity || idle_full {
                state.destroyed += 1;
                Some(conn)
            } else {
                state.idle.push_back(Idle::new(conn));
                None
            }
        };
        tracing::debug!(
            datasource = %self.inner.name,
            discarded = discarded.is_some(),
            "Released connection"
        );
        drop(discarded);
        self.inner.available.notify_one();
    }

    /// Open connections until the pool holds `minIdle` idle connections,
    /// never exceeding `maxActive`.
    pub async fn fill_min_idle(&self) -> Result<usize> {
        let mut opened = 0;
        loop {
            {
                let mut state = self.inner.state.lock();
                if state.closed
                    || state.idle.len() + state.opening >= state.settings.min_idle
                    || !state.has_capacity()
                {
                    break;
                }
                state.opening += 1;
            }
            let slot = OpeningSlot::new(self);
            let conn = self.connect().await?;
            let discard = slot.complete(|state| {
                if state.closed {
                    state.destroyed += 1;
                    Some(conn)
                } else {
                    state.idle.push_back(Idle::new(conn));
                    None
                }
            });
            if discard.is_some() {
                break;
            }
            opened += 1;
            self.inner.available.notify_one();
        }
        Ok(opened)
    }

    // -- live tuning --------------------------------------------------------

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> PoolSettings {
        self.inner.state.lock().settings
    }

    /// Change `maxActive`, returning the previous value.
    pub fn set_max_active(&self, max_active: usize) -> Result<usize> {
        let (previous, removed) = self.update(|settings| {
            let previous = settings.max_active;
            settings.max_active = max_active;
            previous
        })?;
        drop(removed);
        if max_active > previous {
            self.inner.available.notify_waiters();
        }
        Ok(previous)
    }

    /// Change `maxWait`, returning the previous value. Applies to the next acquire.
    pub fn set_max_wait(&self, max_wait: Duration) -> Result<Duration> {
        let (previous, _) = self.update(|settings| {
            std::mem::replace(&mut settings.max_wait, max_wait)
        })?;
        Ok(previous)
    }

    /// Change `maxIdle`, returning the previous value. Surplus idle connections close immediately.
    pub fn set_max_idle(&self, max_idle: usize) -> Result<usize> {
        let (previous, removed) =
            self.update(|settings| std::mem::replace(&mut settings.max_idle, max_idle))?;
        drop(removed);
        Ok(previous)
    }

    /// Change `minIdle`, returning the previous value. Takes effect at the next eviction run.
    pub fn set_min_idle(&self, min_idle: usize) -> Result<usize> {
        let (previous, _) =
            self.update(|settings| std::mem::replace(&mut settings.min_idle, min_idle))?;
        Ok(previous)
    }

    /// Apply `change` to a copy of the settings, validate, commit, and trim.
    fn update<T>(&self, change: impl FnOnce(&mut PoolSettings) -> T) -> Result<(T, Vec<Idle>)> {
        let mut state = self.inner.state.lock();
        let mut settings = state.settings;
        let previous = change(&mut settings);
        settings.validate(&self.inner.name)?;
        state.settings = settings;
        let removed = state.trim();
        Ok((previous, removed))
    }

    // -- maintenance --------------------------------------------------------

    /// Close idle connections older than `minEvictableIdleTime`, then restore `minIdle`.
    ///
    /// Returns how many connections were evicted.
    pub async fn evict(&self) -> Result<usize> {
        let evicted: Vec<Idle> = {
            let mut state = self.inner.state.lock();
            let threshold = state.settings.min_evictable_idle;
            let (stale, fresh): (VecDeque<Idle>, VecDeque<Idle>) = state
                .idle
                .drain(..)
                .partition(|entry| entry.since.elapsed() >= threshold);
            state.idle = fresh;
            state.destroyed += stale.len() as u64;
            stale.into_iter().collect()
        };
        let count = evicted.len();
        drop(evicted);
        if count > 0 {
            tracing::debug!(datasource = %self.inner.name, count, "Evicted idle connections");
        }
        self.fill_min_idle().await?;
        Ok(count)
    }

    /// Close every idle connection. Returns how many were closed.
    pub fn clear(&self) -> usize {
        let drained: Vec<Idle> = {
            let mut state = self.inner.state.lock();
            let drained: Vec<Idle> = state.idle.drain(..).collect();
            state.destroyed += drained.len() as u64;
            drained
        };
        let count = drained.len();
        drop(drained);
        self.inner.available.notify_waiters();
        count
    }

    /// Stop handing out connections. Waiters keep waiting until `resume` or their deadline.
    pub fn suspend(&self) {
        self.inner.state.lock().suspended = true;
    }

    /// Allow connections to be handed out again.
    pub fn resume(&self) {
        self.inner.state.lock().suspended = false;
        self.inner.available.notify_waiters();
    }

    /// Whether hand-out is suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspended
    }

    /// Close the pool.
    ///
    /// Idle connections close immediately; connections still checked out are
    /// discarded when their guard drops instead of being pooled. Waiters fail
    /// with [`DataSourceError::PoolClosed`]. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let drained: Vec<Idle> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            let drained: Vec<Idle> = state.idle.drain(..).collect();
            state.destroyed += drained.len() as u64;
            drained
        };
        drop(drained);
        self.inner.evictor.cancel();
        self.inner.available.notify_waiters();
        true
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            total: state.total(),
            waiting: self.inner.waiting.load(Ordering::Acquire),
            max_active: state.settings.max_active,
            max_wait: state.settings.max_wait,
            max_idle: state.settings.max_idle,
            min_idle: state.settings.min_idle,
            created: state.created,
            destroyed: state.destroyed,
            total_acquisitions: state.total_acquisitions,
            suspended: state.suspended,
        }
    }

    /// Spawn the background evictor when `timeBetweenEvictionRunsMillis` is set.
    ///
    /// The task holds only a weak reference and stops on [`close`](Self::close).
    pub fn start_evictor(&self) {
        let interval = self.inner.state.lock().settings.eviction_interval;
        if interval.is_zero() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let cancel = self.inner.evictor.clone();
        let name = self.inner.name.clone();

        drop(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = cancel.cancelled() => break,
                }
                let Some(inner) = weak.upgrade() else { break };
                let pool = ConnectionPool { inner };
                if let Err(error) = pool.evict().await {
                    tracing::warn!(datasource = %name, %error, "Background eviction failed");
                }
            }
            tracing::trace!(datasource = %name, "Evictor stopped");
        }));
    }
}

/// Keeps the waiter count accurate even when the acquiring future is dropped.
struct Waiter<'a>(&'a AtomicUsize);

impl<'a> Waiter<'a> {
    fn register(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An `opening` reservation taken under the state lock.
///
/// Released on drop when the connect fails or the acquiring future is
/// cancelled; converted in place by [`complete`](Self::complete) on success.
struct OpeningSlot<'a> {
    pool: &'a ConnectionPool,
    done: bool,
}

impl<'a> OpeningSlot<'a> {
    fn new(pool: &'a ConnectionPool) -> Self {
        Self { pool, done: false }
    }

    /// Convert the reservation under one lock so `total()` never over-counts.
    fn complete<T>(mut self, commit: impl FnOnce(&mut PoolState) -> T) -> T {
        self.done = true;
        let mut state = self.pool.inner.state.lock();
        state.opening -= 1;
        state.created += 1;
        commit(&mut *state)
    }
}

impl Drop for OpeningSlot<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.pool.inner.state.lock().opening -= 1;
        self.pool.inner.available.notify_one();
    }
}

// ---------------------------------------------------------------------------
// PooledConnection
// ---------------------------------------------------------------------------

/// A connection checked out of a [`ConnectionPool`].
///
/// Dropping the guard returns the connection to its pool.
pub struct PooledConnection {
    conn: Box<dyn Connection>,
    pool: ConnectionPool,
    broken: bool,
    acquired_at: Instant,
}

impl PooledConnection {
    fn new(conn: Box<dyn Connection>, pool: ConnectionPool) -> Self {
        Self {
            conn,
            pool,
            broken: false,
            acquired_at: Instant::now(),
        }
    }

    /// Name of the owning data source.
    #[must_use]
    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    /// How long this connection has been checked out.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Execute one statement.
    ///
    /// # Errors
    /// Driver failures surface as [`DataSourceError::Connection`] with the
    /// driver error as source.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        let name = self.pool.inner.name.clone();
        self.raw()
            .execute(sql)
            .await
            .map_err(|source| DataSourceError::connection(name, source))
    }

    /// Probe the connection.
    pub async fn is_valid(&mut self) -> bool {
        self.raw().is_valid().await
    }

    /// Discard this connection instead of pooling it on return.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Access the driver connection directly.
    pub fn raw(&mut self) -> &mut dyn Connection {
        self.conn.as_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = std::mem::replace(&mut self.conn, Box::new(Released));
        self.pool.release(conn, self.broken);
    }
}

/// Stands in for the driver connection once the guard has handed it back.
struct Released;

#[async_trait]
impl Connection for Released {
    async fn execute(&mut self, _sql: &str) -> std::result::Result<u64, DriverError> {
        Err("connection already returned to the pool".into())
    }

    async fn is_valid(&mut self) -> bool {
        false
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.inner.name)
            .field("broken", &self.broken)
            .field("held_for", &self.held_for())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    fn pool_with(driver: &MockDriver, settings: PoolSettings) -> ConnectionPool {
        ConnectionPool::new(
            "test",
            Arc::new(driver.clone()),
            ConnectOptions {
                url: "mock://test".into(),
                username: None,
                password: None,
            },
            settings,
        )
        .unwrap()
    }

    fn small(max_active: usize) -> PoolSettings {
        PoolSettings {
            max_active,
            max_wait: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn acquire_and_release_reuses_connection() {
        let driver = MockDriver::new();
        let pool = pool_with(&driver, small(2));

        {
            let mut conn = pool.acquire().await.unwrap();
            conn.execute("select 1").await.unwrap();
            assert_eq!(pool.stats().active, 1);
        }
        assert_eq!(pool.stats().idle, 1);

        let _conn = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.total_acquisitions, 2);
        assert_eq!(driver.connects(), 1);
    }

    #[tokio::test]
    async fn respects_max_active() {
        let driver = MockDriver::new();
        let pool = pool_with(&driver, small(1));

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DataSourceError::PoolExhausted { max_active: 1, .. }));
    }

    #[tokio::test]
    async fn slow_connect_is_bounded_by_max_wait() {
        let driver = MockDriver::new().with_connect_delay(Duration::from_millis(600));
        let pool = pool_with(
            &driver,
            PoolSettings {
                max_active: 1,
                max_wait: Duration::from_millis(50),
                ..Default::default()
            },
        );

        let started = Instant::now();
        let err = pool.acquire().await.unwrap_err();

        assert!(matches!(err, DataSourceError::PoolExhausted { max_active: 1, .. }));
        assert!(started.elapsed() < Duration::from_millis(400));
        let stats = pool.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn released_guard_returns_its_connection() {
        let driver = MockDriver::new();
        let pool = pool_with(&driver, small(1));

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(conn.raw().execute("select 1").await.unwrap(), 1);
        drop(conn);

        let stats = pool.stats();
        assert_eq!((stats.active, stats.idle), (0, 1));
        let mut again = pool.acquire().await.unwrap();
        assert!(again.is_valid().await);
        assert_eq!(driver.connects(), 1);
    }

    #[tokio::test]
    async fn waiter_is_served_by_release() {
        let driver = MockDriver::new();
        let pool = pool_with(
            &driver,
            PoolSettings {
                max_active: 1,
                max_wait: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let held = pool.acquire().await.unwrap();
        let contender = pool.clone();
        let waiter = tokio::spawn(async move { contender.acquire().await.map(drop) });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.stats().waiting, 1);
        drop(held);

        waiter.await.unwrap().unwrap();
        assert_eq!(pool.stats().waiting, 0);
    }

    #[tokio::test]
    async fn invalid_idle_connection_is_replaced() {
        let driver = MockDriver::new();
        let pool = pool_with(&driver, small(1));

        drop(pool.acquire().await.unwrap());
        driver.set_valid(false);

        let _conn = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.destroyed, 1);
    }

    #[tokio::test]
    async fn broken_connection_is_not_pooled() {
        let driver = MockDriver::new();
        let pool = pool_with(&driver, small(2));

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().destroyed, 1);
    }

    #[tokio::test]
    async fn lowering_max_idle_trims_idle() {
        let driver = MockDriver::new();
        let pool = pool_with(&driver, small(3));

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.stats().idle, 2);

        assert_eq!(pool.set_max_idle(1).unwrap(), 8);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn raising_max_active_wakes_waiter() {
        let driver = MockDriver::new();
        let pool = pool_with(
            &driver,
            PoolSettings {
                max_active: 1,
                max_wait: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let _held = pool.acquire().await.unwrap();
        let contender = pool.clone();
        let waiter = tokio::spawn(async move { contender.acquire().await.map(drop) });
        tokio::time::sleep(Duration::from_millis(30)).await;

        pool.set_max_active(2).unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_live() {
        let pool = pool_with(&MockDriver::new(), small(2));
        assert!(pool.set_max_active(0).is_err());
        assert_eq!(pool.settings().max_active, 2);
    }

    #[tokio::test]
    async fn suspended_pool_hands_out_nothing() {
        let pool = pool_with(&MockDriver::new(), small(2));
        pool.suspend();
        assert!(matches!(
            pool.acquire().await,
            Err(DataSourceError::PoolExhausted { .. })
        ));

        pool.resume();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn evict_respects_idle_threshold_and_min_idle() {
        let driver = MockDriver::new();
        let pool = pool_with(
            &driver,
            PoolSettings {
                max_active: 4,
                min_idle: 1,
                min_evictable_idle: Duration::ZERO,
                ..Default::default()
            },
        );

        assert_eq!(pool.fill_min_idle().await.unwrap(), 1);
        let evicted = pool.evict().await.unwrap();
        assert_eq!(evicted, 1);
        // topped back up to minIdle with a fresh connection
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(driver.connects(), 2);
    }

    #[tokio::test]
    async fn clear_drops_every_idle_connection() {
        let pool = pool_with(&MockDriver::new(), small(3));
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        drop(a);
        drop(b);

        assert_eq!(pool.clear(), 2);
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn close_discards_outstanding_and_rejects_acquire() {
        let pool = pool_with(&MockDriver::new(), small(2));
        let outstanding = pool.acquire().await.unwrap();

        assert!(pool.close());
        assert!(!pool.close());
        drop(outstanding);

        assert_eq!(pool.stats().idle, 0);
        assert!(matches!(
            pool.acquire().await,
            Err(DataSourceError::PoolClosed { .. })
        ));
    }

    #[tokio::test]
    async fn connect_failure_releases_reservation() {
        let driver = MockDriver::new();
        driver.fail_connects(true);
        let pool = pool_with(&driver, small(1));

        assert!(matches!(
            pool.acquire().await,
            Err(DataSourceError::Connection { .. })
        ));
        assert_eq!(pool.stats().total, 0);

        driver.fail_connects(false);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn background_evictor_runs_until_close() {
        let driver = MockDriver::new();
        let pool = pool_with(
            &driver,
            PoolSettings {
                max_active: 2,
                eviction_interval: Duration::from_secs(1),
                min_evictable_idle: Duration::ZERO,
                ..Default::default()
            },
        );
        drop(pool.acquire().await.unwrap());
        pool.start_evictor();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(pool.stats().idle, 0);
        assert!(pool.close());
    }
}
