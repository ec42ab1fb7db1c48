//! Pool manager: the availability state machine
//!
//! Owns the session pool and the circuit breaker and mediates every unit of
//! work through them. A dedicated background task consumes the breaker's
//! event stream and is the event-driven writer of the availability state:
//!
//! - `tripped` moves the manager to `Fail`
//! - `reset` moves it to `Regenerate` while the pool is being rebuilt
//! - `ready` moves it back to `Success`
//!
//! While failed, callers of [`PoolManager::execute`] get an unavailable error
//! and, at most once per regeneration interval, one of them drives a full
//! pool rebuild.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::pool::{BreakerConfig, BreakerEvent, CallError, ConnectionPool, RateBreaker};
use crate::session::{Connector, Session, SessionError};

const DEFAULT_POOL_SIZE: i64 = 5;
const DEFAULT_REGENERATE: Duration = Duration::from_secs(3);

/// Errors surfaced to callers of [`PoolManager::execute`]. None of them are
/// fatal to the manager; the regeneration path recovers from all of them.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The pool is failed or mid-regeneration; no work was attempted
    #[error("unavailable service")]
    Unavailable,

    /// The acquired slot was a placeholder from a failed dial
    #[error("empty connection")]
    EmptyConnection,

    /// The unit of work did not complete within the configured timeout
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The unit of work's own error, propagated verbatim
    #[error(transparent)]
    Work(#[from] SessionError),
}

/// Coarse availability state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    /// Normal operation
    Success = 0,

    /// Circuit open, pool considered dead
    Fail = 1,

    /// A regeneration attempt is in flight or not yet confirmed healthy
    Regenerate = 2,
}

impl PoolState {
    /// Get a human-readable state name
    pub fn name(&self) -> &'static str {
        match self {
            PoolState::Success => "success",
            PoolState::Fail => "fail",
            PoolState::Regenerate => "regenerate",
        }
    }
}

/// Atomic cell holding the manager state
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: PoolState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> PoolState {
        match self.0.load(Ordering::SeqCst) {
            1 => PoolState::Fail,
            2 => PoolState::Regenerate,
            _ => PoolState::Success,
        }
    }

    fn store(&self, state: PoolState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Connection parameters and tuning knobs for a pool
///
/// Out-of-range values are clamped or defaulted by [`PoolOptions::normalized`]
/// at manager creation, never rejected. Immutable afterwards.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Database host to dial
    pub host: String,

    /// User for authentication
    pub user: String,

    /// Password for authentication
    pub password: String,

    /// Database name to select on each new session
    pub database: String,

    /// Pool capacity; values <= 0 fall back to 5
    pub pool_size: i64,

    /// Failure ratio in [0, 1] at which the breaker trips
    pub fail_rate: f64,

    /// Breaker sample window; raised to at least the pool capacity
    pub universe: i64,

    /// Per-call timeout; zero applies no deadline
    pub timeout: Duration,

    /// Minimum interval between regeneration attempts
    pub regenerate: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            password: String::new(),
            database: String::new(),
            pool_size: DEFAULT_POOL_SIZE,
            fail_rate: 0.5,
            universe: 0,
            timeout: Duration::ZERO,
            regenerate: DEFAULT_REGENERATE,
        }
    }
}

impl PoolOptions {
    /// Build options from a loaded configuration file or environment
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.connection.host.clone(),
            user: config.connection.user.clone(),
            password: config.connection.password.clone(),
            database: config.connection.database.clone(),
            pool_size: config.pool.pool_size,
            fail_rate: config.pool.fail_rate,
            universe: config.pool.universe,
            timeout: Duration::from_millis(config.pool.timeout_ms.max(0) as u64),
            regenerate: Duration::from_secs(config.pool.regenerate_secs.max(0) as u64),
        }
    }

    /// Apply the construction-time invariants: fail_rate clamped to [0, 1],
    /// capacity >= 1 (default 5), universe >= capacity, regeneration
    /// interval > 0 (default 3s)
    pub fn normalized(mut self) -> Self {
        self.fail_rate = self.fail_rate.clamp(0.0, 1.0);
        if self.pool_size <= 0 {
            self.pool_size = DEFAULT_POOL_SIZE;
        }
        if self.universe < self.pool_size {
            self.universe = self.pool_size;
        }
        if self.regenerate.is_zero() {
            self.regenerate = DEFAULT_REGENERATE;
        }
        self
    }

    /// Diagnostic connection URI, credentials included
    pub fn connection_uri(&self) -> String {
        format!(
            "db://{}:{}@{}/{}",
            self.user, self.password, self.host, self.database
        )
    }

    fn redacted_uri(&self) -> String {
        format!("db://{}:***@{}/{}", self.user, self.host, self.database)
    }

    fn capacity(&self) -> usize {
        self.pool_size as usize
    }
}

/// Resilient connection-pool manager
///
/// Created once via [`PoolManager::init`]; shared across tasks behind an
/// `Arc`. Concurrent `execute` callers are supported; the only blocking
/// point inside `execute` is pool acquisition.
pub struct PoolManager<C: Connector> {
    opts: PoolOptions,
    connector: Arc<C>,
    breaker: Arc<RateBreaker>,
    pool: RwLock<Arc<ConnectionPool<C::Session>>>,
    state: Arc<StateCell>,
    tripped_at: Mutex<Option<Instant>>,
    regen_tries: AtomicU64,
    fail_count: AtomicU64,
    regen_gate: Mutex<()>,
    closed: AtomicBool,
}

impl<C: Connector> PoolManager<C> {
    /// Build the manager and perform the initial, failure-tolerant pool
    /// fill. The manager is returned even when the fill left the breaker
    /// tripped; degradation is observable via [`PoolManager::state`] and the
    /// regeneration path recovers from it. Must be called from within a
    /// tokio runtime.
    pub async fn init(options: PoolOptions, connector: C) -> PoolManager<C> {
        let opts = options.normalized();
        let breaker = Arc::new(RateBreaker::new(BreakerConfig {
            fail_rate: opts.fail_rate,
            universe: opts.universe as usize,
        }));
        let state = Arc::new(StateCell::new(PoolState::Success));
        Self::spawn_listener(breaker.subscribe(), Arc::clone(&state));

        let manager = PoolManager {
            pool: RwLock::new(Arc::new(ConnectionPool::new(opts.capacity()))),
            opts,
            connector: Arc::new(connector),
            breaker,
            state,
            tripped_at: Mutex::new(None),
            regen_tries: AtomicU64::new(0),
            fail_count: AtomicU64::new(0),
            regen_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        };
        manager.initial_fill().await;
        manager
    }

    /// Current availability state
    pub fn state(&self) -> PoolState {
        self.state.load()
    }

    /// Configured pool capacity
    pub fn capacity(&self) -> usize {
        self.opts.capacity()
    }

    /// Number of sessions currently buffered in the pool
    pub async fn idle_connections(&self) -> usize {
        self.current_pool().await.occupancy().await
    }

    /// Failure ratio over the breaker's current window
    pub async fn failure_rate(&self) -> f64 {
        self.breaker.failure_rate().await
    }

    /// Dial failures tolerated by the most recent non-fail-fast fill
    pub fn fill_failures(&self) -> u64 {
        self.fail_count.load(Ordering::SeqCst)
    }

    /// Diagnostic connection URI, credentials included. Log output uses a
    /// password-redacted form instead.
    pub fn connection_uri(&self) -> String {
        self.opts.connection_uri()
    }

    /// Run one unit of work against a pooled session.
    ///
    /// While failed this triggers a (debounced) regeneration and returns an
    /// unavailable error without attempting the work; while regenerating it
    /// returns the unavailable error directly so no stale session is handed
    /// out. Otherwise the work runs under the breaker's call wrapper with the
    /// configured timeout, and the session goes back to the pool regardless
    /// of outcome. The work receives its own handle to the session, so a
    /// timed-out operation may still be running in the background; a timeout
    /// means "failed", not "stopped".
    pub async fn execute<F, Fut, T>(&self, work: F) -> Result<T, ExecuteError>
    where
        F: FnOnce(Arc<C::Session>) -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        match self.state() {
            PoolState::Fail => {
                self.regenerate().await;
                return Err(ExecuteError::Unavailable);
            }
            PoolState::Regenerate => return Err(ExecuteError::Unavailable),
            PoolState::Success => {}
        }

        let pool = self.current_pool().await;
        let slot = match pool.acquire().await {
            Some(slot) => slot,
            None => {
                // The pool was torn down underneath us
                self.breaker.record_failure().await;
                return Err(ExecuteError::EmptyConnection);
            }
        };
        let session = match slot {
            Some(session) => session,
            None => {
                // Placeholder from a failed dial; consumed, not re-buffered
                self.breaker.record_failure().await;
                return Err(ExecuteError::EmptyConnection);
            }
        };

        let result = self
            .breaker
            .call(work(Arc::clone(&session)), self.opts.timeout)
            .await;
        pool.release(Some(session)).await;

        match result {
            Ok(value) => Ok(value),
            Err(CallError::Timeout(t)) => Err(ExecuteError::Timeout(t)),
            Err(CallError::Failed(err)) => Err(ExecuteError::Work(err)),
        }
    }

    /// Tear the pool down, closing every buffered session. The manager stays
    /// failed afterwards and no further regeneration is attempted.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state.store(PoolState::Fail);
        self.current_pool().await.drain_and_close().await;
        info!("connection pool closed");
    }

    /// Rebuild the pool after sustained failure. Admission is debounced two
    /// ways: the elapsed time since the trip must reach the configured
    /// interval (an unset trip time admits immediately), and a try-lock makes
    /// concurrent triggers no-ops while one attempt is outstanding.
    async fn regenerate(&self) {
        let Ok(_gate) = self.regen_gate.try_lock() else {
            return;
        };
        if self.closed.load(Ordering::SeqCst) || self.state() != PoolState::Fail {
            return;
        }
        if !self.regen_due().await {
            return;
        }

        let attempt = self.regen_tries.fetch_add(1, Ordering::SeqCst);
        info!(attempt = attempt + 1, "regenerating connection pool");

        let fresh = Arc::new(ConnectionPool::new(self.opts.capacity()));
        let old = {
            let mut pool = self.pool.write().await;
            std::mem::replace(&mut *pool, Arc::clone(&fresh))
        };
        if attempt == 0 {
            // First attempt in this failure episode: the old sessions are
            // stale but still open, so close them. Later attempts replace a
            // pool whose sessions were already abandoned.
            old.drain_and_close().await;
        } else {
            old.retire().await;
        }
        self.clear_tripped_at().await;
        self.fail_count.store(0, Ordering::SeqCst);
        self.breaker.reset().await;

        match self.fill_pool(&fresh, true).await {
            Ok(_) => {
                self.regen_tries.store(0, Ordering::SeqCst);
                self.state.store(PoolState::Success);
                info!(capacity = self.opts.capacity(), "connection pool regenerated");
            }
            Err(err) => {
                warn!(error = %err, "pool regeneration failed");
                self.breaker.trip().await;
                self.stamp_tripped_at().await;
            }
        }
    }

    async fn initial_fill(&self) {
        let pool = self.current_pool().await;
        if let Ok(failures) = self.fill_pool(&pool, false).await {
            self.fail_count.store(failures as u64, Ordering::SeqCst);
        }

        if self.breaker.is_tripped() {
            self.stamp_tripped_at().await;
            self.state.store(PoolState::Fail);
            warn!(
                uri = %self.opts.redacted_uri(),
                "initial pool fill left the breaker tripped"
            );
        } else {
            self.state.store(PoolState::Success);
            info!(
                capacity = self.opts.capacity(),
                failures = self.fail_count.load(Ordering::SeqCst),
                "connection pool ready"
            );
        }
    }

    async fn fill_pool(
        &self,
        pool: &ConnectionPool<C::Session>,
        stop_on_first_error: bool,
    ) -> Result<usize, SessionError> {
        pool.fill(self.opts.capacity(), || self.connect(), stop_on_first_error)
            .await
    }

    /// Dial, authenticate, and scope one session, with every outcome counted
    /// by the breaker
    async fn connect(&self) -> Result<C::Session, SessionError> {
        if self.breaker.is_tripped() {
            return Err(SessionError::Unavailable);
        }
        debug!(uri = %self.opts.redacted_uri(), "dialing database");

        let opts = &self.opts;
        let connector = Arc::clone(&self.connector);
        let attempt = async move {
            let session = connector.dial(&opts.host).await?;
            session.authenticate(&opts.user, &opts.password).await?;
            session.select_database(&opts.database).await?;
            Ok(session)
        };

        match self.breaker.call(attempt, self.opts.timeout).await {
            Ok(session) => Ok(session),
            Err(CallError::Timeout(t)) => Err(SessionError::Timeout(t)),
            Err(CallError::Failed(err)) => Err(err),
        }
    }

    async fn current_pool(&self) -> Arc<ConnectionPool<C::Session>> {
        self.pool.read().await.clone()
    }

    async fn regen_due(&self) -> bool {
        match *self.tripped_at.lock().await {
            Some(at) => at.elapsed() >= self.opts.regenerate,
            None => true,
        }
    }

    /// Stamp the failure start, keeping an earlier stamp if one is set
    async fn stamp_tripped_at(&self) {
        let mut tripped_at = self.tripped_at.lock().await;
        if tripped_at.is_none() {
            *tripped_at = Some(Instant::now());
        }
    }

    async fn clear_tripped_at(&self) {
        *self.tripped_at.lock().await = None;
    }

    /// The only event-driven writer of the state cell. Runs until the
    /// breaker (and with it the event channel) is dropped.
    fn spawn_listener(mut events: broadcast::Receiver<BreakerEvent>, state: Arc<StateCell>) {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(BreakerEvent::Tripped) => {
                        warn!("breaker tripped, marking pool failed");
                        state.store(PoolState::Fail);
                    }
                    Ok(BreakerEvent::Reset) => {
                        debug!("breaker reset, pool regenerating");
                        state.store(PoolState::Regenerate);
                    }
                    Ok(BreakerEvent::Ready) => {
                        info!("breaker ready, pool back in service");
                        state.store(PoolState::Success);
                    }
                    Ok(BreakerEvent::CallFailed) => {
                        debug!("breaker recorded a failed call");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "breaker event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_defaults_when_not_positive() {
        let opts = PoolOptions {
            pool_size: 0,
            ..PoolOptions::default()
        }
        .normalized();
        assert_eq!(opts.pool_size, 5);

        let opts = PoolOptions {
            pool_size: -3,
            ..PoolOptions::default()
        }
        .normalized();
        assert_eq!(opts.pool_size, 5);

        let opts = PoolOptions {
            pool_size: 12,
            ..PoolOptions::default()
        }
        .normalized();
        assert_eq!(opts.pool_size, 12);
    }

    #[test]
    fn test_fail_rate_clamped() {
        let opts = PoolOptions {
            fail_rate: 1.7,
            ..PoolOptions::default()
        }
        .normalized();
        assert_eq!(opts.fail_rate, 1.0);

        let opts = PoolOptions {
            fail_rate: -0.2,
            ..PoolOptions::default()
        }
        .normalized();
        assert_eq!(opts.fail_rate, 0.0);
    }

    #[test]
    fn test_universe_raised_to_capacity() {
        let opts = PoolOptions {
            pool_size: 8,
            universe: 3,
            ..PoolOptions::default()
        }
        .normalized();
        assert_eq!(opts.universe, 8);

        let opts = PoolOptions {
            pool_size: 4,
            universe: 10,
            ..PoolOptions::default()
        }
        .normalized();
        assert_eq!(opts.universe, 10);
    }

    #[test]
    fn test_regenerate_interval_defaulted() {
        let opts = PoolOptions {
            regenerate: Duration::ZERO,
            ..PoolOptions::default()
        }
        .normalized();
        assert_eq!(opts.regenerate, Duration::from_secs(3));

        let opts = PoolOptions {
            regenerate: Duration::from_millis(250),
            ..PoolOptions::default()
        }
        .normalized();
        assert_eq!(opts.regenerate, Duration::from_millis(250));
    }

    #[test]
    fn test_connection_uri() {
        let opts = PoolOptions {
            host: "db.example.com:27017".to_string(),
            user: "app".to_string(),
            password: "hunter2".to_string(),
            database: "orders".to_string(),
            ..PoolOptions::default()
        };
        assert_eq!(
            opts.connection_uri(),
            "db://app:hunter2@db.example.com:27017/orders"
        );
        assert_eq!(
            opts.redacted_uri(),
            "db://app:***@db.example.com:27017/orders"
        );
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PoolState::Success.name(), "success");
        assert_eq!(PoolState::Fail.name(), "fail");
        assert_eq!(PoolState::Regenerate.name(), "regenerate");
    }
}
