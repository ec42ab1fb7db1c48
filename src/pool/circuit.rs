//! Rate-based circuit breaker
//!
//! Tracks the outcomes of the most recent calls in a bounded sample window
//! (the "universe") and trips once the window is full and the failure ratio
//! exceeds the configured threshold. State transitions are published on a
//! broadcast channel so a single background listener can react without the
//! breaker ever blocking on it: the channel is bounded and a lagging listener
//! loses the oldest events first, in transition order.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::session::SessionError;

/// Bound on buffered, not-yet-consumed breaker events
const EVENT_BUFFER: usize = 32;

/// Breaker state-change events, in the order transitions occur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerEvent {
    /// The failure ratio reached the threshold; the breaker is open
    Tripped,

    /// Counters were cleared and the breaker re-closed; recovery is underway
    Reset,

    /// A single call was recorded as failed
    CallFailed,

    /// First success after a reset; the breaker is serving traffic again
    Ready,
}

impl BreakerEvent {
    /// Get a human-readable event name
    pub fn name(&self) -> &'static str {
        match self {
            BreakerEvent::Tripped => "tripped",
            BreakerEvent::Reset => "reset",
            BreakerEvent::CallFailed => "call-failed",
            BreakerEvent::Ready => "ready",
        }
    }
}

/// Configuration for breaker behavior
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure ratio in [0, 1] above which the breaker trips
    pub fail_rate: f64,

    /// Number of samples in the rolling window; the breaker only trips on a
    /// full window
    pub universe: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            fail_rate: 0.5,
            universe: 5,
        }
    }
}

/// Error returned by [`RateBreaker::call`]
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Failed(#[from] SessionError),
}

/// Rolling window of call outcomes plus the probation flag set by a reset
struct OutcomeWindow {
    /// Most recent outcomes, oldest first; `true` records a failure
    samples: VecDeque<bool>,

    /// Failures currently inside the window
    failures: usize,

    /// Set by `reset`; cleared by the first success (emitting `Ready`) or by
    /// a trip
    probation: bool,
}

impl OutcomeWindow {
    fn push(&mut self, failed: bool, universe: usize) {
        if self.samples.len() == universe && self.samples.pop_front() == Some(true) {
            self.failures -= 1;
        }
        self.samples.push_back(failed);
        if failed {
            self.failures += 1;
        }
    }

    fn ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.failures as f64 / self.samples.len() as f64
    }
}

/// Circuit breaker over a rolling failure-rate window
pub struct RateBreaker {
    config: BreakerConfig,
    window: Mutex<OutcomeWindow>,
    tripped: AtomicBool,
    events: broadcast::Sender<BreakerEvent>,
}

impl RateBreaker {
    /// Create a new breaker. `config.universe` must be at least 1; the pool
    /// options normalize it before construction.
    pub fn new(config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            window: Mutex::new(OutcomeWindow {
                samples: VecDeque::with_capacity(config.universe),
                failures: 0,
                probation: false,
            }),
            config,
            tripped: AtomicBool::new(false),
            events,
        }
    }

    /// Subscribe to state-change events. Intended for one long-lived listener
    /// per manager; additional receivers see the same stream.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Whether the breaker is currently open
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Failure ratio over the current window (0.0 when empty)
    pub async fn failure_rate(&self) -> f64 {
        self.window.lock().await.ratio()
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let ready = {
            let mut window = self.window.lock().await;
            window.push(false, self.config.universe);
            if window.probation {
                window.probation = false;
                true
            } else {
                false
            }
        };
        if ready {
            debug!("breaker serving traffic again after reset");
            self.emit(BreakerEvent::Ready);
        }
    }

    /// Record a failed call; trips the breaker once the full window's failure
    /// ratio exceeds the threshold
    pub async fn record_failure(&self) {
        let should_trip = {
            let mut window = self.window.lock().await;
            window.push(true, self.config.universe);
            !self.is_tripped()
                && window.samples.len() >= self.config.universe
                && window.ratio() > self.config.fail_rate
        };
        self.emit(BreakerEvent::CallFailed);
        if should_trip {
            self.trip().await;
        }
    }

    /// Open the breaker. Emits `Tripped` on the transition; a no-op when
    /// already open.
    pub async fn trip(&self) {
        if self.tripped.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut window = self.window.lock().await;
            window.probation = false;
        }
        warn!(
            fail_rate = self.config.fail_rate,
            universe = self.config.universe,
            "circuit breaker tripped"
        );
        self.emit(BreakerEvent::Tripped);
    }

    /// Re-close the breaker, clearing the window and entering probation.
    /// Emits `Reset`; the first success afterwards emits `Ready`.
    pub async fn reset(&self) {
        self.tripped.store(false, Ordering::SeqCst);
        {
            let mut window = self.window.lock().await;
            window.samples.clear();
            window.failures = 0;
            window.probation = true;
        }
        debug!("circuit breaker reset");
        self.emit(BreakerEvent::Reset);
    }

    /// Run `work` and record its outcome. A `timeout` of zero applies no
    /// deadline. When the deadline elapses the wait is abandoned and counted
    /// as a failure; the work itself is not guaranteed to have stopped.
    pub async fn call<T, Fut>(&self, work: Fut, timeout: Duration) -> Result<T, CallError>
    where
        Fut: Future<Output = Result<T, SessionError>>,
    {
        if timeout.is_zero() {
            return match work.await {
                Ok(value) => {
                    self.record_success().await;
                    Ok(value)
                }
                Err(err) => {
                    self.record_failure().await;
                    Err(CallError::Failed(err))
                }
            };
        }

        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(value)) => {
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure().await;
                Err(CallError::Failed(err))
            }
            Err(_) => {
                self.record_failure().await;
                Err(CallError::Timeout(timeout))
            }
        }
    }

    /// Send never blocks; with no receiver the event is simply dropped
    fn emit(&self, event: BreakerEvent) {
        let _ = self.events.send(event);
    }
}
