//! Bounded FIFO session pool
//!
//! A fixed-capacity buffer of pooled sessions with blocking acquire and
//! non-blocking release. Slots are `Option<Arc<S>>`: a `None` slot is the
//! placeholder left behind by a dial that failed during a tolerant fill, so
//! the pool keeps its shape even when some connections never came up.
//!
//! Availability is tracked with a semaphore whose permit count always equals
//! the number of buffered slots; `acquire` parks on the semaphore exactly
//! when the buffer is empty, and `release` never blocks because only
//! previously acquired slots can come back.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::session::{Session, SessionError};

/// A pooled slot: a live session, or the placeholder for a failed dial
pub type PoolSlot<S> = Option<Arc<S>>;

/// Fixed-capacity FIFO buffer of sessions
pub struct ConnectionPool<S> {
    slots: Mutex<VecDeque<PoolSlot<S>>>,
    available: Semaphore,
    capacity: usize,
    closed: AtomicBool,
}

impl<S: Session> ConnectionPool<S> {
    /// Create an empty pool; populate it with [`ConnectionPool::fill`]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Semaphore::new(0),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of currently buffered slots
    pub async fn occupancy(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Whether the pool has been drained or retired
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Take the oldest buffered slot, blocking until one is available.
    /// Returns `None` once the pool has been marked unusable.
    pub async fn acquire(&self) -> Option<PoolSlot<S>> {
        let permit = self.available.acquire().await.ok()?;
        permit.forget();
        self.slots.lock().await.pop_front()
    }

    /// Return a previously acquired slot to the buffer. Never blocks: the
    /// capacity invariant (outstanding + buffered <= capacity) guarantees
    /// room. A release into a closed pool closes the session instead.
    pub async fn release(&self, slot: PoolSlot<S>) {
        {
            let mut slots = self.slots.lock().await;
            if !self.is_closed() && slots.len() < self.capacity {
                slots.push_back(slot);
                self.available.add_permits(1);
                return;
            }
        }
        if let Some(session) = slot {
            session.close().await;
        }
    }

    /// Sequentially create up to `count` sessions. With `stop_on_first_error`
    /// the first factory error aborts the fill and is returned (regeneration
    /// must fail fast); otherwise errors leave a `None` placeholder in the
    /// slot and the accumulated failure count is returned (first-time
    /// creation tolerates partial failure).
    pub async fn fill<F, Fut>(
        &self,
        count: usize,
        factory: F,
        stop_on_first_error: bool,
    ) -> Result<usize, SessionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<S, SessionError>>,
    {
        let mut failures = 0usize;
        for _ in 0..count.min(self.capacity) {
            match factory().await {
                Ok(session) => self.push_slot(Some(Arc::new(session))).await,
                Err(err) => {
                    if stop_on_first_error {
                        return Err(err);
                    }
                    warn!(error = %err, "connection attempt failed during pool fill");
                    failures += 1;
                    self.push_slot(None).await;
                }
            }
        }
        Ok(failures)
    }

    /// Remove every slot, close each live session, wake blocked acquirers,
    /// and mark the pool unusable
    pub async fn drain_and_close(&self) {
        let drained: Vec<PoolSlot<S>> = {
            let mut slots = self.slots.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            slots.drain(..).collect()
        };
        self.available.close();

        let mut closed = 0usize;
        for slot in drained {
            if let Some(session) = slot {
                session.close().await;
                closed += 1;
            }
        }
        debug!(closed, "drained connection pool");
    }

    /// Mark the pool unusable and wake blocked acquirers without closing the
    /// sessions it still holds. Used when a prior failed rebuild already
    /// abandoned them.
    pub async fn retire(&self) {
        {
            let mut slots = self.slots.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            slots.clear();
        }
        self.available.close();
        debug!("retired connection pool");
    }

    async fn push_slot(&self, slot: PoolSlot<S>) {
        let mut slots = self.slots.lock().await;
        if slots.len() < self.capacity {
            slots.push_back(slot);
            self.available.add_permits(1);
        }
    }
}
