//! Connection pooling and circuit breaking
//!
//! This module provides:
//! - A fixed-capacity FIFO session pool with blocking acquire
//! - A rate-based circuit breaker with a state-change event stream

pub mod circuit;
pub mod connection;

pub use circuit::{BreakerConfig, BreakerEvent, CallError, RateBreaker};
pub use connection::{ConnectionPool, PoolSlot};
