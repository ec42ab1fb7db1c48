//! dbpool - Resilient database connection pooling with circuit breaking

pub mod config;
pub mod manager;
pub mod pool;
pub mod session;

pub use config::Config;
pub use manager::{ExecuteError, PoolManager, PoolOptions, PoolState};
pub use session::{Connector, Session, SessionError};
