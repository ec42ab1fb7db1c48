//! Database session abstraction
//!
//! The pool never speaks a wire protocol itself. It depends on this narrow
//! contract: a [`Connector`] dials a host and yields a [`Session`], which can
//! authenticate, scope itself to a database, and close. Everything else the
//! concrete client offers (queries, commands, cursors) is invoked by callers
//! through the session handle they receive from the manager.

use std::time::Duration;

use async_trait::async_trait;

/// Error types for dialing and driving a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to dial {host}: {reason}")]
    Dial { host: String, reason: String },

    #[error("authentication failed for user {user}: {reason}")]
    Auth { user: String, reason: String },

    #[error("failed to select database {database}: {reason}")]
    Database { database: String, reason: String },

    #[error("operation failed: {0}")]
    Operation(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unavailable service")]
    Unavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Factory for live sessions. Implementations must fail fast with a typed
/// error on a bad target and must never panic on dial failure.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The session handle this connector produces
    type Session: Session;

    /// Open one live session against `host`
    async fn dial(&self, host: &str) -> Result<Self::Session, SessionError>;
}

/// One live session against the backing database
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Authenticate the session
    async fn authenticate(&self, user: &str, password: &str) -> Result<(), SessionError>;

    /// Scope the session to a named database
    async fn select_database(&self, name: &str) -> Result<(), SessionError>;

    /// Close the underlying session. Idempotent.
    async fn close(&self);
}
