//! Example demonstrating pool manager usage
//!
//! This example shows how to:
//! 1. Configure the pool and circuit breaker thresholds
//! 2. Plug in a connector for the backing database
//! 3. Run units of work with automatic circuit breaking
//! 4. Watch the manager trip, gate callers, and regenerate

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbpool::{Connector, PoolManager, PoolOptions, Session, SessionError};
use tracing::{info, warn};

/// Stand-in for a real database backend that can be taken down
struct Backend {
    up: AtomicBool,
    dials: AtomicUsize,
}

struct DemoSession {
    backend: Arc<Backend>,
}

impl DemoSession {
    /// The kind of operation a caller would run through `execute`
    async fn fetch(&self, key: usize) -> Result<String, SessionError> {
        if !self.backend.up.load(Ordering::SeqCst) {
            return Err(SessionError::Operation(format!(
                "backend unreachable while fetching key {key}"
            )));
        }
        Ok(format!("value-{key}"))
    }
}

#[async_trait]
impl Session for DemoSession {
    async fn authenticate(&self, _user: &str, _password: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn select_database(&self, _name: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn close(&self) {}
}

struct DemoConnector {
    backend: Arc<Backend>,
}

#[async_trait]
impl Connector for DemoConnector {
    type Session = DemoSession;

    async fn dial(&self, host: &str) -> Result<DemoSession, SessionError> {
        self.backend.dials.fetch_add(1, Ordering::SeqCst);
        if !self.backend.up.load(Ordering::SeqCst) {
            return Err(SessionError::Dial {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(DemoSession {
            backend: Arc::clone(&self.backend),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let backend = Arc::new(Backend {
        up: AtomicBool::new(true),
        dials: AtomicUsize::new(0),
    });

    let options = PoolOptions {
        host: "db-1.example.com:27017".to_string(),
        user: "demo".to_string(),
        password: "demo-pass".to_string(),
        database: "inventory".to_string(),
        pool_size: 4,
        fail_rate: 0.25,
        universe: 4,
        timeout: Duration::from_secs(1),
        regenerate: Duration::from_millis(500),
    };

    let manager = PoolManager::init(
        options,
        DemoConnector {
            backend: Arc::clone(&backend),
        },
    )
    .await;

    info!(uri = %manager.connection_uri(), "pool initialized");

    for i in 0..24 {
        // Take the backend down mid-run and bring it back a little later
        if i == 8 {
            warn!("--- simulating a backend outage ---");
            backend.up.store(false, Ordering::SeqCst);
        }
        if i == 14 {
            info!("--- backend is back ---");
            backend.up.store(true, Ordering::SeqCst);
        }

        match manager
            .execute(|session| async move { session.fetch(i).await })
            .await
        {
            Ok(value) => info!(request = i + 1, %value, "request succeeded"),
            Err(err) => warn!(request = i + 1, error = %err, state = manager.state().name(), "request failed"),
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    // Print statistics
    println!("\n=== FINAL STATISTICS ===\n");
    println!("State:            {}", manager.state().name());
    println!("Capacity:         {}", manager.capacity());
    println!("Idle connections: {}", manager.idle_connections().await);
    println!("Failure rate:     {:.2}", manager.failure_rate().await);
    println!("Total dials:      {}", backend.dials.load(Ordering::SeqCst));

    manager.close().await;

    Ok(())
}
