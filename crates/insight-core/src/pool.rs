//! Bounded pool of read-only connections to the analytical store.
//!
//! Admission control is the gateway's backpressure mechanism: a request
//! beyond capacity waits up to a bounded interval for a free connection
//! and then fails fast with [`GatewayError::PoolExhausted`] instead of
//! queuing unboundedly.

use crate::{GatewayError, Result};
use rusqlite::{Connection, OpenFlags};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Pool limits, fixed at startup.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Path to the analytical SQLite database.
    pub path: PathBuf,
    /// Number of pooled connections.
    pub size: usize,
    /// Bounded wait for a free connection.
    pub acquire_timeout: Duration,
}

#[derive(Debug)]
struct PoolInner {
    connections: Mutex<Vec<Connection>>,
    semaphore: Arc<Semaphore>,
    acquire_timeout: Duration,
}

/// Fixed-size pool of read-only SQLite connections.
#[derive(Clone)]
pub struct ReadPool {
    inner: Arc<PoolInner>,
}

impl ReadPool {
    /// Open `config.size` read-only connections to the store.
    pub fn open(config: &PoolConfig) -> Result<Self> {
        let mut connections = Vec::with_capacity(config.size);
        for _ in 0..config.size {
            connections.push(open_read_only(&config.path)?);
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                connections: Mutex::new(connections),
                semaphore: Arc::new(Semaphore::new(config.size)),
                acquire_timeout: config.acquire_timeout,
            }),
        })
    }

    /// Acquire a connection, waiting at most the configured interval.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = tokio::time::timeout(
            self.inner.acquire_timeout,
            self.inner.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| GatewayError::PoolExhausted)?
        .expect("pool semaphore is never closed");

        let conn = self
            .inner
            .connections
            .lock()
            .unwrap()
            .pop()
            .expect("permit guarantees a free connection");

        Ok(PooledConnection {
            conn: Some(conn),
            inner: self.inner.clone(),
            _permit: permit,
        })
    }
}

fn open_read_only(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    // query_only also covers writes through ATTACHed databases.
    conn.pragma_update(None, "query_only", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// A checked-out connection. Returns to the free list on drop, on every
/// exit path.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    inner: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.inner.connections.lock().unwrap().push(conn);
        }
    }
}
