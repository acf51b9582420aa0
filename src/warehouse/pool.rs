// src/warehouse/pool.rs

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::{Connector, Rows, Warehouse, WarehouseError};

/// Bounded pool of warehouse sessions.
///
/// At most `size` sessions are checked out at once. Dropping a
/// [`PooledConnection`] always frees its slot; the session itself goes back
/// to the idle list unless it was marked broken or dropped while unwinding
/// from a panic.
pub struct WarehousePool {
    connector: Arc<dyn Connector>,
    idle: Mutex<Vec<Box<dyn Warehouse>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl fmt::Debug for WarehousePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehousePool")
            .field("connector", &self.connector)
            .field("size", &self.size)
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl WarehousePool {
    pub fn new(connector: Arc<dyn Connector>, size: usize) -> Arc<Self> {
        let size = size.max(1);
        Arc::new(Self {
            connector,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of sessions that could be checked out right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of open sessions waiting in the idle list.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait for a free slot, then reuse an idle session or open a new one.
    pub async fn checkout(self: &Arc<Self>) -> Result<PooledConnection, WarehouseError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| WarehouseError::Connection("warehouse pool is closed".to_string()))?;

        let reused = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(size = self.size, "opening new warehouse session");
                self.connector.connect()?
            }
        };

        Ok(PooledConnection {
            conn,
            pool: Arc::clone(self),
            broken: false,
            _permit: permit,
        })
    }

    fn release(&self, conn: Box<dyn Warehouse>) {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(conn);
    }
}

/// A session checked out of a [`WarehousePool`].
pub struct PooledConnection {
    conn: Box<dyn Warehouse>,
    pool: Arc<WarehousePool>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Drop the session instead of returning it to the pool on release.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection {
    type Target = dyn Warehouse;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = std::mem::replace(&mut self.conn, Box::new(Released));
        if self.broken || std::thread::panicking() {
            debug!("discarding broken warehouse session");
        } else {
            self.pool.release(conn);
        }
    }
}

/// Placeholder left behind in a guard after its session went back.
struct Released;

impl Warehouse for Released {
    fn execute(&mut self, _sql: &str) -> Result<Rows, WarehouseError> {
        Err(WarehouseError::Connection(
            "session already released to the pool".to_string(),
        ))
    }
}
