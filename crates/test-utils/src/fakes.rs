use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use stardag::warehouse::{Connector, Rows, Warehouse, WarehouseError};

/// A connector that refuses the first `failures` connects with a
/// connection error, then delegates to `inner`.
#[derive(Debug)]
pub struct FlakyConnector<C> {
    inner: C,
    failures: usize,
    attempts: Arc<AtomicUsize>,
}

impl<C: Connector> FlakyConnector<C> {
    pub fn new(inner: C, failures: usize) -> Self {
        Self {
            inner,
            failures,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of connect attempts, usable after the connector has
    /// moved into a pool.
    pub fn attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }
}

impl<C: Connector> Connector for FlakyConnector<C> {
    fn connect(&self) -> Result<Box<dyn Warehouse>, WarehouseError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(WarehouseError::Connection(format!(
                "simulated connection refusal #{}",
                n + 1
            )));
        }
        self.inner.connect()
    }
}

/// A connector whose sessions panic on every statement.
#[derive(Debug, Default)]
pub struct PanickingConnector;

struct PanickingWarehouse;

impl Warehouse for PanickingWarehouse {
    fn execute(&mut self, sql: &str) -> Result<Rows, WarehouseError> {
        panic!("warehouse exploded while running `{sql}`");
    }
}

impl Connector for PanickingConnector {
    fn connect(&self) -> Result<Box<dyn Warehouse>, WarehouseError> {
        Ok(Box::new(PanickingWarehouse))
    }
}

/// A connector that counts how many sessions it opened.
#[derive(Debug)]
pub struct CountingConnector<C> {
    inner: C,
    opened: Arc<AtomicUsize>,
}

impl<C: Connector> CountingConnector<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn opened(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opened)
    }
}

impl<C: Connector> Connector for CountingConnector<C> {
    fn connect(&self) -> Result<Box<dyn Warehouse>, WarehouseError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.connect()
    }
}

/// What a [`RecordingConnector`] saw: statement start/end events in order,
/// and the most statements that were ever running at the same time.
#[derive(Debug, Default)]
pub struct StatementLog {
    active: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<StatementEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementEvent {
    Started(String),
    Finished(String),
}

impl StatementLog {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<StatementEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Position of the first event equal to `event`.
    pub fn position(&self, event: &StatementEvent) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    fn enter(&self, sql: &str) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.push(StatementEvent::Started(sql.to_string()));
    }

    fn exit(&self, sql: &str) {
        self.push(StatementEvent::Finished(sql.to_string()));
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn push(&self, event: StatementEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// A connector whose sessions hold every statement for `delay` and record
/// it in a shared [`StatementLog`].
#[derive(Debug)]
pub struct RecordingConnector<C> {
    inner: C,
    delay: Duration,
    log: Arc<StatementLog>,
}

impl<C: Connector> RecordingConnector<C> {
    pub fn new(inner: C, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            log: Arc::new(StatementLog::default()),
        }
    }

    pub fn log(&self) -> Arc<StatementLog> {
        Arc::clone(&self.log)
    }
}

impl<C: Connector> Connector for RecordingConnector<C> {
    fn connect(&self) -> Result<Box<dyn Warehouse>, WarehouseError> {
        Ok(Box::new(RecordingWarehouse {
            inner: self.inner.connect()?,
            delay: self.delay,
            log: Arc::clone(&self.log),
        }))
    }
}

struct RecordingWarehouse {
    inner: Box<dyn Warehouse>,
    delay: Duration,
    log: Arc<StatementLog>,
}

impl Warehouse for RecordingWarehouse {
    fn execute(&mut self, sql: &str) -> Result<Rows, WarehouseError> {
        self.log.enter(sql);
        thread::sleep(self.delay);
        let result = self.inner.execute(sql);
        self.log.exit(sql);
        result
    }
}
