//! Shared helpers for the integration tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// Route bridge logs to the test output. Filtered by `FERRY_LOG`, off by default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("FERRY_LOG").unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Records the order in which tracked values are dropped.
#[derive(Clone, Default)]
pub struct DropLog {
    order: Arc<Mutex<Vec<u32>>>,
}

impl DropLog {
    pub fn new() -> DropLog {
        DropLog::default()
    }

    pub fn track(&self, id: u32) -> Tracked {
        Tracked {
            id,
            log: self.clone(),
        }
    }

    pub fn order(&self) -> Vec<u32> {
        self.order.lock().clone()
    }

    pub fn count(&self, id: u32) -> usize {
        self.order.lock().iter().filter(|&&dropped| dropped == id).count()
    }

    pub fn position(&self, id: u32) -> Option<usize> {
        self.order.lock().iter().position(|&dropped| dropped == id)
    }
}

/// A value that reports its own drop to a [`DropLog`].
pub struct Tracked {
    pub id: u32,
    log: DropLog,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.log.order.lock().push(self.id);
    }
}

/// Counts drops without recording order, cheap enough for stress tests.
#[derive(Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> Counted {
        Counted(self.0.clone())
    }
}

pub struct Counted(Arc<AtomicUsize>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
