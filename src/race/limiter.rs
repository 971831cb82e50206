//! Admission gate capping how many operations execute at once

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// Counting admission gate backed by a FIFO semaphore
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot; the slot is released when this is dropped
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting at most `capacity` holders at a time
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            warn!("Concurrency cap of 0 would admit nothing, using 1");
            1
        } else {
            capacity.min(Semaphore::MAX_PERMITS)
        };

        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    ///
    /// Returns `None` only once the limiter has been closed.
    pub async fn acquire(&self) -> Option<Admission> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .ok()
            .map(|permit| Admission { _permit: permit })
    }

    /// Maximum number of simultaneous holders
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots free right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Stop admitting; pending and future `acquire` calls return `None`
    pub fn close(&self) {
        self.semaphore.close();
    }
}
