//! Dispatch Limiter
//!
//! Bounds concurrent deliveries. There is no queue: when every permit is
//! taken the caller drops the message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

/// Counting gate with a fixed number of delivery slots
pub struct DispatchLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    closed: AtomicBool,
}

impl DispatchLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a slot without waiting. The slot is released when the permit is
    /// dropped.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Refuse every later `try_acquire`; outstanding permits stay valid
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of permits currently held
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Wait until every permit is back, or until `deadline` passes.
    /// Returns true when nothing is left in flight.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let Ok(all) = u32::try_from(self.capacity) else {
            return self.in_flight() == 0;
        };
        match timeout(deadline, self.semaphore.acquire_many(all)).await {
            Ok(Ok(permits)) => {
                drop(permits);
                true
            }
            _ => false,
        }
    }
}
