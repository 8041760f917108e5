//! Admission control for remote calls.
//!
//! A thin wrapper over [`tokio::sync::Semaphore`] whose acquisition can be
//! abandoned when the batch is cancelled. Permits are scoped: dropping the
//! returned [`SemaphorePermit`] frees the slot on every exit path.

use crate::capability::CapabilityError;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Bounds how many items may be in progress at once.
///
/// One limiter is shared by every executor of a batch; a held permit covers
/// an item's calls and the backoff waits between them.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Semaphore,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting at most `capacity` concurrent holders.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
        }
    }

    /// Wait for a free slot, or give up with [`CapabilityError::Cancelled`].
    ///
    /// Cancellation is checked first so that a cancelled batch stops admitting
    /// work even when slots are free.
    ///
    /// # Returns
    ///
    /// A permit that frees the slot when dropped.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SemaphorePermit<'_>, CapabilityError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CapabilityError::Cancelled),
            permit = self.semaphore.acquire() => {
                let permit = permit.map_err(|_| CapabilityError::Cancelled)?;
                trace!(in_flight = self.in_flight(), capacity = self.capacity, "Acquired slot");
                Ok(permit)
            }
        }
    }

    /// The configured upper bound on held slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}
