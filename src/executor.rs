//! Runs one work item to a terminal [`Outcome`].

use crate::capability::{CapabilityError, RemoteCapability};
use crate::limiter::ConcurrencyLimiter;
use crate::models::{Attempt, Outcome, WorkItem};
use crate::retry::RetryPolicy;
use crate::utils::truncate_for_log;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Characters of payload included in failure logs.
const PAYLOAD_PREVIEW_CHARS: usize = 20;

/// The terminal record for one item, as handed back to the driver.
#[derive(Debug)]
pub struct Executed<T> {
    pub index: usize,
    pub outcome: Outcome<T>,
    pub attempts: Vec<Attempt>,
}

/// Borrows the shared pieces of a batch; one instance serves every item.
#[derive(Debug)]
pub struct TaskExecutor<'a, C> {
    capability: &'a C,
    limiter: &'a ConcurrencyLimiter,
    policy: &'a RetryPolicy,
    cancel: &'a CancellationToken,
}

impl<'a, C> TaskExecutor<'a, C>
where
    C: RemoteCapability,
{
    pub fn new(
        capability: &'a C,
        limiter: &'a ConcurrencyLimiter,
        policy: &'a RetryPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            capability,
            limiter,
            policy,
            cancel,
        }
    }

    /// Acquire a slot, run the retry policy, and turn whatever happens into an
    /// [`Outcome`].
    ///
    /// Never fails. Each failed item produces exactly one ERROR record here;
    /// items dropped by cancellation are only logged at DEBUG.
    pub async fn execute(&self, item: WorkItem) -> Executed<C::Output> {
        let (result, attempts) = match self.limiter.acquire(self.cancel).await {
            Ok(_permit) => {
                let retried = self.policy.run(self.capability, &item, self.cancel).await;
                (retried.result, retried.attempts)
            }
            Err(e) => (Err(e), Vec::new()),
        };

        let outcome = match result {
            Ok(value) => {
                debug!(index = item.index, attempts = attempts.len(), "Item succeeded");
                Outcome::Success(value)
            }
            Err(CapabilityError::Cancelled) => {
                debug!(index = item.index, attempts = attempts.len(), "Item cancelled");
                Outcome::Failed(CapabilityError::Cancelled)
            }
            Err(e) => {
                error!(
                    index = item.index,
                    capability = self.capability.name(),
                    payload = %truncate_for_log(&item.payload, PAYLOAD_PREVIEW_CHARS),
                    attempts = attempts.len(),
                    error = %e,
                    "Error processing entry"
                );
                Outcome::Failed(e)
            }
        };

        Executed {
            index: item.index,
            outcome,
            attempts,
        }
    }
}
