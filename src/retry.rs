//! Classification-aware retry with exponential backoff.
//!
//! [`RetryPolicy`] wraps any [`RemoteCapability`] call. Each failed attempt is
//! classified (see [`ErrorClass`]); fatal errors return immediately, transient
//! ones are retried after a backoff delay.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay(k) = clamp(initial * 2^(k-1), min, max) + random_jitter(0..=jitter)
//! ```
//!
//! where `k` is the 1-based retry number. Two variants are in use:
//!
//! - **bounded**: gives up after `max_attempts` calls (search, crawl)
//! - **unbounded**: retries transient errors until cancelled (embeddings, expansion)

use crate::capability::{CapabilityError, ErrorClass, RemoteCapability, default_classifier};
use crate::models::{Attempt, AttemptOutcome, WorkItem};
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry, before clamping.
    pub initial: Duration,
    /// Lower bound on the exponential part.
    pub min: Duration,
    /// Upper bound on the exponential part.
    pub max: Duration,
    /// Upper bound on the random extra added to each delay.
    pub jitter: Duration,
}

impl Backoff {
    /// The exponential part of the delay before retry `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        let raw = self.initial.saturating_mul(1u32 << exp);
        raw.max(self.min).min(self.max)
    }

    /// Full delay before retry `retry`, jitter included.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rng().random_range(0..=jitter_ms))
    }
}

/// Everything the retry loop did for one item.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, CapabilityError>,
    pub attempts: Vec<Attempt>,
}

impl<T> Retried<T> {
    /// Number of retries, i.e. attempts after the first that were scheduled.
    pub fn retries(&self) -> usize {
        self.delays().len()
    }

    /// Backoff delays chosen, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                AttemptOutcome::TransientFailure { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }
}

/// Classification predicate plus backoff schedule plus attempt cap.
#[derive(Clone)]
pub struct RetryPolicy {
    /// `None` retries transient errors until cancelled.
    max_attempts: Option<u32>,
    backoff: Backoff,
    classify: fn(&CapabilityError) -> ErrorClass,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryPolicy {
    /// Stop after `max_attempts` calls and surface the last error as fatal.
    pub fn bounded(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            backoff,
            classify: default_classifier,
        }
    }

    /// Retry transient errors indefinitely; only cancellation ends the loop.
    pub fn unbounded(backoff: Backoff) -> Self {
        Self {
            max_attempts: None,
            backoff,
            classify: default_classifier,
        }
    }

    /// Replace the default error classification.
    pub fn with_classifier(mut self, classify: fn(&CapabilityError) -> ErrorClass) -> Self {
        self.classify = classify;
        self
    }

    /// The attempt cap, or `None` for an unbounded policy.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// The delay schedule between attempts.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Call `capability` for `item` until it succeeds, fails fatally, runs out
    /// of attempts, or `cancel` fires during a backoff wait.
    ///
    /// # Arguments
    ///
    /// * `capability` - The remote call to make, once per attempt
    /// * `item` - The work item whose payload is sent
    /// * `cancel` - Ends a pending backoff wait early
    ///
    /// # Returns
    ///
    /// The final result together with a record of every attempt. Exhaustion is
    /// logged at WARN; the caller owns the single ERROR record for the item.
    pub async fn run<C>(
        &self,
        capability: &C,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> Retried<C::Output>
    where
        C: RemoteCapability,
    {
        let total_t0 = Instant::now();
        let mut attempts = Vec::new();
        let mut attempt_number = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Retried {
                    result: Err(CapabilityError::Cancelled),
                    attempts,
                };
            }

            attempt_number += 1;
            let attempt_t0 = Instant::now();
            let err = match capability.call(&item.payload).await {
                Ok(value) => {
                    attempts.push(Attempt {
                        item_index: item.index,
                        attempt_number,
                        outcome: AttemptOutcome::Success,
                    });
                    return Retried {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => e,
            };

            let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
            let elapsed_ms_total = total_t0.elapsed().as_millis();

            if (self.classify)(&err) == ErrorClass::Fatal {
                debug!(
                    index = item.index,
                    attempt = attempt_number,
                    elapsed_ms_attempt,
                    error = %err,
                    "Fatal error; not retrying"
                );
                attempts.push(Attempt {
                    item_index: item.index,
                    attempt_number,
                    outcome: AttemptOutcome::FatalFailure {
                        error: err.to_string(),
                    },
                });
                return Retried {
                    result: Err(err),
                    attempts,
                };
            }

            if let Some(max) = self.max_attempts {
                if attempt_number >= max {
                    warn!(
                        index = item.index,
                        attempt = attempt_number,
                        max,
                        elapsed_ms_total,
                        error = %err,
                        "{} exhausted retries",
                        capability.name()
                    );
                    attempts.push(Attempt {
                        item_index: item.index,
                        attempt_number,
                        outcome: AttemptOutcome::FatalFailure {
                            error: err.to_string(),
                        },
                    });
                    return Retried {
                        result: Err(CapabilityError::Exhausted {
                            attempts: attempt_number,
                            last: Box::new(err),
                        }),
                        attempts,
                    };
                }
            }

            let delay = self.backoff.delay(attempt_number);
            warn!(
                index = item.index,
                attempt = attempt_number,
                max = ?self.max_attempts,
                elapsed_ms_attempt,
                elapsed_ms_total,
                ?delay,
                error = %err,
                "{} attempt failed; backing off",
                capability.name()
            );
            attempts.push(Attempt {
                item_index: item.index,
                attempt_number,
                outcome: AttemptOutcome::TransientFailure {
                    error: err.to_string(),
                    delay,
                },
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Retried {
                        result: Err(CapabilityError::Cancelled),
                        attempts,
                    };
                }
                _ = sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Failure, ScriptedCapability};

    fn search_backoff() -> Backoff {
        Backoff {
            initial: Duration::from_secs(1),
            min: Duration::from_secs(4),
            max: Duration::from_secs(10),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_base_delay_growth_is_clamped() {
        let b = search_backoff();
        let delays: Vec<u64> = (1..=6).map(|k| b.base_delay(k).as_secs()).collect();
        assert_eq!(delays, vec![4, 4, 4, 8, 10, 10]);
    }

    #[test]
    fn test_base_delay_huge_retry_saturates() {
        let b = search_backoff();
        assert_eq!(b.base_delay(500), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let b = Backoff {
            initial: Duration::from_secs(1),
            min: Duration::ZERO,
            max: Duration::from_secs(10),
            jitter: Duration::from_millis(1000),
        };
        for k in 1..=8 {
            let d = b.delay(k);
            assert!(d >= b.base_delay(k));
            assert!(d <= b.base_delay(k) + Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_below_cap_succeed() {
        let cap = ScriptedCapability::new().fail_first("q", 3, Failure::Transient);
        let policy = RetryPolicy::bounded(6, search_backoff());
        let item = WorkItem::new(0, "q");

        let out = policy.run(&cap, &item, &CancellationToken::new()).await;

        assert_eq!(out.result.as_ref().unwrap(), "result:q");
        assert_eq!(out.retries(), 3);
        assert_eq!(cap.calls("q"), 4);
        let delays = out.delays();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_policy_stops_at_cap() {
        let cap = ScriptedCapability::new().fail_first("q", 6, Failure::Status(503));
        let policy = RetryPolicy::bounded(6, search_backoff());
        let item = WorkItem::new(7, "q");

        let out = policy.run(&cap, &item, &CancellationToken::new()).await;

        match out.result {
            Err(CapabilityError::Exhausted { attempts, .. }) => assert_eq!(attempts, 6),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(cap.calls("q"), 6);
        assert_eq!(out.attempts.len(), 6);
        assert!(out.attempts.iter().all(|a| a.item_index == 7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_short_circuits() {
        let cap = ScriptedCapability::new().fail_always("q", Failure::Status(401));
        let policy = RetryPolicy::bounded(6, search_backoff());

        let out = policy
            .run(&cap, &WorkItem::new(0, "q"), &CancellationToken::new())
            .await;

        assert!(matches!(
            out.result,
            Err(CapabilityError::Http { status: 401, .. })
        ));
        assert_eq!(out.retries(), 0);
        assert_eq!(cap.calls("q"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_policy_keeps_going() {
        let cap = ScriptedCapability::new().fail_first("q", 12, Failure::Status(429));
        let backoff = Backoff {
            initial: Duration::from_secs(1),
            min: Duration::ZERO,
            max: Duration::from_secs(10),
            jitter: Duration::from_millis(1000),
        };
        let policy = RetryPolicy::unbounded(backoff);

        let out = policy
            .run(&cap, &WorkItem::new(0, "q"), &CancellationToken::new())
            .await;

        assert!(out.result.is_ok());
        assert_eq!(out.retries(), 12);
        assert!(
            out.delays()
                .iter()
                .all(|d| *d <= Duration::from_millis(11_000))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier() {
        fn everything_fatal(_: &CapabilityError) -> ErrorClass {
            ErrorClass::Fatal
        }
        let cap = ScriptedCapability::new().fail_first("q", 1, Failure::Transient);
        let policy = RetryPolicy::bounded(6, search_backoff()).with_classifier(everything_fatal);

        let out = policy
            .run(&cap, &WorkItem::new(0, "q"), &CancellationToken::new())
            .await;

        assert!(matches!(out.result, Err(CapabilityError::Transient(_))));
        assert_eq!(cap.calls("q"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let cap = ScriptedCapability::new().fail_always("q", Failure::Transient);
        let policy = RetryPolicy::unbounded(search_backoff());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let out = policy.run(&cap, &WorkItem::new(0, "q"), &cancel).await;

        assert!(matches!(out.result, Err(CapabilityError::Cancelled)));
        assert_eq!(cap.calls("q"), 1);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
