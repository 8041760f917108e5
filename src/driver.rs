//! The batch driver: fan work items out to a capability and collect the results.
//!
//! ```text
//! payloads ──▶ WorkItem per entry ──▶ TaskExecutor (shared limiter) ──▶ completions
//!                                                                        │
//!                        final sink ◀── CheckpointWriter ◀── ResultCollector
//! ```
//!
//! Completions arrive in whatever order the remote service answers; results
//! are addressed by index so the output always follows input order.

use crate::capability::RemoteCapability;
use crate::checkpoint::{CheckpointError, CheckpointWriter};
use crate::collector::{CollectError, ResultCollector};
use crate::config::BatchConfig;
use crate::executor::TaskExecutor;
use crate::limiter::ConcurrencyLimiter;
use crate::models::WorkItem;
use crate::retry::RetryPolicy;
use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Failures that stop a whole batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("cannot read work items from {path}: {reason}")]
    Source { path: PathBuf, reason: String },
    #[error("cannot write results: {0}")]
    Sink(#[from] CheckpointError),
    #[error("result bookkeeping failed: {0}")]
    Collect(#[from] CollectError),
    #[error("batch cancelled with {completed} of {total} items completed")]
    Cancelled { completed: usize, total: usize },
}

/// Summary of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_indices: Vec<usize>,
    pub partial_checkpoints: usize,
    pub final_path: PathBuf,
    pub elapsed: Duration,
}

/// Owns one capability and the settings for running it over many items.
#[derive(Debug)]
pub struct BatchDriver<C> {
    capability: C,
    limiter: ConcurrencyLimiter,
    policy: RetryPolicy,
    writer: CheckpointWriter,
    cancel: CancellationToken,
}

impl<C> BatchDriver<C>
where
    C: RemoteCapability,
    C::Output: Serialize,
{
    /// Sinks are written to `output_dir`, named after the capability.
    pub fn new(
        capability: C,
        config: &BatchConfig,
        output_dir: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Result<Self, BatchError> {
        config.validate().map_err(BatchError::InvalidConfig)?;
        let writer = CheckpointWriter::new(
            output_dir.into(),
            capability.name(),
            config.checkpoint_interval,
        );
        Ok(Self {
            limiter: ConcurrencyLimiter::new(config.concurrency),
            policy: config.retry.policy(),
            writer,
            capability,
            cancel,
        })
    }

    pub fn writer(&self) -> &CheckpointWriter {
        &self.writer
    }

    /// Process every payload; returns once each has a recorded outcome.
    #[instrument(level = "info", skip_all, fields(capability = self.capability.name(), total = payloads.len()))]
    pub async fn run(&self, payloads: Vec<String>) -> Result<BatchReport, BatchError> {
        let t0 = Instant::now();
        let total = payloads.len();
        let report_every = (total / 20).max(1);
        info!(
            concurrency = self.limiter.capacity(),
            policy = ?self.policy,
            "Starting processing of {total} entries"
        );

        let executor = TaskExecutor::new(&self.capability, &self.limiter, &self.policy, &self.cancel);
        let mut collector = ResultCollector::new(total);

        let mut pending: FuturesUnordered<_> = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| executor.execute(WorkItem::new(index, payload)))
            .collect();

        while let Some(done) = pending.next().await {
            let succeeded = done.outcome.is_success();
            collector.record(done.index, done.outcome)?;

            let resolved = collector.count_resolved();
            debug!(index = done.index, succeeded, resolved, total, "Item resolved");
            if resolved % report_every == 0 || resolved == total {
                info!(
                    resolved,
                    total,
                    completed = collector.count_completed(),
                    failed = resolved - collector.count_completed(),
                    "Processing entries"
                );
            }

            if let Err(e) = self.writer.maybe_checkpoint(&collector).await {
                warn!(error = %e, "Partial checkpoint failed; continuing");
            }
        }
        drop(pending);

        let failed_indices = collector.failed_indices();
        if self.cancel.is_cancelled() {
            let completed = collector.count_completed();
            if let Err(e) = self.writer.write_partial(&collector).await {
                error!(error = %e, "Could not save partial results after cancellation");
            }
            warn!(
                completed,
                total,
                path = %self.writer.partial_path().display(),
                "Batch cancelled; partial results saved"
            );
            return Err(BatchError::Cancelled { completed, total });
        }

        self.writer.final_checkpoint(&collector).await?;

        let elapsed = t0.elapsed();
        if !failed_indices.is_empty() {
            warn!(
                failed = failed_indices.len(),
                indices = %failed_indices.iter().take(50).join(","),
                "Some entries failed; their slots are null"
            );
        }
        info!(
            ?elapsed,
            total,
            succeeded = collector.count_completed(),
            failed = failed_indices.len(),
            "Finished processing all entries and saved final results"
        );

        Ok(BatchReport {
            total,
            succeeded: collector.count_completed(),
            failed: failed_indices.len(),
            failed_indices,
            partial_checkpoints: self.writer.partial_writes(),
            final_path: self.writer.final_path().to_path_buf(),
            elapsed,
        })
    }
}
