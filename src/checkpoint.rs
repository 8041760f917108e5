//! Durable JSON snapshots of the result set.
//!
//! Two sinks live side by side in the output directory:
//!
//! ```text
//! output_dir/
//! ├── search_results_partial.json   # rewritten every `interval` results
//! └── search_results_final.json     # written once, after the last item
//! ```
//!
//! Both hold a JSON array with one slot per input item, `null` where no
//! result exists. Every write goes to `<file>.tmp` first and is then renamed
//! over the target, so readers never see a half-written file.

use crate::collector::ResultCollector;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct CheckpointWriter {
    partial_path: PathBuf,
    final_path: PathBuf,
    interval: usize,
    /// Held for the duration of each write.
    write_lock: Mutex<()>,
    /// Completed count at the most recent partial snapshot.
    last_snapshot_at: AtomicUsize,
    partial_writes: AtomicUsize,
}

impl CheckpointWriter {
    /// Sinks named `<name>_results_partial.json` / `<name>_results_final.json` in `output_dir`.
    pub fn new(output_dir: impl AsRef<Path>, name: &str, interval: usize) -> Self {
        let dir = output_dir.as_ref();
        Self {
            partial_path: dir.join(format!("{name}_results_partial.json")),
            final_path: dir.join(format!("{name}_results_final.json")),
            interval: interval.max(1),
            write_lock: Mutex::new(()),
            last_snapshot_at: AtomicUsize::new(0),
            partial_writes: AtomicUsize::new(0),
        }
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Partial snapshots written so far.
    pub fn partial_writes(&self) -> usize {
        self.partial_writes.load(Ordering::SeqCst)
    }

    /// Snapshot to the partial sink when the completed count reaches a new
    /// multiple of the interval. Skipped once every item is resolved, since the
    /// final write supersedes it. Returns whether a snapshot was written.
    pub async fn maybe_checkpoint<T: Serialize>(
        &self,
        collector: &ResultCollector<T>,
    ) -> Result<bool, CheckpointError> {
        let completed = collector.count_completed();
        if completed == 0
            || completed % self.interval != 0
            || collector.is_fully_resolved()
            || self.last_snapshot_at.load(Ordering::SeqCst) == completed
        {
            return Ok(false);
        }

        self.write_partial(collector).await?;
        self.last_snapshot_at.store(completed, Ordering::SeqCst);
        info!(
            completed,
            resolved = collector.count_resolved(),
            total = collector.total(),
            "Saved partial results"
        );
        Ok(true)
    }

    /// Snapshot to the partial sink unconditionally (used on cancellation).
    #[instrument(level = "debug", skip_all, fields(path = %self.partial_path.display()))]
    pub async fn write_partial<T: Serialize>(
        &self,
        collector: &ResultCollector<T>,
    ) -> Result<(), CheckpointError> {
        self.publish(&self.partial_path, collector).await?;
        self.partial_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Write the authoritative result set.
    #[instrument(level = "info", skip_all, fields(path = %self.final_path.display()))]
    pub async fn final_checkpoint<T: Serialize>(
        &self,
        collector: &ResultCollector<T>,
    ) -> Result<(), CheckpointError> {
        self.publish(&self.final_path, collector).await?;
        info!(
            completed = collector.count_completed(),
            total = collector.total(),
            "Saved final results"
        );
        Ok(())
    }

    async fn publish<T: Serialize>(
        &self,
        path: &Path,
        collector: &ResultCollector<T>,
    ) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let json = collector.to_json()?;
        let tmp = temp_path_for(path);

        if let Err(source) = fs::write(&tmp, &json).await {
            warn!(path = %tmp.display(), error = %source, "Failed writing temp snapshot");
            return Err(CheckpointError::Io { path: tmp, source });
        }
        fs::rename(&tmp, path)
            .await
            .map_err(|source| CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// `<file>.tmp` next to `path`.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results.json".to_string());
    path.with_file_name(format!("{name}.tmp"))
}
