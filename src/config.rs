//! Batch configuration: per-capability defaults, optional YAML overrides, CLI overrides.
//!
//! # Config File
//!
//! ```yaml
//! search:
//!   concurrency: 20
//!   checkpoint_interval: 100
//!   retry:
//!     max_attempts: 6
//!     min_ms: 4000
//! embed:
//!   concurrency: 80
//!   retry:
//!     max_attempts: null   # retry transient errors forever
//! ```
//!
//! Every key is optional; anything left out keeps the built-in default for
//! that capability.

use crate::retry::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

/// The four remote capabilities this tool can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Search,
    Embed,
    Crawl,
    Expand,
}

impl CapabilityKind {
    /// Name used for sink files and log records.
    pub fn name(self) -> &'static str {
        match self {
            CapabilityKind::Search => "search",
            CapabilityKind::Embed => "embedding",
            CapabilityKind::Crawl => "crawl",
            CapabilityKind::Expand => "expand",
        }
    }
}

/// Retry bound and backoff schedule, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryConfig {
    /// `None` retries transient errors until cancelled.
    pub max_attempts: Option<u32>,
    pub initial_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

impl RetryConfig {
    fn bounded() -> Self {
        Self {
            max_attempts: Some(6),
            initial_ms: 1_000,
            min_ms: 4_000,
            max_ms: 10_000,
            jitter_ms: 0,
        }
    }

    fn unbounded_with_jitter() -> Self {
        Self {
            max_attempts: None,
            initial_ms: 1_000,
            min_ms: 0,
            max_ms: 10_000,
            jitter_ms: 1_000,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.initial_ms),
            min: Duration::from_millis(self.min_ms),
            max: Duration::from_millis(self.max_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        match self.max_attempts {
            Some(max) => RetryPolicy::bounded(max, self.backoff()),
            None => RetryPolicy::unbounded(self.backoff()),
        }
    }
}

/// Everything a batch needs besides the capability and the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum simultaneous remote calls.
    pub concurrency: usize,
    /// Rewrite the partial sink every this many results.
    pub checkpoint_interval: usize,
    pub retry: RetryConfig,
}

impl BatchConfig {
    /// Built-in defaults for `kind`.
    pub fn defaults_for(kind: CapabilityKind) -> Self {
        match kind {
            CapabilityKind::Search => Self {
                concurrency: 20,
                checkpoint_interval: 100,
                retry: RetryConfig::bounded(),
            },
            CapabilityKind::Embed => Self {
                concurrency: 80,
                checkpoint_interval: 1000,
                retry: RetryConfig::unbounded_with_jitter(),
            },
            CapabilityKind::Crawl => Self {
                concurrency: 10,
                checkpoint_interval: 100,
                retry: RetryConfig::bounded(),
            },
            CapabilityKind::Expand => Self {
                concurrency: 300,
                checkpoint_interval: 100,
                retry: RetryConfig::unbounded_with_jitter(),
            },
        }
    }

    /// Apply every override that is set.
    pub fn apply(&mut self, overrides: &BatchOverrides) {
        if let Some(v) = overrides.concurrency {
            self.concurrency = v;
        }
        if let Some(v) = overrides.checkpoint_interval {
            self.checkpoint_interval = v;
        }
        if let Some(retry) = &overrides.retry {
            if let Some(v) = retry.max_attempts {
                self.retry.max_attempts = v;
            }
            if let Some(v) = retry.initial_ms {
                self.retry.initial_ms = v;
            }
            if let Some(v) = retry.min_ms {
                self.retry.min_ms = v;
            }
            if let Some(v) = retry.max_ms {
                self.retry.max_ms = v;
            }
            if let Some(v) = retry.jitter_ms {
                self.retry.jitter_ms = v;
            }
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".into());
        }
        if self.checkpoint_interval == 0 {
            return Err("checkpoint_interval must be at least 1".into());
        }
        if self.retry.max_attempts == Some(0) {
            return Err("retry.max_attempts must be at least 1".into());
        }
        if self.retry.min_ms > self.retry.max_ms {
            return Err(format!(
                "retry.min_ms ({}) exceeds retry.max_ms ({})",
                self.retry.min_ms, self.retry.max_ms
            ));
        }
        Ok(())
    }
}

/// Partial settings, from the YAML file or the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchOverrides {
    pub concurrency: Option<usize>,
    pub checkpoint_interval: Option<usize>,
    pub retry: Option<RetryOverrides>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverrides {
    /// `Some(None)` (YAML `null`) switches to unbounded retry.
    #[serde(default, deserialize_with = "double_option")]
    pub max_attempts: Option<Option<u32>>,
    pub initial_ms: Option<u64>,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
}

fn double_option<'de, D>(de: D) -> Result<Option<Option<u32>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<u32>::deserialize(de).map(Some)
}

/// Contents of the `--config` YAML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub search: BatchOverrides,
    #[serde(default)]
    pub embed: BatchOverrides,
    #[serde(default)]
    pub crawl: BatchOverrides,
    #[serde(default)]
    pub expand: BatchOverrides,
}

impl ConfigFile {
    pub fn for_kind(&self, kind: CapabilityKind) -> &BatchOverrides {
        match kind {
            CapabilityKind::Search => &self.search,
            CapabilityKind::Embed => &self.embed,
            CapabilityKind::Crawl => &self.crawl,
            CapabilityKind::Expand => &self.expand,
        }
    }
}

/// Read and parse a YAML config file.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_config_file(path: impl AsRef<Path>) -> Result<ConfigFile, Box<dyn Error>> {
    let raw = tokio::fs::read_to_string(path.as_ref()).await?;
    let parsed: ConfigFile = serde_yaml::from_str(&raw)?;
    info!("Loaded configuration");
    Ok(parsed)
}

/// Defaults, then file, then command line.
pub fn resolve(
    kind: CapabilityKind,
    file: Option<&ConfigFile>,
    cli: &BatchOverrides,
) -> Result<BatchConfig, String> {
    let mut config = BatchConfig::defaults_for(kind);
    if let Some(file) = file {
        config.apply(file.for_kind(kind));
    }
    config.apply(cli);
    config.validate()?;
    Ok(config)
}
