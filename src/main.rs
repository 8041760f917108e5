//! # news_fanout
//!
//! Runs a large, fixed set of news-summary records through a rate-limited,
//! occasionally failing remote service (web search, embeddings, page crawling,
//! or LLM expansion) and collects exactly one result per record.
//!
//! ## Usage
//!
//! ```sh
//! news_fanout prepare -i summary.json -o extracted-comments.json
//! news_fanout search  -i extracted-comments.json -o ./out
//! news_fanout embed   -i extracted-comments.json -o ./out --concurrency 80
//! ```
//!
//! ## Architecture
//!
//! 1. **Source**: load the ordered payload list (one per record)
//! 2. **Dispatch**: one task per record, at most `concurrency` calls in flight
//! 3. **Retry**: transient failures back off exponentially; fatal ones don't
//! 4. **Collect**: results land in their record's slot, whatever the completion order
//! 5. **Checkpoint**: partial results saved every `checkpoint_interval` results,
//!    final results written once at the end
//!
//! Ctrl-C cancels the batch: no new calls start, backoff waits end early, and
//! whatever finished is saved to the partial results file.

use clap::Parser;
use serde::Serialize;
use std::error::Error;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod capability;
mod checkpoint;
mod cli;
mod collector;
mod config;
mod driver;
mod executor;
mod limiter;
mod models;
mod providers;
mod retry;
mod source;
#[cfg(test)]
mod testing;
mod utils;

use capability::RemoteCapability;
use cli::{BatchArgs, Cli, Command};
use config::{CapabilityKind, ConfigFile, load_config_file};
use driver::{BatchDriver, BatchError, BatchReport};
use providers::crawl::JinaReader;
use providers::embed::OpenAiEmbedder;
use providers::expand::OpenAiExpander;
use providers::search::BraveSearch;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!("news_fanout starting up");

    let args = Cli::parse();
    debug!(config = ?args.config, "Parsed CLI arguments");

    let config_file = match &args.config {
        Some(path) => Some(load_config_file(path).await?),
        None => None,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling batch");
            on_signal.cancel();
        }
    });

    let file = config_file.as_ref();
    let report = match args.command {
        Command::Prepare { input, output } => {
            let count = source::prepare_summaries(&input, &output).await?;
            info!(count, output = %output.display(), "Prepared records");
            None
        }
        Command::Search {
            batch,
            brave_api_key,
            endpoint,
        } => {
            let api_key = brave_api_key.ok_or(BatchError::MissingCredential("BRAVE_API_KEY"))?;
            let endpoint = providers::parse_endpoint(&endpoint).map_err(BatchError::InvalidConfig)?;
            let client = providers::build_client(Duration::from_secs(batch.timeout_secs))?;
            let capability = BraveSearch::new(client, api_key, endpoint);
            Some(run_batch(capability, CapabilityKind::Search, &batch, "entry", file, cancel).await?)
        }
        Command::Embed {
            batch,
            openai_api_key,
            endpoint,
            model,
            dimensions,
        } => {
            let api_key = openai_api_key.ok_or(BatchError::MissingCredential("OPENAI_API_KEY"))?;
            let endpoint = providers::parse_endpoint(&endpoint).map_err(BatchError::InvalidConfig)?;
            let client = providers::build_client(Duration::from_secs(batch.timeout_secs))?;
            let mut capability = OpenAiEmbedder::new(client, api_key, endpoint, model);
            if dimensions.is_some() {
                capability = capability.with_dimensions(dimensions);
            }
            Some(run_batch(capability, CapabilityKind::Embed, &batch, "entry", file, cancel).await?)
        }
        Command::Crawl { batch, endpoint } => {
            let endpoint = providers::parse_endpoint(&endpoint).map_err(BatchError::InvalidConfig)?;
            let client = providers::build_client(Duration::from_secs(batch.timeout_secs))?;
            let capability = JinaReader::new(client, endpoint);
            Some(run_batch(capability, CapabilityKind::Crawl, &batch, "url", file, cancel).await?)
        }
        Command::Expand {
            batch,
            openai_api_key,
            endpoint,
            model,
        } => {
            let api_key = openai_api_key.ok_or(BatchError::MissingCredential("OPENAI_API_KEY"))?;
            let endpoint = providers::parse_endpoint(&endpoint).map_err(BatchError::InvalidConfig)?;
            let client = providers::build_client(Duration::from_secs(batch.timeout_secs))?;
            let capability = OpenAiExpander::new(client, api_key, endpoint, model);
            Some(run_batch(capability, CapabilityKind::Expand, &batch, "entry", file, cancel).await?)
        }
    };

    let elapsed = start_time.elapsed();
    match report {
        Some(report) => info!(
            ?elapsed,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            path = %report.final_path.display(),
            "Execution complete"
        ),
        None => info!(?elapsed, "Execution complete"),
    }

    Ok(())
}

/// Pre-flight checks, then the batch itself.
///
/// Everything that can doom the whole batch (bad config, unwritable output
/// directory, unreadable input) is checked before the first remote call.
#[instrument(level = "info", skip_all, fields(capability = kind.name()))]
async fn run_batch<C>(
    capability: C,
    kind: CapabilityKind,
    batch: &BatchArgs,
    default_field: &str,
    file: Option<&ConfigFile>,
    cancel: CancellationToken,
) -> Result<BatchReport, Box<dyn Error>>
where
    C: RemoteCapability,
    C::Output: Serialize,
{
    let config =
        config::resolve(kind, file, &batch.overrides()).map_err(BatchError::InvalidConfig)?;
    info!(
        concurrency = config.concurrency,
        checkpoint_interval = config.checkpoint_interval,
        max_attempts = ?config.retry.max_attempts,
        "Resolved batch configuration"
    );

    if let Err(e) = ensure_writable_dir(&batch.output_dir).await {
        error!(
            path = %batch.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let payloads = source::load_payloads(&batch.input, batch.field_or(default_field)).await?;
    let driver = BatchDriver::new(capability, &config, &batch.output_dir, cancel)?;
    Ok(driver.run(payloads).await?)
}
