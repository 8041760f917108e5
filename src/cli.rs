//! Command-line interface definitions for news_fanout.
//!
//! Credentials are read from the environment (or the matching flag); batch
//! settings fall back to the `--config` file and then to per-capability
//! defaults.

use crate::config::{BatchOverrides, RetryOverrides};
use crate::providers::{crawl, embed, expand, search};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for news_fanout.
///
/// # Examples
///
/// ```sh
/// # Split translator annotations out of raw summaries
/// news_fanout prepare -i summary.json -o extracted-comments.json
///
/// # Web search for every summary, 20 at a time
/// BRAVE_API_KEY=... news_fanout search -i extracted-comments.json -o ./out
///
/// # Embeddings with a config file
/// OPENAI_API_KEY=... news_fanout -c fanout.yaml embed -i extracted-comments.json -o ./out
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file with per-capability batch settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split `（翻评：…）` annotations out of raw summary records
    Prepare {
        /// Raw summary records (JSON array of objects with an `entry` field)
        #[arg(short, long)]
        input: PathBuf,
        /// Where to write the cleaned records
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run a Brave web search for every record
    Search {
        #[command(flatten)]
        batch: BatchArgs,
        /// Brave Search subscription token
        #[arg(long, env = "BRAVE_API_KEY", hide_env_values = true)]
        brave_api_key: Option<String>,
        #[arg(long, default_value = search::DEFAULT_ENDPOINT)]
        endpoint: String,
    },

    /// Compute an OpenAI embedding for every record
    Embed {
        #[command(flatten)]
        batch: BatchArgs,
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: Option<String>,
        #[arg(long, default_value = embed::DEFAULT_ENDPOINT)]
        endpoint: String,
        #[arg(long, default_value = embed::DEFAULT_MODEL)]
        model: String,
        /// Expected vector length (defaults to 3072 for text-embedding-3-large)
        #[arg(long)]
        dimensions: Option<usize>,
    },

    /// Fetch page text for every URL through the Jina reader
    Crawl {
        #[command(flatten)]
        batch: BatchArgs,
        #[arg(long, default_value = crawl::DEFAULT_ENDPOINT)]
        endpoint: String,
    },

    /// Expand every summary into a longer report with an OpenAI chat model
    Expand {
        #[command(flatten)]
        batch: BatchArgs,
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: Option<String>,
        #[arg(long, default_value = expand::DEFAULT_ENDPOINT)]
        endpoint: String,
        #[arg(long, default_value = expand::DEFAULT_MODEL)]
        model: String,
    },
}

/// Options shared by every batch subcommand.
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Input JSON array (records or bare strings)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Directory for the partial and final result files
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Record field holding the payload (`entry`, or `url` for crawl)
    #[arg(long)]
    pub field: Option<String>,

    /// Maximum simultaneous remote calls
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Save partial results every N results
    #[arg(long)]
    pub checkpoint_interval: Option<usize>,

    /// Give up on an item after this many attempts
    #[arg(long, conflicts_with = "unbounded")]
    pub max_attempts: Option<u32>,

    /// Retry transient failures until interrupted
    #[arg(long)]
    pub unbounded: bool,

    #[arg(long)]
    pub backoff_initial_ms: Option<u64>,

    #[arg(long)]
    pub backoff_min_ms: Option<u64>,

    #[arg(long)]
    pub backoff_max_ms: Option<u64>,

    /// Upper bound on random extra delay per retry
    #[arg(long)]
    pub jitter_ms: Option<u64>,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

impl BatchArgs {
    /// The batch settings given on the command line.
    pub fn overrides(&self) -> BatchOverrides {
        let max_attempts = if self.unbounded {
            Some(None)
        } else {
            self.max_attempts.map(Some)
        };
        let retry = RetryOverrides {
            max_attempts,
            initial_ms: self.backoff_initial_ms,
            min_ms: self.backoff_min_ms,
            max_ms: self.backoff_max_ms,
            jitter_ms: self.jitter_ms,
        };
        BatchOverrides {
            concurrency: self.concurrency,
            checkpoint_interval: self.checkpoint_interval,
            retry: (retry != RetryOverrides::default()).then_some(retry),
        }
    }

    /// The payload field, or `default` when not given.
    pub fn field_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.field.as_deref().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_search() {
        let cli = Cli::parse_from([
            "news_fanout",
            "search",
            "--input",
            "./in.json",
            "--output-dir",
            "./out",
            "--brave-api-key",
            "k",
            "--concurrency",
            "5",
        ]);

        match cli.command {
            Command::Search {
                batch,
                brave_api_key,
                endpoint,
            } => {
                assert_eq!(batch.input, PathBuf::from("./in.json"));
                assert_eq!(batch.output_dir, PathBuf::from("./out"));
                assert_eq!(brave_api_key.as_deref(), Some("k"));
                assert_eq!(endpoint, search::DEFAULT_ENDPOINT);
                assert_eq!(batch.overrides().concurrency, Some(5));
                assert_eq!(batch.overrides().retry, None);
                assert_eq!(batch.timeout_secs, 30);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_short_flags_and_global_config() {
        let cli = Cli::parse_from([
            "news_fanout",
            "crawl",
            "-i",
            "/tmp/sources.json",
            "-o",
            "/tmp/out",
            "-c",
            "/tmp/fanout.yaml",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/fanout.yaml")));
        match cli.command {
            Command::Crawl { batch, .. } => {
                assert_eq!(batch.input, PathBuf::from("/tmp/sources.json"));
                assert_eq!(batch.field_or("url"), "url");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unbounded_flag() {
        let cli = Cli::parse_from([
            "news_fanout",
            "expand",
            "-i",
            "in.json",
            "-o",
            "out",
            "--unbounded",
            "--jitter-ms",
            "500",
        ]);
        let Command::Expand { batch, model, .. } = cli.command else {
            panic!("expected expand");
        };
        let retry = batch.overrides().retry.unwrap();
        assert_eq!(retry.max_attempts, Some(None));
        assert_eq!(retry.jitter_ms, Some(500));
        assert_eq!(model, expand::DEFAULT_MODEL);
    }

    #[test]
    fn test_unbounded_conflicts_with_max_attempts() {
        let res = Cli::try_parse_from([
            "news_fanout",
            "embed",
            "-i",
            "in.json",
            "-o",
            "out",
            "--unbounded",
            "--max-attempts",
            "3",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn test_prepare() {
        let cli = Cli::parse_from(["news_fanout", "prepare", "-i", "summary.json", "-o", "clean.json"]);
        assert!(matches!(cli.command, Command::Prepare { .. }));
    }
}
