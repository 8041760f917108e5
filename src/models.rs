//! Data models shared by the pipeline and the providers.
//!
//! - [`WorkItem`]: one payload to push through a remote capability
//! - [`Outcome`]: the terminal result for one work item
//! - [`Attempt`]: a single try inside the retry loop
//! - [`SummaryRecord`]: an input news-summary record
//! - [`SearchResult`]: one web search hit

use crate::capability::CapabilityError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One unit of input, addressed by its position in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// 0-based position in the source; also the result slot.
    pub index: usize,
    /// The text, URL, or query handed to the capability.
    pub payload: String,
}

impl WorkItem {
    pub fn new(index: usize, payload: impl Into<String>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }
}

/// The terminal result for one [`WorkItem`].
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Failed(CapabilityError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The result to store in the slot; failures store nothing.
    pub fn into_result(self) -> Option<T> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failed(_) => None,
        }
    }
}

/// What happened on a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success,
    /// Retried after `delay`.
    TransientFailure { error: String, delay: Duration },
    /// Not retried, either because of classification or because attempts ran out.
    FatalFailure { error: String },
}

/// A single call made by the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub item_index: usize,
    /// 1-based.
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
}

/// A cleaned news-summary record, as produced by `prepare`.
///
/// Fields this tool does not use are carried through untouched, and a record
/// without an `entry` is written back exactly as it was read.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SummaryRecord {
    /// The summary text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Annotations stripped out of `entry`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<Vec<String>>,
    /// Everything else (`url`, `datetime`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One web search hit.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
    /// Publication timestamp, when the provider reports a parseable one.
    pub page_age: Option<NaiveDateTime>,
    /// Provider-specific site profile.
    pub profile: serde_json::Value,
    pub language: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: String,
}
