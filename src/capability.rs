//! The remote capability abstraction and its error taxonomy.
//!
//! Every third-party service this tool talks to (web search, embeddings,
//! content fetching, LLM expansion) is reached through [`RemoteCapability`]:
//! one payload in, one result out. The pipeline never depends on a concrete
//! provider, which keeps providers swappable and lets tests inject doubles.
//!
//! # Error Classes
//!
//! | Variant | Class | Typical cause |
//! |---------|-------|---------------|
//! | [`CapabilityError::Transient`] | transient | timeout, connection reset |
//! | [`CapabilityError::RateLimited`] | transient | HTTP 429 |
//! | [`CapabilityError::Http`] | by status | 5xx/408 transient, other 4xx fatal |
//! | [`CapabilityError::Malformed`] | fatal | unexpected response shape |
//! | [`CapabilityError::Fatal`] | fatal | bad input, programmer error |
//! | [`CapabilityError::Exhausted`] | fatal | bounded retries used up |
//! | [`CapabilityError::Cancelled`] | fatal | batch cancellation |

use reqwest::StatusCode;
use thiserror::Error;

/// Classification of a failed call, used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Likely to succeed if tried again later.
    Transient,
    /// Retrying will not help.
    Fatal,
}

/// A single failed call to a remote capability.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Network-level failure: timeout, refused or reset connection.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The provider asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The provider answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The provider answered, but not in the shape we expect.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Anything else that retrying cannot fix.
    #[error("fatal failure: {0}")]
    Fatal(String),

    /// The bounded retry policy gave up.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<CapabilityError>,
    },

    /// The batch was cancelled before this item resolved.
    #[error("cancelled")]
    Cancelled,
}

impl CapabilityError {
    /// Build an error from a non-success HTTP status and (already truncated) body.
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == StatusCode::TOO_MANY_REQUESTS {
            CapabilityError::RateLimited(body)
        } else {
            CapabilityError::Http {
                status: status.as_u16(),
                body,
            }
        }
    }

    /// Default classification used by [`crate::retry::RetryPolicy`].
    pub fn class(&self) -> ErrorClass {
        match self {
            CapabilityError::Transient(_) | CapabilityError::RateLimited(_) => {
                ErrorClass::Transient
            }
            CapabilityError::Http { status, .. } => classify_status(*status),
            CapabilityError::Malformed(_)
            | CapabilityError::Fatal(_)
            | CapabilityError::Exhausted { .. }
            | CapabilityError::Cancelled => ErrorClass::Fatal,
        }
    }
}

/// 5xx, 408 and 429 are worth retrying; every other status is not.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        408 | 429 | 500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// The default classification predicate.
pub fn default_classifier(err: &CapabilityError) -> ErrorClass {
    err.class()
}

impl From<reqwest::Error> for CapabilityError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return CapabilityError::from_status(status, e.to_string());
        }
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            CapabilityError::Transient(e.to_string())
        } else if e.is_decode() {
            CapabilityError::Malformed(e.to_string())
        } else {
            CapabilityError::Fatal(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CapabilityError {
    fn from(e: serde_json::Error) -> Self {
        CapabilityError::Malformed(e.to_string())
    }
}

/// An injectable, single-argument async call to a third-party service.
///
/// Implementors own whatever client state they need (HTTP client, API key,
/// endpoint). The pipeline calls [`RemoteCapability::call`] once per attempt.
pub trait RemoteCapability {
    /// The result recorded for a successful item. Serialized verbatim into checkpoints.
    type Output;

    /// Short name used in log records and sink filenames.
    fn name(&self) -> &'static str;

    /// Run one attempt for `payload`.
    async fn call(&self, payload: &str) -> Result<Self::Output, CapabilityError>;
}
