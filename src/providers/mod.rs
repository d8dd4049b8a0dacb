//! External provider interfaces.
//!
//! The pipeline depends only on the narrow traits here; the real clients
//! (OpenAI, the note store) and the mocks used in tests are swapped freely.

pub mod notestore;
pub mod openai;

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Attempts per external call, including the first.
pub const MAX_ATTEMPTS: usize = 3;

/// Backoff before retry N+1, in seconds.
pub const RETRY_DELAYS_SECS: [u64; 3] = [2, 4, 8];

/// Overall deadlines per call kind.
pub const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(300);
pub const SUMMARIZE_TIMEOUT: Duration = Duration::from_secs(120);
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Classified failure from an external call.
///
/// The split drives retry policy: transport problems, timeouts, 429 and 5xx
/// are worth retrying; any other 4xx or an unparseable body is not.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::RateLimited | Self::Server { .. }
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => Self::RateLimited,
            s if s >= 500 => Self::Server { status: s, message },
            s => Self::Rejected { status: s, message },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Run an external call with bounded retries and exponential backoff.
///
/// Only retriable errors are retried; the backoff sleep is interruptible by
/// the cancellation token, which also short-circuits before each attempt.
pub async fn with_retries<T, F, Fut>(
    label: &str,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut last_error = ProviderError::Network("no attempts made".to_string());

    for attempt in 0..MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() && attempt < MAX_ATTEMPTS - 1 => {
                let delay = RETRY_DELAYS_SECS[attempt];
                log::warn!(
                    "{label}: attempt {}/{MAX_ATTEMPTS} failed ({e}), retrying in {delay}s",
                    attempt + 1
                );
                last_error = e;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                }
            }
            Err(e) => {
                log::error!("{label}: attempt {}/{MAX_ATTEMPTS} failed: {e}", attempt + 1);
                return Err(e);
            }
        }
    }

    Err(last_error)
}

/// Shared HTTP client with a bounded connection pool.
///
/// Per-request deadlines are set at the call sites, so the client itself
/// carries only connect-level limits.
pub fn shared_http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .unwrap_or_default()
    })
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Result of one transcription call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub audio_duration_seconds: Option<f64>,
}

/// Result of one summarization call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub text: String,
    pub prompt_tokens: Option<i64>,
    pub response_tokens: Option<i64>,
}

/// Reference to a note in the external store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRef {
    pub note_id: String,
    pub url: String,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription, ProviderError>;
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<SummaryResponse, ProviderError>;
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Find a note carrying the given label attribute, if any.
    async fn find_by_label(&self, name: &str, value: &str)
        -> Result<Option<NoteRef>, ProviderError>;

    /// Create a note under the configured parent. Body is HTML.
    async fn create_note(&self, title: &str, body_html: &str) -> Result<NoteRef, ProviderError>;

    /// Attach a label attribute to an existing note.
    async fn add_label(&self, note_id: &str, name: &str, value: &str)
        -> Result<(), ProviderError>;
}
