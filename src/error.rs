//! Error types for the cloud upload buffer.

use thiserror::Error;

/// Outcome of a single upload attempt that did not succeed.
///
/// Distinguishes "the server is unreachable, try again later" from "the
/// server rejected this batch" — the two halves of the upload contract
/// that callers in `engine`/`retry`/`orchestrator` branch on.
#[derive(Debug, Clone, Error)]
pub enum UploadFailure {
    /// DNS/TCP/TLS/timeout failure, or no endpoint configured at all.
    /// The caller should leave the batch where it is and retry on the next
    /// drive pass.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status. The caller should move
    /// the batch into the retry pipeline.
    #[error("server rejected batch: {status} {body}")]
    Server { status: u16, body: String },
}

impl UploadFailure {
    /// True for the "try again later, leave queue in place" branch.
    pub fn is_transport(&self) -> bool {
        matches!(self, UploadFailure::Transport(_))
    }
}

impl From<reqwest::Error> for UploadFailure {
    fn from(err: reqwest::Error) -> Self {
        UploadFailure::Transport(err.to_string())
    }
}

/// Crate-wide error type for everything that isn't a per-upload outcome.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Upload(#[from] UploadFailure),
}
