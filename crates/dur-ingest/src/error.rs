//! Error types for DUR ingestion

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Everything that can stop an ingestion run.
///
/// Normalization never produces an error; malformed upstream fields degrade
/// to defaults instead.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Required setting missing or invalid. Raised before any network I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream answered with a non-success status or an error result code
    #[error("Upstream request for page {page} failed with status {status}: {message}")]
    Fetch {
        page: u32,
        status: u16,
        message: String,
    },

    /// Timeout or connection failure talking to the upstream API
    #[error("Network error while fetching page {page}: {message}")]
    TransientNetwork { page: u32, message: String },

    /// Upstream body was not the JSON document we expect
    #[error("Unexpected response body for page {page}: {message}")]
    Decode { page: u32, message: String },

    /// Destination rejected a batch
    #[error("Upsert of batch {batch} failed: {message}")]
    Upsert {
        batch: usize,
        retryable: bool,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Upsert failure not yet attributed to a batch; see [`IngestError::at_batch`]
    pub fn upsert(retryable: bool, msg: impl Into<String>) -> Self {
        Self::Upsert {
            batch: 0,
            retryable,
            message: msg.into(),
        }
    }

    pub(crate) fn network(page: u32, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self::TransientNetwork {
            page,
            message: format!("{}: {}", kind, err),
        }
    }

    /// Attach the batch number to an upsert error
    pub fn at_batch(self, batch: usize) -> Self {
        match self {
            Self::Upsert {
                retryable, message, ..
            } => Self::Upsert {
                batch,
                retryable,
                message,
            },
            other => other,
        }
    }

    /// Whether repeating the failed call may succeed.
    ///
    /// Page reads and upserts are both idempotent, so this only looks at the
    /// failure kind.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientNetwork { .. } => true,
            Self::Fetch { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Upsert { retryable, .. } => *retryable,
            Self::Config(_) | Self::Decode { .. } | Self::Io(_) | Self::Serialization(_) => false,
        }
    }
}
