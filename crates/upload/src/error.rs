//! Upload error types.

use thothcraft_protocol::UploadStatus;
use thothcraft_transfer::TransferError;

/// Errors produced by the upload client and its transport.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response; `message` is the server's `detail` when present.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("invalid API token")]
    InvalidToken,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("upload {upload_id} is {status}, cannot {action}")]
    InvalidState {
        upload_id: String,
        status: UploadStatus,
        action: &'static str,
    },

    #[error("upload {0} is being finalized")]
    Finalizing(String),

    #[error("source has {actual} bytes but the session expects {expected}")]
    SourceMismatch { expected: u64, actual: u64 },

    #[error("chunk {chunk} failed after {attempts} attempts: {reason}")]
    ChunkFailed {
        chunk: u32,
        attempts: u32,
        reason: String,
    },

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// HTTP status of an API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
