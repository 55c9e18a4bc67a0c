//! Resumable chunked upload client.
//!
//! Drives a file from "not uploaded" to "stored and finalized" on the
//! ThothCraft upload coordination service, tolerating transient failures
//! and allowing pause/resume without re-sending accepted chunks.
//!
//! # Pipeline
//!
//! 1. **Hash**: stream the whole file through SHA-256
//! 2. **Init**: open (or rediscover) a session on the server
//! 3. **Upload**: send missing chunks, at most `concurrency` at a time,
//!    retrying each with exponential backoff
//! 4. **Complete**: ask the server to assemble the file
//!
//! The transport sits behind [`CoordinationService`]; the crate ships a
//! reqwest implementation in [`HttpCoordinationService`].

pub mod client;
pub mod error;
pub mod http;
pub mod journal;
pub mod retry;
pub mod service;
pub mod types;

mod store;

#[cfg(test)]
mod mock;

// Re-export primary types for convenience.
pub use client::ResumableUploadClient;
pub use error::UploadError;
pub use http::HttpCoordinationService;
pub use journal::{JournalEntry, SessionJournal};
pub use retry::RetryPolicy;
pub use service::{CoordinationService, ServiceFuture};
pub use types::{SessionInfo, UploadCallbacks, UploadClientConfig, UploadOptions};

pub use thothcraft_protocol::{UploadProgress, UploadSession, UploadStatus};
