//! Configuration, options and callback types for the upload client.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use thothcraft_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY};
use thothcraft_protocol::{UploadProgress, UploadSession};

use tracing::error;

use crate::error::UploadError;
use crate::retry::RetryPolicy;

/// Callback invoked after each confirmed chunk.
pub type ProgressCallback = Arc<dyn Fn(&UploadProgress) + Send + Sync>;

/// Callback invoked with the server file id once the upload is finalized.
pub type CompleteCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked with a human-readable message when the upload fails.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Caller-supplied notifications for one upload.
///
/// Callbacks run on the upload's transfer task and should return quickly.
/// A panicking callback does not take the task down: a panic in
/// `on_progress` fails the upload, one in `on_complete` or `on_error` is
/// logged and dropped.
#[derive(Clone, Default)]
pub struct UploadCallbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl UploadCallbacks {
    /// Sets the progress callback.
    pub fn on_progress(mut self, f: impl Fn(&UploadProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Sets the completion callback.
    pub fn on_complete(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Sets the error callback.
    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Returns `false` if the callback panicked.
    pub(crate) fn progress(&self, progress: &UploadProgress) -> bool {
        match &self.on_progress {
            Some(cb) => guarded("on_progress", || cb(progress)),
            None => true,
        }
    }

    pub(crate) fn complete(&self, file_id: &str) {
        if let Some(cb) = &self.on_complete {
            guarded("on_complete", || cb(file_id));
        }
    }

    pub(crate) fn error(&self, message: &str) {
        if let Some(cb) = &self.on_error {
            guarded("on_error", || cb(message));
        }
    }
}

fn guarded(name: &'static str, f: impl FnOnce()) -> bool {
    let ok = catch_unwind(AssertUnwindSafe(f)).is_ok();
    if !ok {
        error!(callback = name, "upload callback panicked");
    }
    ok
}

impl std::fmt::Debug for UploadCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Per-upload options for [`initialize_upload`](crate::ResumableUploadClient::initialize_upload).
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Overrides the client's default chunk size.
    pub chunk_size: Option<u64>,
    /// MIME type reported to the server.
    pub content_type: Option<String>,
    pub callbacks: UploadCallbacks,
}

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct UploadClientConfig {
    /// Default bytes per chunk (1 MiB).
    pub chunk_size: u64,
    /// Chunk requests in flight per upload (3).
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for UploadClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

impl UploadClientConfig {
    /// Rejects settings the transfer loop cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.concurrency == 0 {
            return Err(UploadError::InvalidConfig("concurrency must be > 0".into()));
        }
        Ok(())
    }
}

/// A tracked session plus the metadata needed to re-attach to it later.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session: UploadSession,
    /// Hex SHA-256 of the whole file.
    pub file_hash: String,
    pub content_type: String,
}
