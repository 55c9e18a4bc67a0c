/// Default bytes per chunk (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default number of chunk requests in flight per upload.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default number of retries per chunk after the first attempt.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Content type sent when the caller does not provide one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Multipart field carrying the raw chunk bytes.
pub const CHUNK_FORM_FIELD: &str = "chunk";

/// Session initialization endpoint.
pub const INIT_PATH: &str = "/upload/init";

/// Chunk upload endpoint prefix (`/upload/chunk/{upload_id}`).
pub const CHUNK_PATH: &str = "/upload/chunk";

/// Finalize endpoint prefix (`/upload/complete/{upload_id}`).
pub const COMPLETE_PATH: &str = "/upload/complete";

/// Status endpoint prefix (`/upload/status/{upload_id}`).
pub const STATUS_PATH: &str = "/upload/status";

/// Cancel endpoint prefix (`/upload/cancel/{upload_id}`).
pub const CANCEL_PATH: &str = "/upload/cancel";
