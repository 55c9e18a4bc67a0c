//! Coordination service trait.
//!
//! [`HttpCoordinationService`](crate::HttpCoordinationService) implements it
//! over REST. Keeping the client generic over this trait decouples upload
//! logic from the transport and lets tests drive it with an in-process mock.

use std::future::Future;
use std::pin::Pin;

use thothcraft_protocol::{
    CompleteUploadResponse, InitUploadRequest, UploadSession, UploadStatusResponse,
};

use crate::error::UploadError;

/// Boxed future returned by [`CoordinationService`] methods.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Server that allocates sessions, stores chunks and assembles files.
///
/// Dropping a returned future aborts the request.
pub trait CoordinationService: Send + Sync {
    /// Opens a session, or returns a prior partial one for the same file hash.
    fn init_upload<'a>(&'a self, request: &'a InitUploadRequest)
    -> ServiceFuture<'a, UploadSession>;

    /// Stores one chunk. `chunk_hash` is the hex SHA-256 of `data`.
    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_number: u32,
        chunk_hash: &'a str,
        data: Vec<u8>,
    ) -> ServiceFuture<'a, ()>;

    /// Assembles the stored chunks and returns the server file id.
    fn complete_upload<'a>(&'a self, upload_id: &'a str)
    -> ServiceFuture<'a, CompleteUploadResponse>;

    /// Returns the server's view of which chunks are stored.
    fn upload_status<'a>(&'a self, upload_id: &'a str)
    -> ServiceFuture<'a, UploadStatusResponse>;

    /// Deletes the session and its stored chunks.
    fn cancel_upload<'a>(&'a self, upload_id: &'a str) -> ServiceFuture<'a, ()>;
}
