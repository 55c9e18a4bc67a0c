//! Wire types for the ThothCraft upload coordination service.
//!
//! The coordination service allocates upload sessions, stores chunks,
//! tracks progress and assembles the final file. This crate only holds
//! the JSON shapes exchanged with it plus the client-side progress view.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    ApiErrorBody, CompleteUploadResponse, InitUploadRequest, UploadSession, UploadStatusResponse,
};
pub use types::{UploadProgress, UploadStatus};
