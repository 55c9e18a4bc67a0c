use serde::{Deserialize, Serialize};

/// Current state of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Paused,
    Completed,
    Error,
}

impl UploadStatus {
    /// Returns `true` if chunks may still be scheduled for this upload.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Uploading)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Client-side view of one upload.
///
/// `progress` is derived from chunk counts, not bytes, so every chunk
/// weighs the same regardless of the shorter final chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: String,
    pub filename: String,
    pub status: UploadStatus,
    pub progress: f64,
    pub bytes_uploaded: u64,
    pub total_size: u64,
    pub total_chunks: u32,
    /// Sorted, deduplicated chunk numbers the server has accepted.
    #[serde(default)]
    pub uploaded_chunks: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadProgress {
    /// Creates a pending progress entry with nothing uploaded.
    pub fn new(upload_id: &str, filename: &str, total_size: u64, total_chunks: u32) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            filename: filename.to_string(),
            status: UploadStatus::Pending,
            progress: 0.0,
            bytes_uploaded: 0,
            total_size,
            total_chunks,
            uploaded_chunks: Vec::new(),
            error: None,
        }
    }

    /// Returns `true` once every chunk number has been recorded.
    pub fn all_chunks_uploaded(&self) -> bool {
        self.uploaded_chunks.len() as u32 >= self.total_chunks
    }

    /// Recomputes `progress` from the recorded chunk count.
    pub fn recompute_percentage(&mut self) {
        self.progress = if self.total_chunks == 0 {
            100.0
        } else {
            self.uploaded_chunks.len() as f64 / self.total_chunks as f64 * 100.0
        };
    }
}
