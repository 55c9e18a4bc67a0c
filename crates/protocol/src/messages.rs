//! Request and response bodies of the coordination service REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /upload/init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    /// Hex SHA-256 of the whole file, used by the server for deduplication.
    pub file_hash: String,
    pub content_type: String,
}

/// Server-issued handle for one in-progress upload.
///
/// `uploaded_chunks` may already be non-empty when the server recognizes
/// a previous partial upload of the same file hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    #[serde(alias = "upload_id")]
    pub upload_id: String,
    pub filename: String,
    #[serde(alias = "total_size")]
    pub total_size: u64,
    #[serde(alias = "chunk_size")]
    pub chunk_size: u64,
    #[serde(default, alias = "total_chunks")]
    pub total_chunks: u32,
    #[serde(default, alias = "uploaded_chunks")]
    pub uploaded_chunks: Vec<u32>,
    #[serde(default, alias = "expires_at", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    /// Returns `true` if the server may already have discarded this session.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Body of a successful `POST /upload/complete/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub file_id: String,
}

/// Body of `GET /upload/status/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    #[serde(default)]
    pub uploaded_chunks: Vec<u32>,
    #[serde(default)]
    pub progress: f64,
}

/// Structured error body returned with non-2xx responses.
///
/// `detail` is usually a string; validation failures carry a list of
/// objects with a `msg` field instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ApiErrorBody {
    /// Returns a human-readable message, or `None` if `detail` is empty.
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| match item.get("msg").and_then(|m| m.as_str()) {
                        Some(msg) => msg.to_string(),
                        None => item.to_string(),
                    })
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("; "))
                }
            }
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn init_request_uses_snake_case() {
        let req = InitUploadRequest {
            filename: "sensor.csv".into(),
            total_size: 2048,
            chunk_size: 1024,
            file_hash: "ab".repeat(32),
            content_type: "text/csv".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"total_size\":2048"));
        assert!(json.contains("\"chunk_size\":1024"));
        assert!(json.contains("\"file_hash\""));
        assert!(json.contains("\"content_type\":\"text/csv\""));
    }

    #[test]
    fn session_field_names() {
        let json = r#"{
            "uploadId": "u-42",
            "filename": "sensor.csv",
            "totalSize": 3000,
            "chunkSize": 1024,
            "totalChunks": 3,
            "uploadedChunks": [0, 2],
            "expiresAt": "2030-01-01T00:00:00Z"
        }"#;
        let session: UploadSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.upload_id, "u-42");
        assert_eq!(session.total_chunks, 3);
        assert_eq!(session.uploaded_chunks, vec![0, 2]);
        assert!(session.expires_at.is_some());
    }

    #[test]
    fn session_accepts_snake_case_and_missing_optionals() {
        let json = r#"{"upload_id":"u1","filename":"a","total_size":10,"chunk_size":4}"#;
        let session: UploadSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.upload_id, "u1");
        assert_eq!(session.total_chunks, 0);
        assert!(session.uploaded_chunks.is_empty());
        assert!(session.expires_at.is_none());
    }

    #[test]
    fn session_expiry() {
        let mut session = UploadSession {
            upload_id: "u1".into(),
            filename: "a".into(),
            total_size: 1,
            chunk_size: 1,
            total_chunks: 1,
            uploaded_chunks: vec![],
            expires_at: None,
        };
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert!(!session.is_expired(now));

        session.expires_at = Some(Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap());
        assert!(session.is_expired(now));

        session.expires_at = Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
        assert!(!session.is_expired(now));
    }

    #[test]
    fn error_body_string_detail() {
        let body: ApiErrorBody = serde_json::from_str(r#"{"detail":"Upload not found"}"#).unwrap();
        assert_eq!(body.message().as_deref(), Some("Upload not found"));
    }

    #[test]
    fn error_body_validation_list() {
        let json = r#"{"detail":[{"loc":["query","chunk_number"],"msg":"field required"},{"msg":"bad hash"}]}"#;
        let body: ApiErrorBody = serde_json::from_str(json).unwrap();
        assert_eq!(
            body.message().as_deref(),
            Some("field required; bad hash")
        );
    }

    #[test]
    fn error_body_missing_detail() {
        let body: ApiErrorBody = serde_json::from_str("{}").unwrap();
        assert!(body.message().is_none());
    }

    #[test]
    fn status_response_defaults() {
        let resp: UploadStatusResponse =
            serde_json::from_str(r#"{"uploaded_chunks":[1,3]}"#).unwrap();
        assert_eq!(resp.uploaded_chunks, vec![1, 3]);
        assert_eq!(resp.progress, 0.0);
    }
}
