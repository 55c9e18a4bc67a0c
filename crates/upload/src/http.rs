//! REST transport for the coordination service.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.

use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use thothcraft_protocol::constants::{
    CANCEL_PATH, CHUNK_FORM_FIELD, CHUNK_PATH, COMPLETE_PATH, INIT_PATH, STATUS_PATH,
};
use thothcraft_protocol::{
    ApiErrorBody, CompleteUploadResponse, InitUploadRequest, UploadSession, UploadStatusResponse,
};
use tracing::trace;

use crate::error::UploadError;
use crate::service::{CoordinationService, ServiceFuture};

/// Default per-request timeout. Generous enough for a large chunk on a slow link.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Characters escaped in the upload id path segment (all but RFC 3986 unreserved).
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// [`CoordinationService`] over HTTPS.
pub struct HttpCoordinationService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCoordinationService {
    /// Creates a client for `base_url` authenticating with `api_token`.
    pub fn new(base_url: &str, api_token: &str) -> Result<Self, UploadError> {
        Self::with_timeout(base_url, api_token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`new`](Self::new) with a custom per-request timeout.
    pub fn with_timeout(
        base_url: &str,
        api_token: &str,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        if api_token.trim().is_empty() {
            return Err(UploadError::InvalidToken);
        }
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_token.trim()))
            .map_err(|_| UploadError::InvalidToken)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, upload_id: &str) -> String {
        let encoded = utf8_percent_encode(upload_id, PATH_SEGMENT);
        format!("{}{path}/{encoded}", self.base_url)
    }

    /// Sends a request and maps non-2xx responses to [`UploadError::Api`].
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, UploadError> {
        let resp = request.send().await?;
        let status = resp.status();
        trace!(url = %resp.url(), %status, "response");

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, UploadError> {
        let resp = self.send(request).await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Builds an API error from a response body, preferring the server's
/// `detail` message, then the raw body, then the status reason phrase.
fn api_error(status: u16, body: &str) -> UploadError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.message())
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| {
            reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("empty response")
                .to_string()
        });
    UploadError::Api { status, message }
}

impl CoordinationService for HttpCoordinationService {
    fn init_upload<'a>(
        &'a self,
        request: &'a InitUploadRequest,
    ) -> ServiceFuture<'a, UploadSession> {
        Box::pin(async move {
            let url = format!("{}{INIT_PATH}", self.base_url);
            self.send_json(self.http.post(url).json(request)).await
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        chunk_number: u32,
        chunk_hash: &'a str,
        data: Vec<u8>,
    ) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let part = Part::bytes(data)
                .file_name(format!("chunk_{chunk_number}"))
                .mime_str("application/octet-stream")?;
            let form = Form::new().part(CHUNK_FORM_FIELD, part);
            let request = self
                .http
                .post(self.url(CHUNK_PATH, upload_id))
                .query(&[
                    ("chunk_number", chunk_number.to_string()),
                    ("chunk_hash", chunk_hash.to_string()),
                ])
                .multipart(form);
            self.send(request).await?;
            Ok(())
        })
    }

    fn complete_upload<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> ServiceFuture<'a, CompleteUploadResponse> {
        Box::pin(async move {
            self.send_json(self.http.post(self.url(COMPLETE_PATH, upload_id)))
                .await
        })
    }

    fn upload_status<'a>(&'a self, upload_id: &'a str) -> ServiceFuture<'a, UploadStatusResponse> {
        Box::pin(async move {
            self.send_json(self.http.get(self.url(STATUS_PATH, upload_id)))
                .await
        })
    }

    fn cancel_upload<'a>(&'a self, upload_id: &'a str) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            self.send(self.http.delete(self.url(CANCEL_PATH, upload_id)))
                .await?;
            Ok(())
        })
    }
}
