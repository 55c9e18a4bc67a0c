//! In-process coordination service for client tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thothcraft_protocol::{
    CompleteUploadResponse, InitUploadRequest, UploadSession, UploadStatusResponse,
};
use thothcraft_transfer::checksum_bytes;
use tokio::sync::Notify;

use crate::error::UploadError;
use crate::service::{CoordinationService, ServiceFuture};

#[derive(Default)]
pub(crate) struct MockState {
    /// Remaining injected failures per chunk number.
    pub chunk_failures: HashMap<u32, u32>,
    pub complete_failures: u32,
    /// Requests received per chunk number, failed ones included.
    pub attempts: HashMap<u32, u32>,
    /// Times each chunk was accepted.
    pub stored: BTreeMap<u32, u32>,
    pub bad_hashes: Vec<u32>,
    pub total_chunks: u32,
    pub init_requests: Vec<InitUploadRequest>,
    pub complete_calls: u32,
    pub status_calls: u32,
    pub cancel_calls: Vec<String>,
}

pub(crate) struct MockService {
    upload_id: String,
    chunk_delay: Duration,
    expires_at: Option<DateTime<Utc>>,
    fail_init: bool,
    fail_cancel: bool,
    no_sessions: bool,
    complete_gate: Option<Arc<Notify>>,
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            upload_id: "up-1".into(),
            chunk_delay: Duration::ZERO,
            expires_at: None,
            fail_init: false,
            fail_cancel: false,
            no_sessions: false,
            complete_gate: None,
            state: Mutex::new(MockState::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn failing_chunk(self, number: u32, times: u32) -> Self {
        self.state().chunk_failures.insert(number, times);
        self
    }

    pub fn failing_complete(self, times: u32) -> Self {
        self.state().complete_failures = times;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    /// Status requests answer 404, as for an expired or deleted session.
    pub fn without_sessions(mut self) -> Self {
        self.no_sessions = true;
        self
    }

    /// Chunks stored by an earlier session for the same file.
    pub fn with_known_chunks(self, numbers: &[u32]) -> Self {
        {
            let mut state = self.state();
            for &n in numbers {
                state.stored.insert(n, 1);
            }
        }
        self
    }

    /// `complete_upload` blocks until the gate is notified.
    pub fn with_complete_gate(mut self, gate: Arc<Notify>) -> Self {
        self.complete_gate = Some(gate);
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn unavailable(message: &str) -> UploadError {
        UploadError::Api {
            status: 503,
            message: message.into(),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CoordinationService for MockService {
    fn init_upload<'a>(
        &'a self,
        request: &'a InitUploadRequest,
    ) -> ServiceFuture<'a, UploadSession> {
        Box::pin(async move {
            let mut state = self.state();
            state.init_requests.push(request.clone());
            if self.fail_init {
                return Err(UploadError::Api {
                    status: 500,
                    message: "init failed".into(),
                });
            }
            let total_chunks = request.total_size.div_ceil(request.chunk_size) as u32;
            state.total_chunks = total_chunks;
            Ok(UploadSession {
                upload_id: self.upload_id.clone(),
                filename: request.filename.clone(),
                total_size: request.total_size,
                chunk_size: request.chunk_size,
                total_chunks,
                uploaded_chunks: state.stored.keys().copied().collect(),
                expires_at: self.expires_at,
            })
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        _upload_id: &'a str,
        chunk_number: u32,
        chunk_hash: &'a str,
        data: Vec<u8>,
    ) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
            *self.state().attempts.entry(chunk_number).or_default() += 1;

            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }

            let mut state = self.state();
            if let Some(remaining) = state.chunk_failures.get_mut(&chunk_number) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Self::unavailable("chunk store unavailable"));
                }
            }
            if checksum_bytes(&data) != chunk_hash {
                state.bad_hashes.push(chunk_number);
                return Err(UploadError::Api {
                    status: 400,
                    message: "chunk hash mismatch".into(),
                });
            }
            *state.stored.entry(chunk_number).or_default() += 1;
            Ok(())
        })
    }

    fn complete_upload<'a>(
        &'a self,
        upload_id: &'a str,
    ) -> ServiceFuture<'a, CompleteUploadResponse> {
        Box::pin(async move {
            self.state().complete_calls += 1;
            if let Some(gate) = &self.complete_gate {
                gate.notified().await;
            }

            let mut state = self.state();
            if state.complete_failures > 0 {
                state.complete_failures -= 1;
                return Err(Self::unavailable("assembly failed"));
            }
            if state.stored.len() as u32 != state.total_chunks {
                return Err(UploadError::Api {
                    status: 400,
                    message: "missing chunks".into(),
                });
            }
            Ok(CompleteUploadResponse {
                file_id: format!("file-{upload_id}"),
            })
        })
    }

    fn upload_status<'a>(&'a self, _upload_id: &'a str) -> ServiceFuture<'a, UploadStatusResponse> {
        Box::pin(async move {
            let mut state = self.state();
            state.status_calls += 1;
            if self.no_sessions {
                return Err(UploadError::Api {
                    status: 404,
                    message: "Upload session not found".into(),
                });
            }
            let uploaded_chunks: Vec<u32> = state.stored.keys().copied().collect();
            let progress = if state.total_chunks == 0 {
                0.0
            } else {
                uploaded_chunks.len() as f64 / state.total_chunks as f64 * 100.0
            };
            Ok(UploadStatusResponse {
                uploaded_chunks,
                progress,
            })
        })
    }

    fn cancel_upload<'a>(&'a self, upload_id: &'a str) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            state.cancel_calls.push(upload_id.to_string());
            if self.fail_cancel {
                return Err(Self::unavailable("cancel failed"));
            }
            state.stored.clear();
            Ok(())
        })
    }
}
