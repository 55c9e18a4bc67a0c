//! Resumable upload client.
//!
//! Each upload runs as one background transfer task that keeps up to
//! `concurrency` chunk tasks in a [`JoinSet`] and folds their results into
//! the [`UploadStore`] one at a time. Pausing cancels the run's token, which
//! aborts every in-flight request; resuming starts a fresh run that skips
//! the chunks already recorded.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use thothcraft_protocol::constants::DEFAULT_CONTENT_TYPE;
use thothcraft_protocol::{InitUploadRequest, UploadProgress, UploadSession, UploadStatus};
use thothcraft_transfer::{
    ChunkInfo, ChunkSource, checksum_offloaded, checksum_source, pending_chunks, total_chunks,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::retry::RetryPolicy;
use crate::service::CoordinationService;
use crate::store::{FinalizeGate, UploadEntry, UploadStore, merge_chunks};
use crate::types::{SessionInfo, UploadCallbacks, UploadClientConfig, UploadOptions};

/// Drives files to the coordination service in resumable chunks.
///
/// Cheap to clone; clones share the same tracked uploads. Independent
/// instances share nothing, even when they talk to the same server.
#[derive(Clone)]
pub struct ResumableUploadClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    service: Arc<dyn CoordinationService>,
    config: UploadClientConfig,
    store: UploadStore,
}

impl ResumableUploadClient {
    pub fn new(
        service: Arc<dyn CoordinationService>,
        config: UploadClientConfig,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                service,
                config,
                store: UploadStore::default(),
            }),
        })
    }

    pub fn config(&self) -> &UploadClientConfig {
        &self.inner.config
    }

    /// Hashes `source`, opens a session and starts transferring in the
    /// background. Returns the session id as soon as the session exists.
    ///
    /// If the server recognizes the file hash as a partial upload, chunks it
    /// already holds are skipped. This is also how a paused or failed upload
    /// is re-initiated: the tracked entry is replaced by the server's view.
    /// Any failure before the transfer starts is reported through `on_error`
    /// and returned; nothing new stays tracked.
    pub async fn initialize_upload(
        &self,
        source: Arc<dyn ChunkSource>,
        options: UploadOptions,
    ) -> Result<String, UploadError> {
        let callbacks = options.callbacks.clone();
        match self.open_session(&source, options).await {
            Ok(upload_id) => Ok(upload_id),
            Err(e) => {
                warn!(file = %source.name(), error = %e, "upload initialization failed");
                callbacks.error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn open_session(
        &self,
        source: &Arc<dyn ChunkSource>,
        options: UploadOptions,
    ) -> Result<String, UploadError> {
        let chunk_size = options.chunk_size.unwrap_or(self.inner.config.chunk_size);
        if chunk_size == 0 {
            return Err(UploadError::InvalidConfig("chunk_size must be > 0".into()));
        }
        let total_size = source.len();
        total_chunks(total_size, chunk_size)?;

        debug!(file = %source.name(), size = total_size, "hashing file");
        let file_hash = checksum_source(source.as_ref()).await?;
        let content_type = options
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let request = InitUploadRequest {
            filename: source.name().to_string(),
            total_size,
            chunk_size,
            file_hash: file_hash.clone(),
            content_type: content_type.clone(),
        };
        let session = self.inner.service.init_upload(&request).await?;
        let session = normalize_session(session, total_size, chunk_size)?;
        let upload_id = session.upload_id.clone();

        info!(
            upload = %upload_id,
            file = %session.filename,
            size = total_size,
            chunks = session.total_chunks,
            already_uploaded = session.uploaded_chunks.len(),
            "upload session opened"
        );

        let info = SessionInfo {
            session,
            file_hash,
            content_type,
        };
        self.inner
            .store
            .register(new_entry(info, UploadStatus::Pending, options.callbacks))?;

        if let Some(token) = self.inner.store.start(&upload_id) {
            tokio::spawn(Arc::clone(&self.inner).run_transfer(
                upload_id.clone(),
                Arc::clone(source),
                token,
            ));
        }
        Ok(upload_id)
    }

    /// Stops all in-flight work for an upload. The server session is kept.
    ///
    /// Pausing an upload that is already paused or failed does nothing.
    pub fn pause_upload(&self, upload_id: &str) -> Result<(), UploadError> {
        let status = self.inner.store.pause(upload_id)?;
        info!(upload = %upload_id, %status, "upload paused");
        Ok(())
    }

    /// Restarts a paused or failed upload from the chunks already recorded.
    ///
    /// `source` must have the same length as the original file. The new
    /// `callbacks` replace the ones registered before.
    pub fn resume_upload(
        &self,
        upload_id: &str,
        source: Arc<dyn ChunkSource>,
        callbacks: UploadCallbacks,
    ) -> Result<(), UploadError> {
        let token = self
            .inner
            .store
            .prepare_resume(upload_id, source.len(), callbacks, Utc::now())?;
        info!(upload = %upload_id, "upload resumed");
        tokio::spawn(Arc::clone(&self.inner).run_transfer(upload_id.to_string(), source, token));
        Ok(())
    }

    /// Aborts an upload, forgets it locally and asks the server to delete it.
    ///
    /// The server call is best-effort: local state is cleared even if it
    /// fails.
    pub async fn cancel_upload(&self, upload_id: &str) -> Result<(), UploadError> {
        self.inner.store.begin_cancel(upload_id)?;
        match self.inner.service.cancel_upload(upload_id).await {
            Ok(()) => info!(upload = %upload_id, "upload cancelled"),
            Err(e) => warn!(upload = %upload_id, error = %e, "server cancel failed, local state cleared"),
        }
        Ok(())
    }

    /// Fetches the server's chunk list and folds it into local state.
    ///
    /// Returns `None` without contacting the server if the upload is not
    /// tracked by this client.
    pub async fn get_upload_status(
        &self,
        upload_id: &str,
    ) -> Result<Option<UploadProgress>, UploadError> {
        if !self.inner.store.contains(upload_id) {
            return Ok(None);
        }
        let status = self.inner.service.upload_status(upload_id).await?;
        Ok(self.inner.store.reconcile(upload_id, &status.uploaded_chunks))
    }

    /// Snapshot of every tracked upload, sorted by id.
    pub fn get_active_uploads(&self) -> Vec<UploadProgress> {
        self.inner.store.snapshots()
    }

    /// Session metadata for a tracked upload, for persisting across restarts.
    pub fn session_info(&self, upload_id: &str) -> Option<SessionInfo> {
        self.inner.store.session_info(upload_id)
    }

    /// Starts tracking a session created elsewhere, e.g. by an earlier
    /// process, and reconciles its chunk list with the server.
    ///
    /// The upload is registered as `paused`; call
    /// [`resume_upload`](Self::resume_upload) to continue it. A session the
    /// server no longer knows is dropped with
    /// [`SessionNotFound`](UploadError::SessionNotFound).
    pub async fn attach_session(
        &self,
        info: SessionInfo,
        callbacks: UploadCallbacks,
    ) -> Result<UploadProgress, UploadError> {
        let SessionInfo {
            session,
            file_hash,
            content_type,
        } = info;
        if session.is_expired(Utc::now()) {
            return Err(UploadError::SessionExpired(session.upload_id));
        }
        let (total_size, chunk_size) = (session.total_size, session.chunk_size);
        let session = normalize_session(session, total_size, chunk_size)?;
        let upload_id = session.upload_id.clone();
        let info = SessionInfo {
            session,
            file_hash,
            content_type,
        };
        self.inner
            .store
            .insert(new_entry(info, UploadStatus::Paused, callbacks))?;

        match self.get_upload_status(&upload_id).await {
            Ok(Some(progress)) => {
                debug!(
                    upload = %upload_id,
                    uploaded = progress.uploaded_chunks.len(),
                    "session attached"
                );
                Ok(progress)
            }
            Ok(None) => Err(UploadError::SessionNotFound(upload_id)),
            Err(e) if e.status() == Some(404) => {
                self.inner.store.discard(&upload_id);
                Err(UploadError::SessionNotFound(upload_id))
            }
            Err(e) => {
                warn!(upload = %upload_id, error = %e, "could not reconcile attached session");
                self.inner
                    .store
                    .snapshot(&upload_id)
                    .ok_or(UploadError::SessionNotFound(upload_id))
            }
        }
    }
}

impl ClientInner {
    /// One run of the chunk pipeline, from the current recorded set to
    /// finalize. Exits quietly once its token is cancelled.
    async fn run_transfer(
        self: Arc<Self>,
        upload_id: String,
        source: Arc<dyn ChunkSource>,
        token: CancellationToken,
    ) {
        let Some(plan) = self.store.transfer_plan(&upload_id, &token) else {
            return;
        };
        let mut queue: VecDeque<ChunkInfo> =
            match pending_chunks(plan.total_size, plan.chunk_size, &plan.uploaded) {
                Ok(chunks) => chunks.into(),
                Err(e) => {
                    self.fail(&upload_id, &token, &e.to_string());
                    return;
                }
            };
        debug!(upload = %upload_id, pending = queue.len(), "transfer started");

        let mut tasks = JoinSet::new();
        loop {
            while tasks.len() < self.config.concurrency {
                let Some(chunk) = queue.pop_front() else {
                    break;
                };
                tasks.spawn(upload_with_retry(
                    Arc::clone(&self.service),
                    Arc::clone(&source),
                    upload_id.clone(),
                    chunk,
                    self.config.retry.clone(),
                    token.clone(),
                ));
            }

            let joined = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tasks.abort_all();
                    debug!(upload = %upload_id, "transfer stopped");
                    return;
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok(Ok(number)) => {
                    let Some((progress, callbacks)) =
                        self.store.record_chunk(&upload_id, &token, number)
                    else {
                        tasks.abort_all();
                        return;
                    };
                    debug!(
                        upload = %upload_id,
                        chunk = number,
                        progress = progress.progress,
                        "chunk stored"
                    );
                    if !callbacks.progress(&progress) {
                        tasks.abort_all();
                        self.fail(&upload_id, &token, "progress callback panicked");
                        return;
                    }
                }
                Ok(Err(UploadError::Cancelled)) => {
                    tasks.abort_all();
                    return;
                }
                Ok(Err(e)) => {
                    tasks.abort_all();
                    self.fail(&upload_id, &token, &e.to_string());
                    return;
                }
                Err(e) => {
                    tasks.abort_all();
                    self.fail(&upload_id, &token, &format!("chunk task failed: {e}"));
                    return;
                }
            }
        }

        self.finalize(&upload_id, &token).await;
    }

    async fn finalize(&self, upload_id: &str, token: &CancellationToken) {
        match self.store.begin_finalize(upload_id, token) {
            FinalizeGate::Proceed => {}
            FinalizeGate::Stale => return,
            FinalizeGate::Incomplete => {
                self.fail(upload_id, token, "transfer ended with chunks missing");
                return;
            }
        }

        debug!(upload = %upload_id, "finalizing");
        match self.service.complete_upload(upload_id).await {
            Ok(response) => {
                if let Some((progress, callbacks)) = self.store.finish_complete(upload_id) {
                    info!(
                        upload = %upload_id,
                        file_id = %response.file_id,
                        bytes = progress.bytes_uploaded,
                        "upload completed"
                    );
                    callbacks.complete(&response.file_id);
                }
            }
            Err(e) => {
                let message = format!("failed to complete upload: {e}");
                warn!(upload = %upload_id, error = %e, "finalize failed");
                if let Some(callbacks) = self.store.fail_finalize(upload_id, &message) {
                    callbacks.error(&message);
                }
            }
        }
    }

    fn fail(&self, upload_id: &str, token: &CancellationToken, message: &str) {
        if let Some(callbacks) = self.store.fail(upload_id, token, message) {
            warn!(upload = %upload_id, error = %message, "upload failed");
            callbacks.error(message);
        }
    }
}

/// Sends one chunk, retrying the same chunk with backoff until it is
/// stored or the retry budget runs out. Returns the chunk number.
async fn upload_with_retry(
    service: Arc<dyn CoordinationService>,
    source: Arc<dyn ChunkSource>,
    upload_id: String,
    mut chunk: ChunkInfo,
    retry: RetryPolicy,
    token: CancellationToken,
) -> Result<u32, UploadError> {
    loop {
        let attempt = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(UploadError::Cancelled),
            result = send_chunk(service.as_ref(), source.as_ref(), &upload_id, &mut chunk) => result,
        };

        match attempt {
            Ok(()) => return Ok(chunk.number),
            Err(e) if chunk.retry_count < retry.max_retries => {
                chunk.retry_count += 1;
                let delay = retry.delay_for_attempt(chunk.retry_count);
                debug!(
                    upload = %upload_id,
                    chunk = chunk.number,
                    retry = chunk.retry_count,
                    error = %e,
                    "chunk failed, retrying in {delay:?}"
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(UploadError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                return Err(UploadError::ChunkFailed {
                    chunk: chunk.number,
                    attempts: retry.max_attempts(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

async fn send_chunk(
    service: &dyn CoordinationService,
    source: &dyn ChunkSource,
    upload_id: &str,
    chunk: &mut ChunkInfo,
) -> Result<(), UploadError> {
    let data = source.read_range(chunk.start, chunk.end).await?;
    let (data, hash) = checksum_offloaded(data).await?;
    service
        .upload_chunk(upload_id, chunk.number, &hash, data)
        .await?;
    chunk.hash = Some(hash);
    Ok(())
}

/// Reconciles a server session with the local file.
///
/// The local length wins over the server's `total_size`; the chunk count is
/// always derived locally and out-of-range chunk numbers are dropped.
fn normalize_session(
    mut session: UploadSession,
    total_size: u64,
    requested_chunk_size: u64,
) -> Result<UploadSession, UploadError> {
    if session.chunk_size == 0 {
        session.chunk_size = requested_chunk_size;
    } else if session.chunk_size != requested_chunk_size {
        warn!(
            upload = %session.upload_id,
            requested = requested_chunk_size,
            server = session.chunk_size,
            "server chose a different chunk size"
        );
    }
    if session.total_size != total_size {
        warn!(
            upload = %session.upload_id,
            local = total_size,
            server = session.total_size,
            "server reported a different file size"
        );
        session.total_size = total_size;
    }

    let count = total_chunks(total_size, session.chunk_size)?;
    if session.total_chunks != 0 && session.total_chunks != count {
        warn!(
            upload = %session.upload_id,
            local = count,
            server = session.total_chunks,
            "server reported a different chunk count"
        );
    }
    session.total_chunks = count;
    session.uploaded_chunks.retain(|&n| n < count);
    session.uploaded_chunks.sort_unstable();
    session.uploaded_chunks.dedup();
    Ok(session)
}

fn new_entry(info: SessionInfo, status: UploadStatus, callbacks: UploadCallbacks) -> UploadEntry {
    let session = &info.session;
    let mut progress = UploadProgress::new(
        &session.upload_id,
        &session.filename,
        session.total_size,
        session.total_chunks,
    );
    progress.status = status;
    merge_chunks(&mut progress, session.chunk_size, &session.uploaded_chunks);
    UploadEntry {
        info,
        progress,
        callbacks,
        cancel: CancellationToken::new(),
        finalizing: false,
    }
}
