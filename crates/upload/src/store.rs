//! Per-client upload bookkeeping.
//!
//! One entry per tracked `upload_id`, created on init (or attach) and
//! removed on completion or cancel. Every state transition happens under
//! the store lock, which is never held across an `.await`; callbacks are
//! cloned out and invoked by the caller after the lock is released.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thothcraft_protocol::{UploadProgress, UploadStatus};
use thothcraft_transfer::ChunkInfo;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::types::{SessionInfo, UploadCallbacks};

/// Local state of one upload.
pub(crate) struct UploadEntry {
    pub info: SessionInfo,
    pub progress: UploadProgress,
    pub callbacks: UploadCallbacks,
    /// Scoped to the current run; replaced on resume, always cancelled first.
    pub cancel: CancellationToken,
    /// Set while the finalize request is in flight.
    pub finalizing: bool,
}

impl UploadEntry {
    /// Whether a task holding `token` may still change this entry.
    fn is_live(&self, token: &CancellationToken) -> bool {
        self.progress.status == UploadStatus::Uploading && !token.is_cancelled()
    }
}

/// Chunk layout of a running transfer.
pub(crate) struct TransferPlan {
    pub total_size: u64,
    pub chunk_size: u64,
    pub uploaded: Vec<u32>,
}

/// Outcome of [`UploadStore::begin_finalize`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FinalizeGate {
    /// Status was `uploading` with every chunk recorded; finalize may run.
    Proceed,
    /// Paused, cancelled or failed meanwhile; do nothing.
    Stale,
    /// Still uploading but chunks are missing.
    Incomplete,
}

#[derive(Default)]
pub(crate) struct UploadStore {
    entries: Mutex<HashMap<String, UploadEntry>>,
}

impl UploadStore {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, UploadEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a new entry. Fails if the id is already tracked.
    pub fn insert(&self, entry: UploadEntry) -> Result<(), UploadError> {
        let mut entries = self.lock();
        let id = entry.info.session.upload_id.clone();
        if let Some(existing) = entries.get(&id) {
            return Err(UploadError::InvalidState {
                upload_id: id,
                status: existing.progress.status,
                action: "register",
            });
        }
        entries.insert(id, entry);
        Ok(())
    }

    /// Registers a session returned by init. A paused or failed entry for
    /// the same id is replaced, so a re-initiated upload picks up the
    /// server's chunk list and the new callbacks. Entries that are still
    /// running or finalizing are left alone.
    pub fn register(&self, entry: UploadEntry) -> Result<(), UploadError> {
        let mut entries = self.lock();
        let id = entry.info.session.upload_id.clone();
        if let Some(existing) = entries.get(&id) {
            if existing.finalizing {
                return Err(UploadError::Finalizing(id));
            }
            if existing.progress.status.is_active() {
                return Err(UploadError::InvalidState {
                    upload_id: id,
                    status: existing.progress.status,
                    action: "re-initialize",
                });
            }
            existing.cancel.cancel();
        }
        entries.insert(id, entry);
        Ok(())
    }

    /// Stops any work for an upload and forgets it. Unknown ids are ignored.
    pub fn discard(&self, upload_id: &str) {
        if let Some(entry) = self.lock().remove(upload_id) {
            entry.cancel.cancel();
        }
    }

    pub fn contains(&self, upload_id: &str) -> bool {
        self.lock().contains_key(upload_id)
    }

    pub fn snapshot(&self, upload_id: &str) -> Option<UploadProgress> {
        self.lock().get(upload_id).map(|e| e.progress.clone())
    }

    /// All tracked uploads, sorted by id.
    pub fn snapshots(&self) -> Vec<UploadProgress> {
        let mut all: Vec<UploadProgress> = self.lock().values().map(|e| e.progress.clone()).collect();
        all.sort_by(|a, b| a.upload_id.cmp(&b.upload_id));
        all
    }

    /// Session metadata with `uploaded_chunks` brought up to date.
    pub fn session_info(&self, upload_id: &str) -> Option<SessionInfo> {
        self.lock().get(upload_id).map(|e| {
            let mut info = e.info.clone();
            info.session.uploaded_chunks = e.progress.uploaded_chunks.clone();
            info
        })
    }

    /// Moves a freshly registered entry from `pending` to `uploading`.
    pub fn start(&self, upload_id: &str) -> Option<CancellationToken> {
        let mut entries = self.lock();
        let entry = entries.get_mut(upload_id)?;
        if entry.progress.status != UploadStatus::Pending {
            return None;
        }
        entry.progress.status = UploadStatus::Uploading;
        Some(entry.cancel.clone())
    }

    /// Validates a resume request and switches the entry back to `uploading`.
    pub fn prepare_resume(
        &self,
        upload_id: &str,
        source_len: u64,
        callbacks: UploadCallbacks,
        now: DateTime<Utc>,
    ) -> Result<CancellationToken, UploadError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(upload_id)
            .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))?;

        if entry.finalizing {
            return Err(UploadError::Finalizing(upload_id.to_string()));
        }
        if entry.progress.status.is_active() {
            return Err(UploadError::InvalidState {
                upload_id: upload_id.to_string(),
                status: entry.progress.status,
                action: "resume",
            });
        }
        if entry.info.session.is_expired(now) {
            entries.remove(upload_id);
            return Err(UploadError::SessionExpired(upload_id.to_string()));
        }
        if entry.info.session.total_size != source_len {
            return Err(UploadError::SourceMismatch {
                expected: entry.info.session.total_size,
                actual: source_len,
            });
        }

        let token = CancellationToken::new();
        entry.cancel = token.clone();
        entry.callbacks = callbacks;
        entry.progress.status = UploadStatus::Uploading;
        entry.progress.error = None;
        Ok(token)
    }

    /// Returns the chunk layout if the run owning `token` is still live.
    pub fn transfer_plan(&self, upload_id: &str, token: &CancellationToken) -> Option<TransferPlan> {
        let entries = self.lock();
        let entry = entries.get(upload_id).filter(|e| e.is_live(token))?;
        Some(TransferPlan {
            total_size: entry.info.session.total_size,
            chunk_size: entry.info.session.chunk_size,
            uploaded: entry.progress.uploaded_chunks.clone(),
        })
    }

    /// Records a confirmed chunk. Returns `None` if the result is stale.
    pub fn record_chunk(
        &self,
        upload_id: &str,
        token: &CancellationToken,
        chunk_number: u32,
    ) -> Option<(UploadProgress, UploadCallbacks)> {
        let mut entries = self.lock();
        let entry = entries.get_mut(upload_id).filter(|e| e.is_live(token))?;
        let chunk_size = entry.info.session.chunk_size;
        merge_chunks(&mut entry.progress, chunk_size, &[chunk_number]);
        Some((entry.progress.clone(), entry.callbacks.clone()))
    }

    /// Marks a live run as failed and stops its remaining work.
    pub fn fail(
        &self,
        upload_id: &str,
        token: &CancellationToken,
        message: &str,
    ) -> Option<UploadCallbacks> {
        let mut entries = self.lock();
        let entry = entries.get_mut(upload_id).filter(|e| e.is_live(token))?;
        entry.progress.status = UploadStatus::Error;
        entry.progress.error = Some(message.to_string());
        entry.cancel.cancel();
        Some(entry.callbacks.clone())
    }

    /// Claims the right to finalize. Pause and cancel are refused until
    /// [`finish_complete`](Self::finish_complete) or
    /// [`fail_finalize`](Self::fail_finalize) runs.
    pub fn begin_finalize(&self, upload_id: &str, token: &CancellationToken) -> FinalizeGate {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(upload_id).filter(|e| e.is_live(token)) else {
            return FinalizeGate::Stale;
        };
        if !entry.progress.all_chunks_uploaded() {
            return FinalizeGate::Incomplete;
        }
        entry.finalizing = true;
        FinalizeGate::Proceed
    }

    /// Drops a finalized upload and returns its last state, marked completed.
    pub fn finish_complete(&self, upload_id: &str) -> Option<(UploadProgress, UploadCallbacks)> {
        let mut entry = self.lock().remove(upload_id)?;
        entry.progress.status = UploadStatus::Completed;
        entry.progress.progress = 100.0;
        entry.cancel.cancel();
        Some((entry.progress, entry.callbacks))
    }

    /// Records a failed finalize; the chunks stay on the server.
    pub fn fail_finalize(&self, upload_id: &str, message: &str) -> Option<UploadCallbacks> {
        let mut entries = self.lock();
        let entry = entries.get_mut(upload_id)?;
        entry.finalizing = false;
        entry.progress.status = UploadStatus::Error;
        entry.progress.error = Some(message.to_string());
        entry.cancel.cancel();
        Some(entry.callbacks.clone())
    }

    /// Pauses an active upload. Paused or failed uploads are left as-is.
    pub fn pause(&self, upload_id: &str) -> Result<UploadStatus, UploadError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(upload_id)
            .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))?;
        if entry.finalizing {
            return Err(UploadError::Finalizing(upload_id.to_string()));
        }
        if entry.progress.status.is_active() {
            entry.cancel.cancel();
            entry.progress.status = UploadStatus::Paused;
        }
        Ok(entry.progress.status)
    }

    /// Stops all work for an upload and forgets it locally.
    pub fn begin_cancel(&self, upload_id: &str) -> Result<UploadProgress, UploadError> {
        let mut entries = self.lock();
        let entry = entries
            .get(upload_id)
            .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))?;
        if entry.finalizing {
            return Err(UploadError::Finalizing(upload_id.to_string()));
        }
        entry.cancel.cancel();
        let entry = entries.remove(upload_id).map(|e| e.progress);
        entry.ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))
    }

    /// Folds the server's chunk list into local state.
    ///
    /// While uploading, server chunks are only added so progress never
    /// regresses under a running transfer; otherwise the server list
    /// replaces the local one.
    pub fn reconcile(&self, upload_id: &str, server_chunks: &[u32]) -> Option<UploadProgress> {
        let mut entries = self.lock();
        let entry = entries.get_mut(upload_id)?;
        let chunk_size = entry.info.session.chunk_size;
        if !entry.progress.status.is_active() && !entry.finalizing {
            entry.progress.uploaded_chunks.clear();
            entry.progress.bytes_uploaded = 0;
        }
        merge_chunks(&mut entry.progress, chunk_size, server_chunks);
        entry.info.session.uploaded_chunks = entry.progress.uploaded_chunks.clone();
        Some(entry.progress.clone())
    }

    #[cfg(test)]
    pub fn with_entry<R>(&self, upload_id: &str, f: impl FnOnce(&mut UploadEntry) -> R) -> Option<R> {
        self.lock().get_mut(upload_id).map(f)
    }
}

/// Inserts chunk numbers into `progress`, keeping the list sorted and
/// unique, and updates `bytes_uploaded` and the percentage.
///
/// Numbers outside the file are ignored.
pub(crate) fn merge_chunks(progress: &mut UploadProgress, chunk_size: u64, numbers: &[u32]) {
    for &number in numbers {
        let Some(chunk) = ChunkInfo::for_number(number, progress.total_size, chunk_size) else {
            continue;
        };
        if let Err(pos) = progress.uploaded_chunks.binary_search(&number) {
            progress.uploaded_chunks.insert(pos, number);
            progress.bytes_uploaded += chunk.size();
        }
    }
    progress.recompute_percentage();
}
