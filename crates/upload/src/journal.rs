//! On-disk record of unfinished uploads.
//!
//! The client keeps sessions in memory only. The journal persists enough
//! to re-attach to a session from a later process: where the file lives,
//! the whole-file hash to check it has not changed, and the server session
//! layout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thothcraft_protocol::UploadSession;
use tracing::debug;

use crate::error::UploadError;
use crate::types::SessionInfo;

/// One unfinished upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub upload_id: String,
    /// Absolute path of the source file.
    pub path: PathBuf,
    pub filename: String,
    pub content_type: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub file_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl JournalEntry {
    pub fn from_info(info: &SessionInfo, path: PathBuf) -> Self {
        Self {
            upload_id: info.session.upload_id.clone(),
            path,
            filename: info.session.filename.clone(),
            content_type: info.content_type.clone(),
            total_size: info.session.total_size,
            chunk_size: info.session.chunk_size,
            file_hash: info.file_hash.clone(),
            created_at: Utc::now(),
            expires_at: info.session.expires_at,
        }
    }

    /// Rebuilds session metadata. The chunk list is left empty; the server
    /// supplies it when the session is attached.
    pub fn to_info(&self) -> SessionInfo {
        SessionInfo {
            session: UploadSession {
                upload_id: self.upload_id.clone(),
                filename: self.filename.clone(),
                total_size: self.total_size,
                chunk_size: self.chunk_size,
                total_chunks: 0,
                uploaded_chunks: Vec::new(),
                expires_at: self.expires_at,
            },
            file_hash: self.file_hash.clone(),
            content_type: self.content_type.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// JSON-file journal keyed by upload id.
///
/// Entries are cached in memory and the whole file is rewritten on every
/// change.
pub struct SessionJournal {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, JournalEntry>>,
}

impl SessionJournal {
    /// Opens the journal at `path`, loading existing entries if the file exists.
    pub fn new(path: PathBuf) -> Result<Self, UploadError> {
        let entries = load_entries(&path)?;
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, JournalEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, JournalEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, upload_id: &str) -> Option<JournalEntry> {
        self.read().get(upload_id).cloned()
    }

    /// Adds or replaces an entry.
    pub fn record(&self, entry: JournalEntry) -> Result<(), UploadError> {
        self.write().insert(entry.upload_id.clone(), entry);
        self.persist()
    }

    /// Removes an entry. Returns it if it existed.
    pub fn remove(&self, upload_id: &str) -> Result<Option<JournalEntry>, UploadError> {
        let removed = self.write().remove(upload_id);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<JournalEntry> {
        let mut entries: Vec<JournalEntry> = self.read().values().cloned().collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.upload_id.cmp(&b.upload_id))
        });
        entries
    }

    /// Drops entries whose server session has expired. Returns how many.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, UploadError> {
        let pruned = {
            let mut map = self.write();
            let before = map.len();
            map.retain(|_, e| !e.is_expired(now));
            before - map.len()
        };
        if pruned > 0 {
            self.persist()?;
        }
        Ok(pruned)
    }

    /// Writes the current entries to disk.
    fn persist(&self) -> Result<(), UploadError> {
        let map = self.read();
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted {} journal entr(ies) to {:?}", map.len(), self.path);
        Ok(())
    }
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, JournalEntry>, UploadError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let entries: BTreeMap<String, JournalEntry> = serde_json::from_str(&data)?;
    debug!("loaded {} journal entr(ies) from {:?}", entries.len(), path);
    Ok(entries)
}

/// Returns the default journal path.
pub fn default_journal_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("thothcraft").join("uploads.json"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
