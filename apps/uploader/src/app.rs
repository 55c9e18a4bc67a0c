//! Command implementations.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use thothcraft_transfer::{ChunkSource, FileSource, SpeedCalculator, checksum_source};
use thothcraft_upload::{
    CoordinationService, HttpCoordinationService, JournalEntry, ResumableUploadClient,
    SessionJournal, UploadCallbacks, UploadError, UploadOptions, UploadProgress,
};
use tokio::sync::mpsc;

use crate::cli::Command;
use crate::config::{Config, TOKEN_ENV};

/// Terminal event of one upload.
enum Outcome {
    Complete(String),
    Failed(String),
}

/// Runs one CLI command to completion.
pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let journal = SessionJournal::new(config.journal_path()?).context("opening session journal")?;

    match command {
        Command::List => list(&journal),
        Command::Upload {
            path,
            chunk_size,
            concurrency,
            content_type,
        } => {
            let mut config = config;
            if let Some(n) = concurrency {
                config.concurrency = n;
            }
            let service = connect(&config)?;
            upload(&config, service, &journal, &path, chunk_size, content_type).await
        }
        Command::Resume { upload_id } => {
            let service = connect(&config)?;
            resume(&config, service, &journal, &upload_id).await
        }
        Command::Status { upload_id } => {
            let service = connect(&config)?;
            status(&config, service, &journal, &upload_id).await
        }
        Command::Cancel { upload_id } => {
            let service = connect(&config)?;
            cancel(&config, service, &journal, &upload_id).await
        }
    }
}

fn connect(config: &Config) -> anyhow::Result<Arc<HttpCoordinationService>> {
    match HttpCoordinationService::new(&config.base_url, &config.api_token) {
        Ok(service) => {
            tracing::debug!(base_url = %service.base_url(), "coordination service configured");
            Ok(Arc::new(service))
        }
        Err(UploadError::InvalidToken) => bail!(
            "no usable API token: set api_token in {} or {TOKEN_ENV}",
            crate::config::config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "the config file".into())
        ),
        Err(e) => Err(e.into()),
    }
}

fn client(
    config: &Config,
    service: Arc<HttpCoordinationService>,
) -> anyhow::Result<ResumableUploadClient> {
    let service: Arc<dyn CoordinationService> = service;
    Ok(ResumableUploadClient::new(service, config.client_config())?)
}

/// Logs progress with speed and ETA.
#[derive(Default)]
struct ProgressReporter {
    speed: SpeedCalculator,
    last_bytes: AtomicU64,
}

impl ProgressReporter {
    /// Restarts speed tracking with `bytes` already on the server, so they
    /// do not count as transferred by this run.
    fn restart_at(&self, bytes: u64) {
        self.speed.reset();
        self.last_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Feeds the newly confirmed bytes to the speed window.
    fn observe(&self, p: &UploadProgress) {
        let previous = self.last_bytes.swap(p.bytes_uploaded, Ordering::Relaxed);
        self.speed.add_sample(p.bytes_uploaded.saturating_sub(previous));
    }

    fn report(&self, p: &UploadProgress) {
        self.observe(p);
        let remaining = p.total_size.saturating_sub(p.bytes_uploaded);
        tracing::info!(
            upload = %p.upload_id,
            "{:>5.1}%  {} / {}  {}/s  eta {}",
            p.progress,
            format_bytes(p.bytes_uploaded),
            format_bytes(p.total_size),
            format_bytes(self.speed.bytes_per_second() as u64),
            self.speed
                .eta(remaining)
                .map(format_duration)
                .unwrap_or_else(|| "--".into()),
        );
    }
}

/// Callbacks that log through `reporter` and forward the outcome.
fn reporting_callbacks(
    reporter: Arc<ProgressReporter>,
    tx: mpsc::UnboundedSender<Outcome>,
) -> UploadCallbacks {
    let done_tx = tx.clone();

    UploadCallbacks::default()
        .on_progress(move |p: &UploadProgress| reporter.report(p))
        .on_complete(move |file_id| {
            let _ = done_tx.send(Outcome::Complete(file_id.to_string()));
        })
        .on_error(move |message| {
            let _ = tx.send(Outcome::Failed(message.to_string()));
        })
}

/// Waits for the upload to finish. Ctrl-C pauses it and returns.
async fn wait_for_outcome(
    client: &ResumableUploadClient,
    journal: &SessionJournal,
    upload_id: &str,
    mut rx: mpsc::UnboundedReceiver<Outcome>,
) -> anyhow::Result<()> {
    let mut paused = false;
    loop {
        tokio::select! {
            outcome = rx.recv() => match outcome {
                Some(Outcome::Complete(file_id)) => {
                    journal.remove(upload_id)?;
                    println!("upload {upload_id} complete: file id {file_id}");
                    return Ok(());
                }
                Some(Outcome::Failed(message)) => {
                    bail!(
                        "upload {upload_id} failed: {message}\n\
                         run `thothcraft-uploader resume {upload_id}` to retry"
                    );
                }
                None => bail!("upload {upload_id} stopped without a result"),
            },
            _ = tokio::signal::ctrl_c(), if !paused => {
                match client.pause_upload(upload_id) {
                    Ok(()) => {
                        println!(
                            "upload {upload_id} paused; continue with `thothcraft-uploader resume {upload_id}`"
                        );
                        return Ok(());
                    }
                    Err(UploadError::Finalizing(_)) => {
                        tracing::info!(upload = %upload_id, "finalizing, waiting for the server");
                        paused = true;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

async fn upload(
    config: &Config,
    service: Arc<HttpCoordinationService>,
    journal: &SessionJournal,
    path: &Path,
    chunk_size: Option<u64>,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    let path = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    let source = FileSource::open(&path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let content_type = content_type.unwrap_or_else(|| guess_content_type(&path).to_string());

    let client = client(config, service)?;
    tracing::info!(
        file = %path.display(),
        size = %format_bytes(source.len()),
        chunk = %format_bytes(chunk_size.unwrap_or(client.config().chunk_size)),
        %content_type,
        "starting upload"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let options = UploadOptions {
        chunk_size,
        content_type: Some(content_type),
        callbacks: reporting_callbacks(Arc::new(ProgressReporter::default()), tx),
    };
    let upload_id = client.initialize_upload(Arc::new(source), options).await?;

    // A small file may already be done; only unfinished uploads are journaled.
    if let Some(info) = client.session_info(&upload_id) {
        journal.record(JournalEntry::from_info(&info, path.clone()))?;
    }
    println!("upload {upload_id} started for {}", path.display());

    wait_for_outcome(&client, journal, &upload_id, rx).await
}

async fn resume(
    config: &Config,
    service: Arc<HttpCoordinationService>,
    journal: &SessionJournal,
    upload_id: &str,
) -> anyhow::Result<()> {
    let entry = journal
        .get(upload_id)
        .with_context(|| format!("no unfinished upload {upload_id} in {}", journal.path().display()))?;
    if entry.is_expired(Utc::now()) {
        journal.remove(upload_id)?;
        bail!("upload session {upload_id} has expired; start a new upload");
    }

    let source = verified_source(&entry).await?;
    let client = client(config, service)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = Arc::new(ProgressReporter::default());
    let callbacks = reporting_callbacks(Arc::clone(&reporter), tx);

    let progress = match client.attach_session(entry.to_info(), callbacks.clone()).await {
        Ok(progress) => progress,
        Err(e @ (UploadError::SessionNotFound(_) | UploadError::SessionExpired(_))) => {
            journal.remove(upload_id)?;
            bail!("cannot resume {upload_id}: {e}");
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(
        upload = %upload_id,
        "resuming at {:.1}% ({}/{} chunks)",
        progress.progress,
        progress.uploaded_chunks.len(),
        progress.total_chunks
    );
    reporter.restart_at(progress.bytes_uploaded);

    client.resume_upload(upload_id, source, callbacks)?;
    wait_for_outcome(&client, journal, upload_id, rx).await
}

/// Reopens the journaled file and checks it still matches the session.
async fn verified_source(entry: &JournalEntry) -> anyhow::Result<Arc<dyn ChunkSource>> {
    let source = FileSource::open(&entry.path)
        .await
        .with_context(|| format!("cannot open {}", entry.path.display()))?;
    if source.len() != entry.total_size {
        bail!(
            "{} is now {} bytes, the upload expects {}",
            entry.path.display(),
            source.len(),
            entry.total_size
        );
    }
    tracing::info!(file = %entry.path.display(), "verifying file hash");
    let hash = checksum_source(&source).await?;
    if hash != entry.file_hash {
        bail!("{} changed since the upload started", entry.path.display());
    }
    Ok(Arc::new(source))
}

async fn status(
    config: &Config,
    service: Arc<HttpCoordinationService>,
    journal: &SessionJournal,
    upload_id: &str,
) -> anyhow::Result<()> {
    let Some(entry) = journal.get(upload_id) else {
        // Not started from this machine: ask the server directly.
        let status = service.upload_status(upload_id).await?;
        println!(
            "{upload_id}: {:.1}% ({} chunks stored)",
            status.progress,
            status.uploaded_chunks.len()
        );
        return Ok(());
    };

    let client = client(config, service)?;
    let progress = client
        .attach_session(entry.to_info(), UploadCallbacks::default())
        .await?;
    println!(
        "{upload_id}: {:.1}% ({}/{} chunks, {} / {}) {}",
        progress.progress,
        progress.uploaded_chunks.len(),
        progress.total_chunks,
        format_bytes(progress.bytes_uploaded),
        format_bytes(progress.total_size),
        entry.path.display()
    );
    Ok(())
}

async fn cancel(
    config: &Config,
    service: Arc<HttpCoordinationService>,
    journal: &SessionJournal,
    upload_id: &str,
) -> anyhow::Result<()> {
    match journal.get(upload_id) {
        Some(entry) => {
            let client = client(config, service)?;
            match client
                .attach_session(entry.to_info(), UploadCallbacks::default())
                .await
            {
                Ok(_) => client.cancel_upload(upload_id).await?,
                Err(UploadError::SessionNotFound(_) | UploadError::SessionExpired(_)) => {
                    tracing::debug!(upload = %upload_id, "session already gone on the server");
                }
                Err(e) => return Err(e.into()),
            }
            journal.remove(upload_id)?;
        }
        None => service.cancel_upload(upload_id).await?,
    }
    println!("upload {upload_id} cancelled");
    Ok(())
}

fn list(journal: &SessionJournal) -> anyhow::Result<()> {
    let pruned = journal.prune_expired(Utc::now())?;
    if pruned > 0 {
        tracing::info!("dropped {pruned} expired upload(s) from the journal");
    }

    let entries = journal.entries();
    if entries.is_empty() {
        println!("no unfinished uploads");
        return Ok(());
    }
    for e in entries {
        let expires = e
            .expires_at
            .map(|at| format!("expires {}", at.format("%Y-%m-%d %H:%M UTC")))
            .unwrap_or_default();
        println!(
            "{}  {}  {}  started {}  {}",
            e.upload_id,
            format_bytes(e.total_size),
            e.path.display(),
            e.created_at.format("%Y-%m-%d %H:%M UTC"),
            expires
        );
    }
    Ok(())
}

/// Formats a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Formats a duration as `1h02m`, `3m05s` or `42s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Guesses a MIME type from the file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "stl" => "model/stl",
        "gcode" => "text/x-gcode",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => thothcraft_protocol::constants::DEFAULT_CONTENT_TYPE,
    }
}
