use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::trace;

use crate::TransferError;

/// Future returned by [`ChunkSource::read_range`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, TransferError>> + Send + 'a>>;

/// Readable, sliceable byte source for an upload.
///
/// The client never keeps file bytes between sessions; a resumed upload
/// needs the caller to hand the same source back.
pub trait ChunkSource: Send + Sync {
    /// File name reported to the coordination service.
    fn name(&self) -> &str;

    /// Total size in bytes.
    fn len(&self) -> u64;

    /// Returns `true` if the source has no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads bytes `[start, end)`.
    fn read_range(&self, start: u64, end: u64) -> ReadFuture<'_>;
}

fn check_range(start: u64, end: u64, len: u64) -> Result<(), TransferError> {
    if start > end || end > len {
        return Err(TransferError::OutOfRange { start, end, len });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FileSource
// ---------------------------------------------------------------------------

/// A file on disk, reopened for every range so reads can run concurrently.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
    len: u64,
}

impl FileSource {
    /// Opens `path` and records its current size.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Self {
            path: path.to_path_buf(),
            name,
            len: metadata.len(),
        })
    }
}

impl ChunkSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, end: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            check_range(start, end, self.len)?;
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(SeekFrom::Start(start)).await?;
            let mut buf = vec![0u8; (end - start) as usize];
            // A file truncated since `open` surfaces as UnexpectedEof.
            file.read_exact(&mut buf).await?;
            trace!(path = %self.path.display(), start, end, "read range");
            Ok(buf)
        })
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// An in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Arc<[u8]>,
}

impl MemorySource {
    /// Wraps `data` under the given file name.
    pub fn new(name: &str, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.to_string(),
            data: data.into(),
        }
    }
}

impl ChunkSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, start: u64, end: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            check_range(start, end, self.len())?;
            Ok(self.data[start as usize..end as usize].to_vec())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[tokio::test]
    async fn file_source_reads_ranges() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "readings.csv", b"AABBCCDDEE");

        let source = FileSource::open(&path).await.unwrap();
        assert_eq!(source.name(), "readings.csv");
        assert_eq!(source.len(), 10);
        assert!(!source.is_empty());

        assert_eq!(source.read_range(0, 4).await.unwrap(), b"AABB");
        assert_eq!(source.read_range(8, 10).await.unwrap(), b"EE");
        assert!(source.read_range(4, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_source_rejects_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"0123");
        let source = FileSource::open(&path).await.unwrap();

        let err = source.read_range(2, 5).await.unwrap_err();
        assert!(matches!(err, TransferError::OutOfRange { len: 4, .. }));
        let err = source.read_range(3, 2).await.unwrap_err();
        assert!(matches!(err, TransferError::OutOfRange { .. }));
    }

    #[tokio::test]
    async fn file_source_detects_truncation() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"0123456789");
        let source = FileSource::open(&path).await.unwrap();

        std::fs::write(&path, b"0123").unwrap();
        let err = source.read_range(0, 10).await.unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[tokio::test]
    async fn file_source_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = FileSource::open(&dir.path().join("missing.bin")).await;
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[tokio::test]
    async fn file_source_rejects_directory() {
        let dir = TempDir::new().unwrap();
        assert!(FileSource::open(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn memory_source_reads_ranges() {
        let source = MemorySource::new("mem.bin", b"0123456789".to_vec());
        assert_eq!(source.len(), 10);
        assert_eq!(source.read_range(6, 10).await.unwrap(), b"6789");
        assert!(source.read_range(6, 11).await.is_err());
    }
}
