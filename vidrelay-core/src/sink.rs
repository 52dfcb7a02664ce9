//! Destinations for the bytes of one session.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("sink already finalized")]
    Finalized,
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Exclusively owned byte destination for a single session.
#[async_trait]
pub trait ChunkSink: Send {
    async fn append(&mut self, data: &[u8]) -> SinkResult<()>;

    /// Flushes and closes the write side. Further appends fail.
    async fn finalize(&mut self) -> SinkResult<()>;

    /// Path of the landed artifact, for sinks backed by a file.
    fn location(&self) -> Option<&Path>;

    /// Discards the underlying resource. Idempotent; returns whether
    /// anything was deleted by this call.
    async fn release(&mut self) -> SinkResult<bool>;
}

/// Temporary file sink. The file is deleted on `release`, or on drop if it
/// was never released.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<fs::File>,
    released: bool,
}

impl FileSink {
    pub async fn create(dir: &Path, file_name: &str) -> SinkResult<Self> {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| SinkError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        let path = dir.join(file_name);
        let file = fs::File::create(&path)
            .await
            .map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "temporary sink created");
        Ok(Self {
            path,
            file: Some(file),
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl ChunkSink for FileSink {
    async fn append(&mut self, data: &[u8]) -> SinkResult<()> {
        let file = self.file.as_mut().ok_or(SinkError::Finalized)?;
        if let Err(source) = file.write_all(data).await {
            return Err(self.io_error(source));
        }
        Ok(())
    }

    async fn finalize(&mut self) -> SinkResult<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        if let Err(source) = file.flush().await {
            return Err(self.io_error(source));
        }
        if let Err(source) = file.sync_all().await {
            return Err(self.io_error(source));
        }
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    async fn release(&mut self) -> SinkResult<bool> {
        if self.released {
            return Ok(false);
        }
        self.file.take();
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "temporary sink released");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_error(source)),
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.file.take();
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "temporary sink removed on drop"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove temporary sink")
            }
        }
    }
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Vec<u8>,
    finalized: bool,
    released: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[async_trait]
impl ChunkSink for MemorySink {
    async fn append(&mut self, data: &[u8]) -> SinkResult<()> {
        if self.finalized {
            return Err(SinkError::Finalized);
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn finalize(&mut self) -> SinkResult<()> {
        self.finalized = true;
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        None
    }

    async fn release(&mut self) -> SinkResult<bool> {
        if self.released {
            return Ok(false);
        }
        self.released = true;
        self.buffer = Vec::new();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_sink_writes_and_releases_once() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("tmp");
        let mut sink = FileSink::create(&dir, "video_a.mp4").await.unwrap();
        sink.append(b"hello ").await.unwrap();
        sink.append(b"world").await.unwrap();
        sink.finalize().await.unwrap();
        assert!(matches!(sink.append(b"!").await, Err(SinkError::Finalized)));

        let path = sink.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        assert!(sink.release().await.unwrap());
        assert!(!path.exists());
        assert!(!sink.release().await.unwrap());
    }

    #[tokio::test]
    async fn file_sink_removed_on_drop_without_release() {
        let temp = TempDir::new().unwrap();
        let mut sink = FileSink::create(temp.path(), "video_b.mp4").await.unwrap();
        sink.append(b"partial").await.unwrap();
        let path = sink.path().to_path_buf();
        assert!(path.exists());
        drop(sink);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn release_tolerates_externally_deleted_file() {
        let temp = TempDir::new().unwrap();
        let mut sink = FileSink::create(temp.path(), "video_c.mp4").await.unwrap();
        sink.finalize().await.unwrap();
        std::fs::remove_file(sink.path()).unwrap();
        assert!(!sink.release().await.unwrap());
    }

    #[tokio::test]
    async fn memory_sink_rejects_appends_after_finalize() {
        let mut sink = MemorySink::new();
        sink.append(&[1, 2]).await.unwrap();
        sink.finalize().await.unwrap();
        assert!(sink.append(&[3]).await.is_err());
        assert_eq!(sink.contents(), &[1, 2]);
        assert!(sink.release().await.unwrap());
        assert!(!sink.release().await.unwrap());
    }
}
