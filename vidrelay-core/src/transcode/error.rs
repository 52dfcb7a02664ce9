use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to create output directory {path}: {source}")]
    Directory {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        source: std::io::Error,
        binary: PathBuf,
    },
    #[error("transcoder exited with status {status:?}\nOutput: {output}")]
    Tool { status: Option<i32>, output: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("transcode cancelled")]
    Cancelled,
}

impl TranscodeError {
    /// Short label used when enumerating failed renditions to the caller.
    pub fn summary(&self) -> &'static str {
        match self {
            TranscodeError::Directory { .. } => "directory creation failed",
            TranscodeError::Spawn { .. } | TranscodeError::Tool { .. } => "conversion failed",
            TranscodeError::Io { .. } => "output write failed",
            TranscodeError::Cancelled => "cancelled",
        }
    }
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;
