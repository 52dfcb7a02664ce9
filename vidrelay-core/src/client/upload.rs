use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FetchError, FetchedMedia};
use crate::config::{ClientSection, KeepaliveSection, DEFAULT_PROGRESS_INTERVAL};
use crate::proto::VideoChunk;
use crate::relay::{Downstream, DownstreamConnector, GrpcConnector, RelayError};
use crate::result::StreamResult;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("transport failed: {0}")]
    Transport(#[from] RelayError),
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("upload cancelled")]
    Cancelled,
    #[error("upload timed out after {0:?}")]
    TimedOut(Duration),
    #[error("chunk sequence numbers exhausted after {0} chunks")]
    SequenceExhausted(u64),
}

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub chunks: u64,
    pub bytes: u64,
    pub content_type: String,
    pub result: StreamResult,
}

/// Splits a fetched body into sequenced chunks and streams them over one
/// `StreamVideo` call.
pub struct ChunkUploader {
    connector: Arc<dyn DownstreamConnector>,
    chunk_size: usize,
    progress_interval: u64,
    timeout: Option<Duration>,
}

impl ChunkUploader {
    pub fn new(connector: Arc<dyn DownstreamConnector>, chunk_size: usize) -> Self {
        Self {
            connector,
            chunk_size: chunk_size.max(1),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            timeout: None,
        }
    }

    pub fn from_config(client: &ClientSection) -> UploadResult<Self> {
        let connector = GrpcConnector::new(
            &client.endpoint,
            client.max_message_bytes,
            &KeepaliveSection::default(),
            Some(CONNECT_TIMEOUT),
        )?;
        let mut uploader = Self::new(Arc::new(connector), client.chunk_size);
        uploader.timeout = client.timeout_secs.map(Duration::from_secs);
        Ok(uploader)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress_interval(mut self, chunks: u64) -> Self {
        self.progress_interval = chunks.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub async fn upload(
        &self,
        media: FetchedMedia,
        cancel: &CancellationToken,
    ) -> UploadResult<UploadReport> {
        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => futures::future::pending::<()>().await,
            }
        };
        let report = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            _ = deadline => return Err(UploadError::TimedOut(self.timeout.unwrap_or_default())),
            report = self.stream(media) => report?,
        };
        if !report.result.success {
            return Err(UploadError::Rejected(report.result.message));
        }
        Ok(report)
    }

    async fn stream(&self, media: FetchedMedia) -> UploadResult<UploadReport> {
        let FetchedMedia {
            content_type,
            headers,
            mut body,
            ..
        } = media;
        let mut downstream = self.connector.open().await?;
        let mut outgoing = Outgoing {
            content_type: &content_type,
            headers: &headers,
            next_sequence: Some(0),
            chunks: 0,
            bytes: 0,
            progress_interval: self.progress_interval,
        };

        let mut pending = BytesMut::with_capacity(self.chunk_size);
        while let Some(next) = body.next().await {
            let data = match next {
                Ok(data) => data,
                Err(err) => {
                    downstream.abort();
                    return Err(err.into());
                }
            };
            pending.extend_from_slice(&data);
            while pending.len() >= self.chunk_size {
                let piece = pending.split_to(self.chunk_size);
                if let Err(err) = outgoing.send(downstream.as_mut(), &piece).await {
                    downstream.abort();
                    return outgoing.settle(err);
                }
            }
        }
        if !pending.is_empty() {
            if let Err(err) = outgoing.send(downstream.as_mut(), &pending).await {
                downstream.abort();
                return outgoing.settle(err);
            }
        }

        info!(chunks = outgoing.chunks, bytes = outgoing.bytes, "upload sent, awaiting result");
        let result = downstream.close().await?;
        info!(success = result.success, message = %result.message, "upload finished");
        Ok(outgoing.report(result))
    }
}

struct Outgoing<'a> {
    content_type: &'a str,
    headers: &'a HashMap<String, String>,
    next_sequence: Option<i32>,
    chunks: u64,
    bytes: u64,
    progress_interval: u64,
}

impl Outgoing<'_> {
    async fn send(&mut self, downstream: &mut dyn Downstream, data: &[u8]) -> UploadResult<()> {
        let sequence = self
            .next_sequence
            .ok_or(UploadError::SequenceExhausted(self.chunks))?;
        let chunk = VideoChunk {
            data: data.to_vec(),
            content_type: self.content_type.to_string(),
            headers: self.headers.clone(),
            sequence,
        };
        downstream.send(chunk).await?;
        debug!(sequence, size = data.len(), "chunk sent");
        self.next_sequence = sequence.checked_add(1);
        self.chunks += 1;
        self.bytes += data.len() as u64;
        if self.chunks % self.progress_interval == 0 {
            info!(chunks = self.chunks, bytes = self.bytes, "upload progress");
        }
        Ok(())
    }

    /// Turns a send failure into the upload's outcome. A tier that replied
    /// early still produced a terminal result.
    fn settle(&self, err: UploadError) -> UploadResult<UploadReport> {
        match err {
            UploadError::Transport(RelayError::Replied(result)) => {
                warn!(chunks = self.chunks, message = %result.message, "tier replied before the upload finished");
                Ok(self.report(result))
            }
            other => Err(other),
        }
    }

    fn report(&self, result: StreamResult) -> UploadReport {
        UploadReport {
            chunks: self.chunks,
            bytes: self.bytes,
            content_type: self.content_type.to_string(),
            result,
        }
    }
}
