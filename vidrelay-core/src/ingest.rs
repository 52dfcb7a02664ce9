//! Write-through ingest for one session with advisory ordering checks.

use std::path::Path;
use std::sync::Arc;

use hex::encode as hex_encode;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::proto::VideoChunk;
use crate::session::{Session, SessionId, SessionPhase};
use crate::sink::{ChunkSink, SinkError, SinkResult};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("sink write failed: {0}")]
    Write(#[from] SinkError),
}

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub session_id: SessionId,
    pub bytes: u64,
    pub chunks: u64,
    pub anomalies: u64,
    pub sha256: String,
}

/// Validates chunk ordering and appends payload bytes to the session's sink.
///
/// Ordering is observational: chunks are applied in receipt order and an
/// unexpected sequence number only produces a warning. `finish` consumes the
/// guard, so no chunk can be accepted once ingest is complete.
pub struct IngestGuard<S: ChunkSink> {
    session: Arc<Session>,
    sink: S,
    progress_interval: u64,
    digest: Sha256,
}

impl<S: ChunkSink> IngestGuard<S> {
    pub fn new(session: Arc<Session>, sink: S, progress_interval: u64) -> Self {
        Self {
            session,
            sink,
            progress_interval: progress_interval.max(1),
            digest: Sha256::new(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn accept(&mut self, chunk: &VideoChunk) -> IngestResult<()> {
        self.sink.append(&chunk.data).await?;
        self.digest.update(&chunk.data);

        if let Some(anomaly) = self.session.record_chunk(chunk.sequence, chunk.data.len()) {
            warn!(
                session_id = %self.session.id(),
                expected = anomaly.expected,
                received = anomaly.received,
                "chunk sequence out of order"
            );
        }
        debug!(
            session_id = %self.session.id(),
            sequence = chunk.sequence,
            size = chunk.data.len(),
            "chunk written"
        );

        let chunks = self.session.chunk_count();
        if chunks % self.progress_interval == 0 {
            info!(
                session_id = %self.session.id(),
                chunks,
                bytes = self.session.bytes_received(),
                "ingest progress"
            );
        }
        Ok(())
    }

    /// Finalizes the sink at end of input. On failure the sink is released
    /// before the error is returned.
    pub async fn finish(mut self) -> IngestResult<LandedUpload<S>> {
        if let Err(err) = self.sink.finalize().await {
            self.release_quietly().await;
            return Err(err.into());
        }
        self.session.set_phase(SessionPhase::IngestComplete);
        let summary = IngestSummary {
            session_id: self.session.id().clone(),
            bytes: self.session.bytes_received(),
            chunks: self.session.chunk_count(),
            anomalies: self.session.anomalies(),
            sha256: hex_encode(self.digest.finalize()),
        };
        info!(
            session_id = %summary.session_id,
            bytes = summary.bytes,
            chunks = summary.chunks,
            sha256 = %summary.sha256,
            "received complete upload"
        );
        Ok(LandedUpload {
            session: self.session,
            sink: self.sink,
            summary,
        })
    }

    /// Terminates ingest early (transport failure, cancellation): closes the
    /// write side and discards the sink.
    pub async fn abandon(mut self) {
        if let Err(err) = self.sink.finalize().await {
            warn!(session_id = %self.session.id(), error = %err, "failed to finalize abandoned sink");
        }
        self.release_quietly().await;
    }

    async fn release_quietly(&mut self) {
        if let Err(err) = self.sink.release().await {
            warn!(session_id = %self.session.id(), error = %err, "failed to release sink");
        }
    }
}

/// A finalized upload awaiting processing.
pub struct LandedUpload<S: ChunkSink> {
    session: Arc<Session>,
    sink: S,
    summary: IngestSummary,
}

impl<S: ChunkSink> LandedUpload<S> {
    pub fn summary(&self) -> &IngestSummary {
        &self.summary
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn artifact(&self) -> Option<&Path> {
        self.sink.location()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn release(mut self) -> SinkResult<bool> {
        self.sink.release().await
    }
}
