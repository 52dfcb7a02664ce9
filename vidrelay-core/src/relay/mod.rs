//! Chunk forwarding from one client-streaming call into the next tier.

mod grpc;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_PROGRESS_INTERVAL;
use crate::ingest::IngestError;
use crate::proto::VideoChunk;
use crate::result::StreamResult;
use crate::session::{Session, SessionPhase};

pub use grpc::{GrpcConnector, GrpcDownstream};

/// Errors that end a session before a terminal result exists.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("inbound stream failed: {0}")]
    Inbound(Status),
    #[error("downstream tier failed: {0}")]
    Downstream(String),
    #[error("could not reach downstream tier: {0}")]
    Connect(String),
    #[error("write failed: {0}")]
    Write(#[from] IngestError),
    #[error("session cancelled")]
    Cancelled,
    #[error("downstream tier replied before end of input: {}", .0.message)]
    Replied(StreamResult),
}

impl RelayError {
    /// Maps a session-fatal error onto the RPC reply. Tier-side failures
    /// become an unsuccessful terminal result; a broken inbound stream keeps
    /// its transport status and cancellation is reported as such.
    pub fn into_response(self) -> Result<StreamResult, Status> {
        match self {
            RelayError::Inbound(status) => Err(status),
            RelayError::Cancelled => Err(Status::cancelled("session cancelled")),
            RelayError::Replied(result) => Ok(result),
            other => Ok(StreamResult::failure(other.to_string())),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Send side of one outbound client-streaming call.
#[async_trait]
pub trait Downstream: Send {
    async fn send(&mut self, chunk: VideoChunk) -> RelayResult<()>;

    /// Half-closes the outbound stream and waits for the tier's terminal result.
    async fn close(self: Box<Self>) -> RelayResult<StreamResult>;

    /// Resets the call so the next tier never sees end-of-input.
    fn abort(self: Box<Self>);
}

#[async_trait]
pub trait DownstreamConnector: Send + Sync {
    async fn open(&self) -> RelayResult<Box<dyn Downstream>>;
}

pub struct RelayBridge {
    connector: Arc<dyn DownstreamConnector>,
    progress_interval: u64,
}

impl RelayBridge {
    pub fn new(connector: Arc<dyn DownstreamConnector>) -> Self {
        Self {
            connector,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, chunks: u64) -> Self {
        self.progress_interval = chunks.max(1);
        self
    }

    /// Forwards every inbound chunk unmodified, one at a time, and returns
    /// the downstream tier's terminal result verbatim.
    ///
    /// Any inbound read failure, outbound send failure or cancellation aborts
    /// the outbound call and ends the relay.
    pub async fn relay<S>(
        &self,
        mut inbound: S,
        session: Option<&Session>,
        cancel: &CancellationToken,
    ) -> RelayResult<StreamResult>
    where
        S: Stream<Item = Result<VideoChunk, Status>> + Unpin + Send,
    {
        let mut downstream = tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            opened = self.connector.open() => opened?,
        };

        let mut forwarded: u64 = 0;
        let mut bytes: u64 = 0;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    downstream.abort();
                    return Err(RelayError::Cancelled);
                }
                next = inbound.next() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(status)) => {
                    downstream.abort();
                    return Err(RelayError::Inbound(status));
                }
                None => break,
            };

            let sequence = chunk.sequence;
            let size = chunk.data.len();
            if let Some(session) = session {
                if let Some(anomaly) = session.record_chunk(sequence, size) {
                    warn!(
                        session_id = %session.id(),
                        expected = anomaly.expected,
                        received = anomaly.received,
                        "chunk sequence out of order"
                    );
                }
            }

            let sent = tokio::select! {
                _ = cancel.cancelled() => Err(RelayError::Cancelled),
                sent = downstream.send(chunk) => sent,
            };
            match sent {
                Ok(()) => {}
                Err(RelayError::Replied(result)) => {
                    downstream.abort();
                    return Ok(result);
                }
                Err(err) => {
                    downstream.abort();
                    return Err(err);
                }
            }

            forwarded += 1;
            bytes += size as u64;
            debug!(sequence, size, "chunk forwarded");
            if forwarded % self.progress_interval == 0 {
                info!(chunks = forwarded, bytes, "relay progress");
            }
        }

        if let Some(session) = session {
            session.set_phase(SessionPhase::IngestComplete);
        }
        info!(chunks = forwarded, bytes, "inbound complete, awaiting downstream result");

        tokio::select! {
            _ = cancel.cancelled() => Err(RelayError::Cancelled),
            result = downstream.close() => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_failures_keep_their_status() {
        let response = RelayError::Inbound(Status::data_loss("reset")).into_response();
        assert_eq!(response.unwrap_err().code(), tonic::Code::DataLoss);
    }

    #[test]
    fn cancellation_is_not_a_data_error() {
        let response = RelayError::Cancelled.into_response();
        assert_eq!(response.unwrap_err().code(), tonic::Code::Cancelled);
    }

    #[test]
    fn early_reply_is_forwarded_verbatim() {
        let reply = StreamResult::failure("upload rejected by tier");
        let response = RelayError::Replied(reply.clone()).into_response().unwrap();
        assert_eq!(response, reply);
    }

    #[test]
    fn tier_failures_become_unsuccessful_results() {
        let result = RelayError::Connect("connection refused".into())
            .into_response()
            .unwrap();
        assert!(!result.success);
        assert!(result.message.contains("connection refused"));
    }
}
