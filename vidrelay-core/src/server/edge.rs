use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use super::ServerResult;
use crate::config::UpstreamSection;
use crate::proto::{StreamResponse, VideoChunk, VideoStreamingService};
use crate::relay::{DownstreamConnector, GrpcConnector, RelayBridge};
use crate::session::{SessionLease, SessionRegistry};

/// Relay tier: registers a `stream_` session per call and forwards it to
/// the processor.
pub struct EdgeService {
    registry: Arc<dyn SessionRegistry>,
    bridge: RelayBridge,
    shutdown: CancellationToken,
}

impl EdgeService {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        connector: Arc<dyn DownstreamConnector>,
        progress_interval: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            bridge: RelayBridge::new(connector).with_progress_interval(progress_interval),
            shutdown,
        }
    }

    pub fn from_config(
        upstream: &UpstreamSection,
        registry: Arc<dyn SessionRegistry>,
        shutdown: CancellationToken,
    ) -> ServerResult<Self> {
        let connector = GrpcConnector::from_config(upstream)?;
        info!(endpoint = %upstream.endpoint, queue_depth = upstream.queue_depth, "edge relay configured");
        Ok(Self::new(
            registry,
            Arc::new(connector),
            upstream.progress_interval,
            shutdown,
        ))
    }
}

#[tonic::async_trait]
impl VideoStreamingService for EdgeService {
    async fn stream_video(
        &self,
        request: Request<Streaming<VideoChunk>>,
    ) -> Result<Response<StreamResponse>, Status> {
        let lease = SessionLease::open(Arc::clone(&self.registry), "stream");
        let cancel = self.shutdown.child_token();
        info!(session_id = %lease.id(), "relay session started");

        let outcome = self
            .bridge
            .relay(request.into_inner(), Some(lease.session()), &cancel)
            .await;
        let session = lease.session();
        let response = match outcome {
            Ok(result) => {
                info!(
                    session_id = %lease.id(),
                    elapsed_ms = (Utc::now() - session.created_at()).num_milliseconds(),
                    chunks = session.chunk_count(),
                    bytes = session.bytes_received(),
                    success = result.success,
                    message = %result.message,
                    "relay session finished"
                );
                Ok(result)
            }
            Err(err) => {
                warn!(session_id = %lease.id(), error = %err, "relay session failed");
                err.into_response()
            }
        };
        lease.release();
        response.map(|result| Response::new(result.into()))
    }
}
