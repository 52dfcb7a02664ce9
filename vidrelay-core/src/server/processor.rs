use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use crate::config::VidrelayConfig;
use crate::ingest::{IngestError, IngestGuard};
use crate::proto::{StreamResponse, VideoChunk, VideoStreamingService};
use crate::relay::{RelayError, RelayResult};
use crate::result::StreamResult;
use crate::session::{SessionLease, SessionPhase, SessionRegistry};
use crate::sink::FileSink;
use crate::transcode::{TranscodeError, TranscodeOrchestrator, Transcoder};

/// Terminal tier: lands each upload in a temporary file, then runs the
/// rendition table against it.
pub struct ProcessorService {
    registry: Arc<dyn SessionRegistry>,
    orchestrator: TranscodeOrchestrator,
    temp_dir: PathBuf,
    progress_interval: u64,
    session_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl ProcessorService {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        orchestrator: TranscodeOrchestrator,
        temp_dir: impl Into<PathBuf>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            temp_dir: temp_dir.into(),
            progress_interval: crate::config::DEFAULT_PROGRESS_INTERVAL,
            session_timeout: None,
            shutdown,
        }
    }

    pub fn from_config(
        config: &VidrelayConfig,
        registry: Arc<dyn SessionRegistry>,
        transcoder: Arc<dyn Transcoder>,
        shutdown: CancellationToken,
    ) -> Self {
        let orchestrator = TranscodeOrchestrator::new(
            transcoder,
            config.processor.output_dir.clone(),
            config.rendition_profiles(),
        );
        let mut service = Self::new(
            registry,
            orchestrator,
            config.processor.temp_dir.clone(),
            shutdown,
        )
        .with_progress_interval(config.processor.progress_interval);
        service.session_timeout = config.processor.session_timeout();
        service
    }

    pub fn with_progress_interval(mut self, chunks: u64) -> Self {
        self.progress_interval = chunks.max(1);
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Lands `inbound` and produces every rendition. The temporary artifact
    /// and the registry entry are gone when this returns, whatever the outcome.
    pub async fn process_upload<S>(
        &self,
        mut inbound: S,
        cancel: &CancellationToken,
    ) -> RelayResult<StreamResult>
    where
        S: Stream<Item = Result<VideoChunk, Status>> + Unpin + Send,
    {
        let lease = SessionLease::open(Arc::clone(&self.registry), "process");
        let file_name = format!("video_{}.mp4", lease.id());
        let sink = FileSink::create(&self.temp_dir, &file_name)
            .await
            .map_err(IngestError::from)?;
        info!(session_id = %lease.id(), path = %sink.path().display(), "processing session started");

        let mut guard = IngestGuard::new(Arc::clone(lease.session()), sink, self.progress_interval);
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    guard.abandon().await;
                    return Err(RelayError::Cancelled);
                }
                next = inbound.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if let Err(err) = guard.accept(&chunk).await {
                        guard.abandon().await;
                        return Err(err.into());
                    }
                }
                Some(Err(status)) => {
                    guard.abandon().await;
                    return Err(RelayError::Inbound(status));
                }
                None => break,
            }
        }

        let landed = guard.finish().await?;
        landed.session().set_phase(SessionPhase::Processing);
        let outcome = match landed.artifact() {
            Some(artifact) => self.orchestrator.process(artifact, cancel).await,
            None => Ok(StreamResult::failure("upload landed without an artifact")),
        };
        if let Err(err) = landed.release().await {
            warn!(session_id = %lease.id(), error = %err, "failed to remove landed upload");
        }
        lease.release();

        match outcome {
            Ok(result) => Ok(result),
            Err(TranscodeError::Cancelled) => Err(RelayError::Cancelled),
            Err(err) => Ok(StreamResult::failure(err.to_string())),
        }
    }

    fn session_token(&self) -> CancellationToken {
        let cancel = self.shutdown.child_token();
        if let Some(timeout) = self.session_timeout {
            let timer = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = timer.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        warn!(timeout_secs = timeout.as_secs(), "session deadline exceeded");
                        timer.cancel();
                    }
                }
            });
        }
        cancel
    }
}

#[tonic::async_trait]
impl VideoStreamingService for ProcessorService {
    async fn stream_video(
        &self,
        request: Request<Streaming<VideoChunk>>,
    ) -> Result<Response<StreamResponse>, Status> {
        let cancel = self.session_token();
        // Ends the deadline timer once the session is over.
        let _deadline = cancel.clone().drop_guard();

        let response = match self.process_upload(request.into_inner(), &cancel).await {
            Ok(result) => {
                info!(success = result.success, message = %result.message, "processing session finished");
                Ok(result)
            }
            Err(err) => {
                warn!(error = %err, "processing session failed");
                err.into_response()
            }
        };
        response.map(|result| Response::new(result.into()))
    }
}
