use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Response, Status};
use tracing::{debug, warn};

use super::{Downstream, DownstreamConnector, RelayError, RelayResult};
use crate::config::{KeepaliveSection, UpstreamSection};
use crate::proto::{StreamResponse, VideoChunk, VideoStreamingServiceClient};
use crate::result::StreamResult;

type CallHandle = JoinHandle<Result<Response<StreamResponse>, Status>>;

/// Opens one `StreamVideo` call on the next tier per session.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    channel: Channel,
    max_message_bytes: usize,
    queue_depth: usize,
}

impl GrpcConnector {
    /// Builds a lazily connecting channel; connection failures surface on
    /// the first call.
    pub fn new(
        endpoint: &str,
        max_message_bytes: usize,
        keepalive: &KeepaliveSection,
        connect_timeout: Option<Duration>,
    ) -> RelayResult<Self> {
        let mut builder = Endpoint::from_shared(endpoint.to_string())
            .map_err(|err| RelayError::Connect(format!("{endpoint}: {err}")))?
            .http2_keep_alive_interval(keepalive.interval())
            .keep_alive_timeout(keepalive.timeout())
            .keep_alive_while_idle(true);
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(Self {
            channel: builder.connect_lazy(),
            max_message_bytes,
            queue_depth: 1,
        })
    }

    pub fn from_config(upstream: &UpstreamSection) -> RelayResult<Self> {
        Ok(Self::new(
            &upstream.endpoint,
            upstream.max_message_bytes,
            &upstream.keepalive,
            upstream.connect_timeout_secs.map(Duration::from_secs),
        )?
        .with_queue_depth(upstream.queue_depth))
    }

    /// Number of chunks that may wait between the relay and the transport.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }
}

#[async_trait]
impl DownstreamConnector for GrpcConnector {
    async fn open(&self) -> RelayResult<Box<dyn Downstream>> {
        let mut client = VideoStreamingServiceClient::new(self.channel.clone())
            .max_decoding_message_size(self.max_message_bytes)
            .max_encoding_message_size(self.max_message_bytes);
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let parked = CancellationToken::new();
        let body = outbound_body(rx, parked.clone());
        let call = tokio::spawn(async move { client.stream_video(body).await });
        debug!(queue_depth = self.queue_depth, "downstream call opened");
        Ok(Box::new(GrpcDownstream {
            tx: Some(tx),
            call: Some(call),
            parked,
        }))
    }
}

/// Request body of an outbound call. It ends only when the sender is dropped
/// through `close`; once `parked` fires it stays pending for good, so an
/// aborted call never reaches end-of-stream on the wire.
fn outbound_body(
    rx: mpsc::Receiver<VideoChunk>,
    parked: CancellationToken,
) -> impl Stream<Item = VideoChunk> + Send + 'static {
    stream::unfold((rx, parked), |(mut rx, parked)| async move {
        tokio::select! {
            biased;
            _ = parked.cancelled() => futures::future::pending().await,
            chunk = rx.recv() => match chunk {
                Some(chunk) => Some((chunk, (rx, parked))),
                None if parked.is_cancelled() => futures::future::pending().await,
                None => None,
            },
        }
    })
}

/// The running outbound call. Dropping it without `close` aborts the call.
pub struct GrpcDownstream {
    tx: Option<mpsc::Sender<VideoChunk>>,
    call: Option<CallHandle>,
    parked: CancellationToken,
}

impl GrpcDownstream {
    /// Waits for the call to end. The handle stays in `self` until it
    /// resolves, so dropping this future mid-wait still aborts the call.
    async fn outcome(&mut self) -> RelayResult<StreamResult> {
        let Some(call) = self.call.as_mut() else {
            return Err(RelayError::Downstream("call already finished".into()));
        };
        let joined = call.await;
        self.call = None;
        match joined {
            Ok(Ok(response)) => Ok(response.into_inner().into()),
            Ok(Err(status)) => Err(classify(status)),
            Err(err) => Err(RelayError::Downstream(format!("relay call task failed: {err}"))),
        }
    }
}

#[async_trait]
impl Downstream for GrpcDownstream {
    async fn send(&mut self, chunk: VideoChunk) -> RelayResult<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(RelayError::Downstream("send side already closed".into()));
        };
        if tx.send(chunk).await.is_ok() {
            return Ok(());
        }
        // The call stopped consuming; surface how it ended.
        self.tx.take();
        match self.outcome().await {
            Ok(result) => {
                warn!(message = %result.message, "downstream replied before end of input");
                Err(RelayError::Replied(result))
            }
            Err(err) => Err(err),
        }
    }

    async fn close(mut self: Box<Self>) -> RelayResult<StreamResult> {
        self.tx.take();
        self.outcome().await
    }

    fn abort(mut self: Box<Self>) {
        self.parked.cancel();
        if let Some(call) = self.call.take() {
            call.abort();
            debug!("downstream call aborted");
        }
    }
}

impl Drop for GrpcDownstream {
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            self.parked.cancel();
            call.abort();
        }
    }
}

fn classify(status: Status) -> RelayError {
    match status.code() {
        Code::Unavailable => RelayError::Connect(status.message().to_string()),
        _ => RelayError::Downstream(status.to_string()),
    }
}
