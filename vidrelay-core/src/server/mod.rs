//! gRPC hosting for both tiers: the edge relays, the processor lands and
//! transcodes.

mod edge;
mod processor;

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use crate::config::TransportSection;
use crate::error::ConfigError;
use crate::proto::{VideoStreamingService, VideoStreamingServiceServer};
use crate::relay::RelayError;
use crate::transcode::TranscodeError;

pub use edge::EdgeService;
pub use processor::ProcessorService;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        source: std::io::Error,
        addr: SocketAddr,
    },
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("relay setup failed: {0}")]
    Relay(#[from] RelayError),
    #[error("transcoder unavailable: {0}")]
    Transcoder(#[from] TranscodeError),
}

pub type ServerResult<T> = Result<T, ServerError>;

pub async fn bind(transport: &TransportSection) -> ServerResult<TcpListener> {
    let addr = transport.listen_addr()?;
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { source, addr })
}

/// Wraps a service with the tier's message size limit in both directions.
pub fn service_server<S: VideoStreamingService>(
    service: S,
    max_message_bytes: usize,
) -> VideoStreamingServiceServer<S> {
    VideoStreamingServiceServer::new(service)
        .max_decoding_message_size(max_message_bytes)
        .max_encoding_message_size(max_message_bytes)
}

/// Serves `service` on `listener` until `shutdown` is cancelled.
pub async fn serve<S: VideoStreamingService>(
    service: S,
    transport: &TransportSection,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> ServerResult<()> {
    let mut builder = Server::builder()
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .tcp_nodelay(true)
        .http2_keepalive_interval(Some(transport.keepalive.interval()))
        .http2_keepalive_timeout(Some(transport.keepalive.timeout()));
    if let Some(age) = transport.max_connection_age() {
        builder = builder.max_connection_age(age);
    }

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, max_message_bytes = transport.max_message_bytes, "gRPC server listening");
    }
    builder
        .add_service(service_server(service, transport.max_message_bytes))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await;
            info!("shutdown requested, draining sessions");
        })
        .await?;
    Ok(())
}
