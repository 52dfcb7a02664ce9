//! Generated `videostream` wire types and the `VideoStreamingService` stubs.

#![allow(clippy::derive_partial_eq_without_eq)]

tonic::include_proto!("videostream");

pub use video_streaming_service_client::VideoStreamingServiceClient;
pub use video_streaming_service_server::{VideoStreamingService, VideoStreamingServiceServer};

/// Room reserved on top of a chunk's payload for field tags, content type and
/// origin headers when checking a chunk size against a message limit.
pub const CHUNK_ENVELOPE_ALLOWANCE: usize = 64 * 1024;
