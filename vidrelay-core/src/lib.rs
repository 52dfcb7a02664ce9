pub mod client;
pub mod config;
pub mod error;
pub mod ingest;
pub mod proto;
pub mod relay;
pub mod result;
pub mod server;
pub mod session;
pub mod sink;
pub mod transcode;

pub use client::{
    ChunkUploader, FetchError, FetchedMedia, HttpFetcher, UploadError, UploadReport, UploadResult,
};
pub use config::{
    load_vidrelay_config, ClientSection, EdgeSection, KeepaliveSection, ProcessorSection,
    ProfileEntry, TranscodeSection, TransportSection, UpstreamSection, VidrelayConfig,
};
pub use error::{ConfigError, Result};
pub use ingest::{IngestError, IngestGuard, IngestResult, IngestSummary, LandedUpload};
pub use relay::{
    Downstream, DownstreamConnector, GrpcConnector, RelayBridge, RelayError, RelayResult,
};
pub use result::{aggregate, RenditionResult, StreamResult};
pub use server::{EdgeService, ProcessorService, ServerError, ServerResult};
pub use session::{
    InMemorySessionRegistry, OrderingAnomaly, Session, SessionId, SessionLease, SessionPhase,
    SessionRegistry, SessionSnapshot,
};
pub use sink::{ChunkSink, FileSink, MemorySink, SinkError, SinkResult};
pub use transcode::{
    FfmpegTranscoder, PassthroughTranscoder, RenditionJob, RenditionProfile, StubOutcome,
    StubTranscoder, TranscodeError, TranscodeOrchestrator, TranscodeResult, Transcoder,
};
