//! Rendition production: the transcoder capability, its variants and the
//! orchestrator that fans one landed upload out to every profile.

mod error;
mod ffmpeg;
mod orchestrator;
mod passthrough;
mod profile;
mod stub;

use std::path::PathBuf;

use async_trait::async_trait;

pub use error::{TranscodeError, TranscodeResult};
pub use ffmpeg::{CommandExecutor, EncoderSettings, FfmpegTranscoder, SystemCommandExecutor};
pub use orchestrator::TranscodeOrchestrator;
pub use passthrough::PassthroughTranscoder;
pub use profile::RenditionProfile;
pub use stub::{StubOutcome, StubTranscoder};

#[derive(Debug, Clone)]
pub struct RenditionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: RenditionProfile,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produces `job.output` from `job.input`. The output directory already exists.
    async fn transcode(&self, job: &RenditionJob) -> TranscodeResult<()>;
}
