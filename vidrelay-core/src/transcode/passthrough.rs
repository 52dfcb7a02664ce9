use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{RenditionJob, TranscodeError, TranscodeResult, Transcoder};

/// In-process variant: copies the landed payload into each rendition slot
/// without re-encoding.
#[derive(Debug, Default)]
pub struct PassthroughTranscoder;

#[async_trait]
impl Transcoder for PassthroughTranscoder {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn transcode(&self, job: &RenditionJob) -> TranscodeResult<()> {
        let bytes = fs::copy(&job.input, &job.output)
            .await
            .map_err(|source| TranscodeError::Io {
                source,
                path: job.output.clone(),
            })?;
        debug!(profile = %job.profile.name, bytes, "rendition copied");
        Ok(())
    }
}
