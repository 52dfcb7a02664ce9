use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{RenditionJob, RenditionProfile, TranscodeError, TranscodeResult, Transcoder};
use crate::result::{aggregate, RenditionResult, StreamResult};

/// Runs every configured rendition against one landed upload.
///
/// Profiles run one after another in table order. A failing profile is
/// recorded and the remaining profiles still run; only cancellation stops
/// the sequence early.
#[derive(Clone)]
pub struct TranscodeOrchestrator {
    transcoder: Arc<dyn Transcoder>,
    output_root: PathBuf,
    profiles: Arc<[RenditionProfile]>,
}

impl TranscodeOrchestrator {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        output_root: impl Into<PathBuf>,
        profiles: Vec<RenditionProfile>,
    ) -> Self {
        Self {
            transcoder,
            output_root: output_root.into(),
            profiles: profiles.into(),
        }
    }

    pub fn profiles(&self) -> &[RenditionProfile] {
        &self.profiles
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn transcoder_name(&self) -> &'static str {
        self.transcoder.name()
    }

    /// Produces every rendition of `artifact` and folds the outcomes into one
    /// terminal result. Returns `TranscodeError::Cancelled` if `cancel` fires
    /// before the last profile finishes.
    pub async fn process(
        &self,
        artifact: &Path,
        cancel: &CancellationToken,
    ) -> TranscodeResult<StreamResult> {
        let file_name = artifact
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("rendition.mp4"));

        let mut results = Vec::with_capacity(self.profiles.len());
        for profile in self.profiles.iter() {
            if cancel.is_cancelled() {
                return Err(TranscodeError::Cancelled);
            }
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
                outcome = self.render(artifact, &file_name, profile) => outcome,
            };
            match outcome {
                Ok(output) => {
                    info!(profile = %profile.name, output = %output.display(), "rendition complete");
                    results.push(RenditionResult::succeeded(&profile.name));
                }
                Err(err) => {
                    warn!(profile = %profile.name, error = %err, "rendition failed");
                    results.push(RenditionResult::failed(&profile.name, err.summary()));
                }
            }
        }

        let result = aggregate(&results);
        info!(success = result.success, message = %result.message, "renditions aggregated");
        Ok(result)
    }

    async fn render(
        &self,
        artifact: &Path,
        file_name: &Path,
        profile: &RenditionProfile,
    ) -> TranscodeResult<PathBuf> {
        let dir = self.output_root.join(&profile.output_subpath);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| TranscodeError::Directory {
                source,
                path: dir.clone(),
            })?;
        let job = RenditionJob {
            input: artifact.to_path_buf(),
            output: dir.join(file_name),
            profile: profile.clone(),
        };
        self.transcoder.transcode(&job).await?;
        Ok(job.output)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::transcode::{StubOutcome, StubTranscoder};

    fn landed(temp: &TempDir) -> PathBuf {
        let path = temp.path().join("video_process_1.mp4");
        std::fs::write(&path, vec![7u8; 450]).unwrap();
        path
    }

    #[tokio::test]
    async fn every_profile_runs_in_table_order() {
        let temp = TempDir::new().unwrap();
        let artifact = landed(&temp);
        let stub = Arc::new(StubTranscoder::new().writing_outputs());
        let orchestrator = TranscodeOrchestrator::new(
            stub.clone(),
            temp.path().join("renditions"),
            RenditionProfile::default_ladder(),
        );

        let result = orchestrator
            .process(&artifact, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, StreamResult::success("all 4 renditions succeeded"));

        let calls = stub.calls();
        let names: Vec<_> = calls.iter().map(|job| job.profile.name.as_str()).collect();
        assert_eq!(names, ["1080p", "720p", "480p", "360p"]);
        assert_eq!(
            calls[1].output,
            temp.path().join("renditions/720p/video_process_1.mp4")
        );
        assert!(temp.path().join("renditions/360p/video_process_1.mp4").exists());
    }

    #[tokio::test]
    async fn failing_profiles_do_not_stop_siblings() {
        let temp = TempDir::new().unwrap();
        let artifact = landed(&temp);
        let stub = Arc::new(StubTranscoder::new().failing("720p").failing("360p"));
        let orchestrator = TranscodeOrchestrator::new(
            stub.clone(),
            temp.path().join("out"),
            RenditionProfile::default_ladder(),
        );

        let result = orchestrator
            .process(&artifact, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.message.starts_with("2/4 succeeded"));
        assert!(result.message.contains("720p: conversion failed"));
        assert!(result.message.contains("360p: conversion failed"));
        assert_eq!(stub.calls().len(), 4);
    }

    #[tokio::test]
    async fn unusable_output_directory_fails_only_that_profile() {
        let temp = TempDir::new().unwrap();
        let artifact = landed(&temp);
        let root = temp.path().join("out");
        std::fs::create_dir_all(&root).unwrap();
        // A regular file where the 480p directory should go.
        std::fs::write(root.join("480p"), b"occupied").unwrap();

        let stub = Arc::new(StubTranscoder::new());
        let orchestrator =
            TranscodeOrchestrator::new(stub.clone(), &root, RenditionProfile::default_ladder());
        let result = orchestrator
            .process(&artifact, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            result.message,
            "3/4 succeeded; failures: [480p: directory creation failed]"
        );
        assert_eq!(stub.calls().len(), 3);
    }

    #[tokio::test]
    async fn total_failure_reports_every_profile() {
        let temp = TempDir::new().unwrap();
        let artifact = landed(&temp);
        let stub = RenditionProfile::default_ladder()
            .iter()
            .fold(StubTranscoder::new(), |stub, profile| stub.failing(&profile.name));
        let orchestrator = TranscodeOrchestrator::new(
            Arc::new(stub),
            temp.path().join("out"),
            RenditionProfile::default_ladder(),
        );
        let result = orchestrator
            .process(&artifact, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        for name in ["1080p", "720p", "480p", "360p"] {
            assert!(result.message.contains(name));
        }
    }

    #[tokio::test]
    async fn cancellation_stops_remaining_profiles() {
        let temp = TempDir::new().unwrap();
        let artifact = landed(&temp);
        let stub = Arc::new(
            StubTranscoder::new().with_outcome("1080p", StubOutcome::Delay(Duration::from_secs(30))),
        );
        let orchestrator = TranscodeOrchestrator::new(
            stub.clone(),
            temp.path().join("out"),
            RenditionProfile::default_ladder(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = orchestrator.process(&artifact, &cancel).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Cancelled));
        assert_eq!(stub.calls().len(), 1);
    }
}
