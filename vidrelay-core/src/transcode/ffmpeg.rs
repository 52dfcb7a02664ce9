use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{RenditionJob, TranscodeError, TranscodeResult, Transcoder};
use crate::config::TranscodeSection;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Fixed codec choices applied to every rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub video_codec: String,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self::from(&TranscodeSection::default())
    }
}

impl From<&TranscodeSection> for EncoderSettings {
    fn from(section: &TranscodeSection) -> Self {
        Self {
            video_codec: section.video_codec.clone(),
            preset: section.preset.clone(),
            audio_codec: section.audio_codec.clone(),
            audio_bitrate: section.audio_bitrate.clone(),
        }
    }
}

/// Runs the external `ffmpeg` binary once per rendition.
pub struct FfmpegTranscoder {
    binary: PathBuf,
    settings: EncoderSettings,
    executor: Arc<dyn CommandExecutor>,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>, settings: EncoderSettings) -> Self {
        Self {
            binary: binary.into(),
            settings,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn from_config(section: &TranscodeSection) -> Self {
        Self::new(section.binary.clone(), EncoderSettings::from(section))
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn arguments(&self, job: &RenditionJob) -> Vec<String> {
        vec![
            "-i".into(),
            job.input.to_string_lossy().into_owned(),
            "-vf".into(),
            job.profile.scale_filter(),
            "-b:v".into(),
            job.profile.target_bitrate.clone(),
            "-c:v".into(),
            self.settings.video_codec.clone(),
            "-preset".into(),
            self.settings.preset.clone(),
            "-c:a".into(),
            self.settings.audio_codec.clone(),
            "-b:a".into(),
            self.settings.audio_bitrate.clone(),
            "-y".into(),
            job.output.to_string_lossy().into_owned(),
        ]
    }

    /// Verifies the binary can be launched (`ffmpeg -version`).
    pub async fn probe(&self) -> TranscodeResult<String> {
        let output = self
            .executor
            .run(&self.binary, &["-version".to_string()])
            .await
            .map_err(|source| TranscodeError::Spawn {
                source,
                binary: self.binary.clone(),
            })?;
        if !output.status.success() {
            return Err(TranscodeError::Tool {
                status: output.status.code(),
                output: combined_output(&output),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn transcode(&self, job: &RenditionJob) -> TranscodeResult<()> {
        info!(profile = %job.profile.name, output = %job.output.display(), "converting rendition");
        let args = self.arguments(job);
        let output = self
            .executor
            .run(&self.binary, &args)
            .await
            .map_err(|source| TranscodeError::Spawn {
                source,
                binary: self.binary.clone(),
            })?;
        if !output.status.success() {
            return Err(TranscodeError::Tool {
                status: output.status.code(),
                output: combined_output(&output),
            });
        }
        debug!(profile = %job.profile.name, "ffmpeg finished");
        Ok(())
    }
}

fn combined_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined.trim().to_string()
}
