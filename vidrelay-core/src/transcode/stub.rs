use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{RenditionJob, TranscodeError, TranscodeResult, Transcoder};

#[derive(Debug, Clone)]
pub enum StubOutcome {
    Succeed,
    Fail { status: i32, output: String },
    /// Waits before succeeding, for cancellation tests.
    Delay(Duration),
}

/// Scripted transcoder. Profiles without a scripted outcome succeed and, when
/// `write_outputs` is set, get a small placeholder file.
#[derive(Debug, Default)]
pub struct StubTranscoder {
    outcomes: HashMap<String, StubOutcome>,
    write_outputs: bool,
    calls: Mutex<Vec<RenditionJob>>,
}

impl StubTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, profile: &str, outcome: StubOutcome) -> Self {
        self.outcomes.insert(profile.to_string(), outcome);
        self
    }

    pub fn failing(self, profile: &str) -> Self {
        self.with_outcome(
            profile,
            StubOutcome::Fail {
                status: 1,
                output: format!("{profile}: simulated encoder failure"),
            },
        )
    }

    pub fn writing_outputs(mut self) -> Self {
        self.write_outputs = true;
        self
    }

    pub fn calls(&self) -> Vec<RenditionJob> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn transcode(&self, job: &RenditionJob) -> TranscodeResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job.clone());

        match self.outcomes.get(&job.profile.name) {
            Some(StubOutcome::Fail { status, output }) => {
                return Err(TranscodeError::Tool {
                    status: Some(*status),
                    output: output.clone(),
                })
            }
            Some(StubOutcome::Delay(delay)) => tokio::time::sleep(*delay).await,
            Some(StubOutcome::Succeed) | None => {}
        }

        if self.write_outputs {
            tokio::fs::write(&job.output, job.profile.name.as_bytes())
                .await
                .map_err(|source| TranscodeError::Io {
                    source,
                    path: job.output.clone(),
                })?;
        }
        Ok(())
    }
}
