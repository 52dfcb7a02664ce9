use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::proto::CHUNK_ENVELOPE_ALLOWANCE;
use crate::transcode::RenditionProfile;

pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VidrelayConfig {
    pub edge: EdgeSection,
    pub processor: ProcessorSection,
    pub upstream: UpstreamSection,
    pub client: ClientSection,
    #[serde(default)]
    pub transcode: TranscodeSection,
    #[serde(default)]
    pub profiles: Vec<ProfileEntry>,
}

impl VidrelayConfig {
    /// Rendition table in configured order, falling back to the built-in
    /// 1080p/720p/480p/360p ladder when the file declares none.
    pub fn rendition_profiles(&self) -> Vec<RenditionProfile> {
        if self.profiles.is_empty() {
            return RenditionProfile::default_ladder();
        }
        self.profiles
            .iter()
            .map(|entry| RenditionProfile {
                name: entry.name.clone(),
                target_height: entry.height,
                target_bitrate: entry.bitrate.clone(),
                output_subpath: entry
                    .subpath
                    .clone()
                    .unwrap_or_else(|| entry.name.clone()),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let profiles = self.rendition_profiles();
        if profiles.is_empty() {
            return Err(ConfigError::Invalid("rendition table is empty".into()));
        }
        let mut seen = HashSet::new();
        for profile in &profiles {
            if profile.target_height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "profile {} has zero height",
                    profile.name
                )));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate profile name {}",
                    profile.name
                )));
            }
        }
        if self.client.chunk_size == 0 {
            return Err(ConfigError::Invalid("client.chunk_size must be positive".into()));
        }
        if self.upstream.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "upstream.queue_depth must be positive".into(),
            ));
        }
        if self.processor.progress_interval == 0 {
            return Err(ConfigError::Invalid(
                "processor.progress_interval must be positive".into(),
            ));
        }
        let envelope = self.client.chunk_size + CHUNK_ENVELOPE_ALLOWANCE;
        for (label, limit) in [
            ("client.max_message_bytes", self.client.max_message_bytes),
            ("edge.max_message_bytes", self.edge.transport.max_message_bytes),
        ] {
            if envelope > limit {
                return Err(ConfigError::Invalid(format!(
                    "client.chunk_size {} does not fit {label} {limit}",
                    self.client.chunk_size
                )));
            }
        }
        if self.upstream.max_message_bytes > self.processor.transport.max_message_bytes {
            return Err(ConfigError::Invalid(format!(
                "upstream.max_message_bytes {} exceeds processor.max_message_bytes {}",
                self.upstream.max_message_bytes, self.processor.transport.max_message_bytes
            )));
        }
        Ok(())
    }
}

/// Listener settings shared by both tiers.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportSection {
    pub listen: String,
    pub max_message_bytes: usize,
    #[serde(default)]
    pub keepalive: KeepaliveSection,
    pub max_connection_age_secs: Option<u64>,
}

impl TransportSection {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|err| ConfigError::Invalid(format!("listen address {}: {err}", self.listen)))
    }

    pub fn max_connection_age(&self) -> Option<Duration> {
        self.max_connection_age_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveSection {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl KeepaliveSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            timeout_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeSection {
    #[serde(flatten)]
    pub transport: TransportSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorSection {
    #[serde(flatten)]
    pub transport: TransportSection,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    pub session_timeout_secs: Option<u64>,
}

impl ProcessorSection {
    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    pub endpoint: String,
    pub max_message_bytes: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_upstream_keepalive")]
    pub keepalive: KeepaliveSection,
    pub connect_timeout_secs: Option<u64>,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    pub endpoint: String,
    pub source_url: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    pub max_message_bytes: usize,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeSection {
    pub binary: PathBuf,
    pub video_codec: String,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for TranscodeSection {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            video_codec: "libx264".into(),
            preset: "medium".into(),
            audio_codec: "aac".into(),
            audio_bitrate: "128k".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileEntry {
    pub name: String,
    pub height: u32,
    pub bitrate: String,
    pub subpath: Option<String>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}

fn default_queue_depth() -> usize {
    1
}

fn default_upstream_keepalive() -> KeepaliveSection {
    KeepaliveSection {
        interval_secs: 10,
        timeout_secs: 2,
    }
}

pub fn load_vidrelay_config<P: AsRef<Path>>(path: P) -> Result<VidrelayConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
