use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vidrelay_core::server::{self, EdgeService, ProcessorService, ServerError};
use vidrelay_core::{
    load_vidrelay_config, ChunkUploader, ConfigError, FetchError, FfmpegTranscoder, HttpFetcher,
    InMemorySessionRegistry, PassthroughTranscoder, RenditionProfile, SessionRegistry,
    Transcoder, UploadError, UploadReport, VidrelayConfig,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(#[from] ServerError),
    #[error("{0}")]
    Upload(#[from] UploadError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked video relay and rendition control", long_about = None)]
pub struct Cli {
    /// Path to vidrelay.toml
    #[arg(long, env = "VIDRELAY_CONFIG", default_value = "configs/vidrelay.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the relay tier
    Edge(EdgeArgs),
    /// Serve the landing and rendition tier
    Processor(ProcessorArgs),
    /// Fetch a source and stream it to a tier
    Upload(UploadArgs),
    /// Print the rendition table
    Profiles,
    /// Check config, transcoder and directories
    Check,
}

#[derive(Args, Debug, Default)]
pub struct EdgeArgs {
    /// Listen address (overrides edge.listen)
    #[arg(long, env = "VIDRELAY_EDGE_LISTEN")]
    pub listen: Option<String>,
    /// Processor endpoint (overrides upstream.endpoint)
    #[arg(long, env = "VIDRELAY_UPSTREAM")]
    pub upstream: Option<String>,
}

#[derive(Args, Debug)]
pub struct ProcessorArgs {
    /// Listen address (overrides processor.listen)
    #[arg(long, env = "VIDRELAY_PROCESSOR_LISTEN")]
    pub listen: Option<String>,
    /// Directory for in-flight uploads
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,
    /// Root directory for renditions
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Rendition backend
    #[arg(long, value_enum, default_value_t = TranscoderChoice::Ffmpeg)]
    pub transcoder: TranscoderChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TranscoderChoice {
    Ffmpeg,
    Passthrough,
}

#[derive(Args, Debug, Default)]
pub struct UploadArgs {
    /// Source media URL (http, https or file)
    #[arg(long, env = "VIDRELAY_SOURCE_URL")]
    pub url: Option<String>,
    /// Tier endpoint (overrides client.endpoint)
    #[arg(long, env = "VIDRELAY_ENDPOINT")]
    pub endpoint: Option<String>,
    /// Bytes per chunk (overrides client.chunk_size)
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

pub async fn run(cli: Cli, shutdown: CancellationToken) -> Result<()> {
    if let Commands::Check = cli.command {
        let report = health_check(&cli.config).await;
        render(&report, cli.format)?;
        if report
            .iter()
            .any(|entry| matches!(entry.status, CheckStatus::Error))
        {
            return Err(AppError::MissingResource(
                "one or more checks failed".to_string(),
            ));
        }
        return Ok(());
    }

    let config = load_vidrelay_config(&cli.config)?;
    match cli.command {
        Commands::Edge(args) => serve_edge(config, args, shutdown).await?,
        Commands::Processor(args) => serve_processor(config, args, shutdown).await?,
        Commands::Upload(args) => {
            let report = upload(config, args, shutdown).await?;
            render(&report, cli.format)?;
        }
        Commands::Profiles => {
            let table = ProfileTable::from_config(&config);
            render(&table, cli.format)?;
        }
        Commands::Check => {}
    }
    Ok(())
}

fn apply_edge_overrides(mut config: VidrelayConfig, args: &EdgeArgs) -> VidrelayConfig {
    if let Some(listen) = &args.listen {
        config.edge.transport.listen = listen.clone();
    }
    if let Some(upstream) = &args.upstream {
        config.upstream.endpoint = upstream.clone();
    }
    config
}

fn apply_processor_overrides(mut config: VidrelayConfig, args: &ProcessorArgs) -> VidrelayConfig {
    if let Some(listen) = &args.listen {
        config.processor.transport.listen = listen.clone();
    }
    if let Some(dir) = &args.temp_dir {
        config.processor.temp_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.processor.output_dir = dir.clone();
    }
    config
}

fn apply_upload_overrides(mut config: VidrelayConfig, args: &UploadArgs) -> VidrelayConfig {
    if let Some(url) = &args.url {
        config.client.source_url = Some(url.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        config.client.endpoint = endpoint.clone();
    }
    if let Some(size) = args.chunk_size {
        config.client.chunk_size = size;
    }
    config
}

async fn serve_edge(config: VidrelayConfig, args: EdgeArgs, shutdown: CancellationToken) -> Result<()> {
    let config = apply_edge_overrides(config, &args);
    config.validate()?;
    let registry: Arc<dyn SessionRegistry> = Arc::new(InMemorySessionRegistry::new());
    let service = EdgeService::from_config(&config.upstream, registry, shutdown.clone())?;
    let transport = &config.edge.transport;
    let listener = server::bind(transport).await?;
    info!(listen = %transport.listen, upstream = %config.upstream.endpoint, "edge tier starting");
    server::serve(service, transport, listener, shutdown).await?;
    Ok(())
}

async fn serve_processor(
    config: VidrelayConfig,
    args: ProcessorArgs,
    shutdown: CancellationToken,
) -> Result<()> {
    let config = apply_processor_overrides(config, &args);
    config.validate()?;
    let transcoder = build_transcoder(&config, args.transcoder).await?;
    let registry: Arc<dyn SessionRegistry> = Arc::new(InMemorySessionRegistry::new());
    let service = ProcessorService::from_config(&config, registry, transcoder, shutdown.clone());
    let transport = &config.processor.transport;
    let listener = server::bind(transport).await?;
    info!(
        listen = %transport.listen,
        temp_dir = %config.processor.temp_dir.display(),
        output_dir = %config.processor.output_dir.display(),
        "processor tier starting"
    );
    server::serve(service, transport, listener, shutdown).await?;
    Ok(())
}

async fn build_transcoder(
    config: &VidrelayConfig,
    choice: TranscoderChoice,
) -> Result<Arc<dyn Transcoder>> {
    match choice {
        TranscoderChoice::Ffmpeg => {
            let ffmpeg = FfmpegTranscoder::from_config(&config.transcode);
            let version = ffmpeg.probe().await.map_err(ServerError::from)?;
            info!(binary = %ffmpeg.binary().display(), %version, "transcoder available");
            Ok(Arc::new(ffmpeg))
        }
        TranscoderChoice::Passthrough => Ok(Arc::new(PassthroughTranscoder)),
    }
}

async fn upload(
    config: VidrelayConfig,
    args: UploadArgs,
    shutdown: CancellationToken,
) -> Result<UploadReport> {
    let config = apply_upload_overrides(config, &args);
    config.validate()?;
    let url = config
        .client
        .source_url
        .clone()
        .ok_or_else(|| AppError::MissingResource("no source url (use --url)".to_string()))?;
    let uploader = ChunkUploader::from_config(&config.client)?;
    let fetcher = match config.client.timeout_secs {
        Some(secs) => HttpFetcher::with_timeout(Duration::from_secs(secs))?,
        None => HttpFetcher::default(),
    };
    let media = fetcher.fetch(&url).await?;
    info!(%url, endpoint = %config.client.endpoint, chunk_size = uploader.chunk_size(), "upload starting");
    Ok(uploader.upload(media, &shutdown).await?)
}

async fn health_check(config_path: &Path) -> Vec<HealthEntry> {
    let mut results = Vec::new();
    let config = match load_vidrelay_config(config_path) {
        Ok(config) => {
            results.push(HealthEntry::ok("config", config_path.display().to_string()));
            config
        }
        Err(err) => {
            results.push(HealthEntry::error("config", err.to_string()));
            return results;
        }
    };
    match config.validate() {
        Ok(()) => results.push(HealthEntry::ok(
            "validation",
            format!("{} rendition profiles", config.rendition_profiles().len()),
        )),
        Err(err) => results.push(HealthEntry::error("validation", err.to_string())),
    }

    let ffmpeg = FfmpegTranscoder::from_config(&config.transcode);
    match ffmpeg.probe().await {
        Ok(version) => results.push(HealthEntry::ok("transcoder", version)),
        Err(err) => results.push(HealthEntry::error("transcoder", err.to_string())),
    }

    results.push(check_directory("temp_dir", &config.processor.temp_dir));
    results.push(check_directory("output_dir", &config.processor.output_dir));
    results
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, path.display().to_string()),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(
            name,
            format!("{} not found (created on first upload)", path.display()),
        ),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct ProfileTable {
    pub output_dir: PathBuf,
    pub rows: Vec<RenditionProfile>,
}

impl ProfileTable {
    fn from_config(config: &VidrelayConfig) -> Self {
        Self {
            output_dir: config.processor.output_dir.clone(),
            rows: config.rendition_profiles(),
        }
    }
}

impl DisplayFallback for ProfileTable {
    fn display(&self) -> String {
        self.rows
            .iter()
            .map(|profile| {
                format!(
                    "{} | height={} | bitrate={} | dir={}",
                    profile.name,
                    profile.target_height,
                    profile.target_bitrate,
                    self.output_dir.join(&profile.output_subpath).display()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for UploadReport {
    fn display(&self) -> String {
        format!(
            "{result}\nchunks={chunks} bytes={bytes} content_type={content_type}",
            result = self.result,
            chunks = self.chunks,
            bytes = self.bytes,
            content_type = self.content_type
        )
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!(
            "[{status}] {name}: {detail}",
            status = self.status,
            name = self.name,
            detail = self.detail
        )
    }
}
