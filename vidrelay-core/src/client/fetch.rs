use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Client;
use thiserror::Error;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::info;
use url::Url;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid source url {0}")]
    InvalidUrl(String),
}

pub type FetchResult<T> = Result<T, FetchError>;

/// A source opened for streaming.
pub struct FetchedMedia {
    pub content_type: String,
    /// Response headers, first value per name.
    pub headers: HashMap<String, String>,
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, FetchResult<Bytes>>,
}

impl std::fmt::Debug for FetchedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedMedia")
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn with_timeout(timeout: Duration) -> FetchResult<Self> {
        let client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self::new(client))
    }

    pub async fn fetch(&self, url: &str) -> FetchResult<FetchedMedia> {
        let parsed = Url::parse(url).map_err(|err| FetchError::InvalidUrl(format!("{url}: {err}")))?;
        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
            return open_file(&path).await;
        }

        let response = self.client.get(parsed).send().await?.error_for_status()?;
        let headers = first_values(response.headers());
        let content_type = headers
            .get(CONTENT_TYPE.as_str())
            .cloned()
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        let content_length = response.content_length();
        info!(url, %content_type, content_length, "source opened");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(FetchError::from))
            .boxed();
        Ok(FetchedMedia {
            content_type,
            headers,
            content_length,
            body,
        })
    }
}

async fn open_file(path: &Path) -> FetchResult<FetchedMedia> {
    let io_error = |source| FetchError::Io {
        source,
        path: path.to_path_buf(),
    };
    let file = fs::File::open(path).await.map_err(io_error)?;
    let content_length = file.metadata().await.map_err(io_error)?.len();
    let owned = path.to_path_buf();
    let body = ReaderStream::new(file)
        .map(move |chunk| {
            chunk.map_err(|source| FetchError::Io {
                source,
                path: owned.clone(),
            })
        })
        .boxed();
    let content_type = content_type_for(path).to_string();
    info!(path = %path.display(), %content_type, content_length, "source opened");
    Ok(FetchedMedia {
        headers: HashMap::from([(CONTENT_TYPE.as_str().to_string(), content_type.clone())]),
        content_type,
        content_length: Some(content_length),
        body,
    })
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("ts") => "video/mp2t",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// Flattens a header map to the first value of every header name. Values that
/// are not visible ASCII are skipped.
pub(crate) fn first_values(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .keys()
        .filter_map(|name| {
            let value = headers.get(name)?.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
