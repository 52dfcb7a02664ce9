//! Producer side: fetch a source and stream it to the edge tier.

mod fetch;
mod upload;

pub use fetch::{FetchError, FetchResult, FetchedMedia, HttpFetcher};
pub use upload::{ChunkUploader, UploadError, UploadReport, UploadResult};
