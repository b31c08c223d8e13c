pub mod ytdlp;

use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use crate::core::error::ExtractError;
use crate::core::types::{AudioCodec, MediaFormat};

pub use ytdlp::YtDlpExtractor;

// ---------------------------------------------------------------------------
// Extraction adapter
// ---------------------------------------------------------------------------

/// Options derived from a download request for one extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub format: MediaFormat,
    /// Target codec when `format` is audio. Ignored for video.
    pub audio_codec: AudioCodec,
    pub quality: String,
    /// Directory the extractor must write into. Owned by the caller, which
    /// removes it afterwards.
    pub output_dir: PathBuf,
}

/// What an extractor hands back on success.
#[derive(Debug, Clone)]
pub struct ExtractedMedia {
    /// File produced inside `ExtractOptions::output_dir`. For audio this may
    /// still carry the pre-transcode extension.
    pub path: PathBuf,
    /// Human-readable title when the extractor knows one. Only logged.
    pub title: Option<String>,
}

/// Fetches (and optionally transcodes) remote media into a local file.
///
/// Implementations are opaque to the caller: any error aborts the request
/// and its message is shown to the client. Injected into the HTTP layer so
/// tests can substitute a fake without touching the network.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn fetch(&self, url: &Url, options: &ExtractOptions) -> Result<ExtractedMedia, ExtractError>;

    /// Readiness check. Returns a version or description string.
    async fn probe(&self) -> Result<String, ExtractError>;
}
