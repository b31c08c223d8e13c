use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::error::{DownloadError, ExtractError};
use crate::core::redact::redact_url;
use crate::core::sanitize::sanitize_file_name;
use crate::core::security;
use crate::core::types::{AudioCodec, DownloadRequest, JobId, MediaFormat};
use crate::extract::{ExtractOptions, MediaExtractor};
use crate::observability::metrics as obs;
use crate::storage::PublishStore;

// ---------------------------------------------------------------------------
// Download API types
// ---------------------------------------------------------------------------

/// Raw `POST /download` body, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadBody {
    pub url: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

/// Successful download response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadResponse {
    pub download_url: String,
}

/// Validate a raw body into a [`DownloadRequest`].
///
/// A missing `format` means audio; a missing `quality` takes `default_quality`.
pub fn parse_request(body: &DownloadBody, default_quality: &str) -> Result<DownloadRequest, DownloadError> {
    let source_url = security::validate_source_url(&body.url)
        .map_err(|reason| DownloadError::InvalidUrl { reason })?;

    let format = match body.format.as_deref() {
        None => MediaFormat::default(),
        Some(raw) => MediaFormat::parse(raw).ok_or_else(|| DownloadError::InvalidRequest {
            reason: format!(
                "unsupported format '{}' (expected mp3, audio, video or mp4)",
                raw
            ),
        })?,
    };

    let quality = body
        .quality
        .as_deref()
        .map(str::trim)
        .unwrap_or(default_quality)
        .to_string();
    security::validate_quality(&quality).map_err(|reason| DownloadError::InvalidRequest { reason })?;

    Ok(DownloadRequest {
        source_url,
        format,
        quality,
    })
}

// ---------------------------------------------------------------------------
// Download orchestration
// ---------------------------------------------------------------------------

/// Everything one download needs besides the request itself.
#[derive(Clone)]
pub struct DownloadContext {
    pub store: PublishStore,
    pub extractor: Arc<dyn MediaExtractor>,
    pub audio_codec: AudioCodec,
    pub timeout: Duration,
    /// Base of the URLs handed back to clients, without trailing slash.
    pub public_base_url: String,
}

impl DownloadContext {
    pub fn from_config(
        config: &AppConfig,
        store: PublishStore,
        extractor: Arc<dyn MediaExtractor>,
    ) -> Self {
        Self {
            store,
            extractor,
            audio_codec: config.extractor.audio_codec,
            timeout: Duration::from_secs(config.extractor.timeout_secs),
            public_base_url: config.server.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Public URL for a published name.
    pub fn download_url(&self, name: &str) -> String {
        format!("{}/download/{}", self.public_base_url, name)
    }
}

/// Fetch the requested media and publish it into the store.
///
/// Flow:
/// 1. Create a per-job staging directory under the store
/// 2. Run the extractor into it, bounded by the configured timeout
/// 3. For audio, locate the output under the codec's extension
/// 4. Sanitize the name (falling back to `media-<job id>` when nothing survives)
/// 5. Rename into the store, replacing any file of the same name
///
/// The staging directory is removed on every return path, taking partial
/// output with it. The rename completes before this returns, so the URL in
/// the response always names a file that exists at that moment.
pub async fn publish_download(
    ctx: &DownloadContext,
    request: &DownloadRequest,
) -> Result<DownloadResponse, DownloadError> {
    let start = Instant::now();
    let format = request.format.as_str();

    let result = run_download(ctx, request).await;

    match &result {
        Ok(response) => {
            obs::inc_download(format, "success");
            obs::record_download_duration(format, start.elapsed().as_secs_f64());
            info!(
                url = %redact_url(&request.source_url),
                download_url = %response.download_url,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "download published"
            );
        }
        Err(e) => {
            obs::inc_download(format, e.result_label());
            warn!(
                url = %redact_url(&request.source_url),
                error = %e,
                "download failed"
            );
        }
    }

    result
}

async fn run_download(
    ctx: &DownloadContext,
    request: &DownloadRequest,
) -> Result<DownloadResponse, DownloadError> {
    let job_id = JobId::new();
    let staging = ctx.store.create_staging_dir(job_id).await?;

    let result = fetch_and_publish(ctx, request, job_id, staging.path()).await;

    // Timeouts and errors land here too. Only a cancelled request skips this
    // and leaves the removal to the guard's drop.
    staging.cleanup().await;
    result
}

async fn fetch_and_publish(
    ctx: &DownloadContext,
    request: &DownloadRequest,
    job_id: JobId,
    staging: &Path,
) -> Result<DownloadResponse, DownloadError> {
    let options = ExtractOptions {
        format: request.format,
        audio_codec: ctx.audio_codec,
        quality: request.quality.clone(),
        output_dir: staging.to_path_buf(),
    };

    let fetched = tokio::time::timeout(ctx.timeout, ctx.extractor.fetch(&request.source_url, &options))
        .await
        .map_err(|_| DownloadError::Timeout {
            timeout_secs: ctx.timeout.as_secs(),
        })??;

    debug!(
        job_id = %job_id,
        title = fetched.title.as_deref().unwrap_or("<unknown>"),
        path = %fetched.path.display(),
        "extraction finished"
    );

    let produced = match request.format {
        MediaFormat::Audio => audio_output_path(&fetched.path, ctx.audio_codec),
        MediaFormat::Video => fetched.path,
    };

    if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
        return Err(ExtractError::MissingOutput {
            reason: format!("expected output file {} does not exist", produced.display()),
        }
        .into());
    }

    let name = published_name(&produced, job_id);
    let artifact = ctx.store.publish(&produced, &name).await?;
    obs::add_published_bytes(artifact.size);

    Ok(DownloadResponse {
        download_url: ctx.download_url(&artifact.name),
    })
}

/// Where the transcoded audio lives: the reported path with the codec's
/// extension, whatever extension the extractor reported.
fn audio_output_path(reported: &Path, codec: AudioCodec) -> PathBuf {
    reported.with_extension(codec.extension())
}

/// Published name for a produced file.
///
/// Stem and extension are sanitized separately so a title made only of
/// unsafe characters still keeps its extension.
fn published_name(produced: &Path, job_id: JobId) -> String {
    let stem = produced
        .file_stem()
        .map(|s| sanitize_file_name(&s.to_string_lossy()))
        .unwrap_or_default();
    let extension = produced
        .extension()
        .map(|e| sanitize_file_name(&e.to_string_lossy()))
        .unwrap_or_default();

    let stem = if stem.is_empty() {
        format!("media-{}", job_id.simple())
    } else {
        stem
    };

    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}
