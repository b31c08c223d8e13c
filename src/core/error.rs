use thiserror::Error;

// ---------------------------------------------------------------------------
// Extraction errors
// ---------------------------------------------------------------------------

/// Errors originating from the media extractor.
///
/// Display strings are surfaced to clients unchanged, so `Failed` carries the
/// extractor's own message without a prefix.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extractor binary not found: {binary}")]
    BinaryNotFound { binary: String },

    #[error("{message}")]
    Failed { message: String },

    #[error("extractor produced no output file: {reason}")]
    MissingOutput { reason: String },

    #[error("extractor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors originating from the publish store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid file name: {name}")]
    InvalidName { name: String },

    #[error("file not found: {name}")]
    NotFound { name: String },

    #[error("failed to publish {name}: {source}")]
    PublishFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Download errors
// ---------------------------------------------------------------------------

/// Errors from one download-and-publish request.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid url: {reason}")]
    InvalidUrl { reason: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("download timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DownloadError {
    /// Map a DownloadError to its HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            DownloadError::InvalidUrl { .. } | DownloadError::InvalidRequest { .. } => 400,
            DownloadError::Extraction(_) => 500,
            DownloadError::Timeout { .. } => 500,
            DownloadError::Storage(_) => 500,
        }
    }

    /// Return the error code string for JSON responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            DownloadError::InvalidUrl { .. } => "invalid_url",
            DownloadError::InvalidRequest { .. } => "invalid_request",
            DownloadError::Extraction(_) => "download_failed",
            DownloadError::Timeout { .. } => "download_timeout",
            DownloadError::Storage(_) => "publish_failed",
        }
    }

    /// Metric label for the failure class.
    pub fn result_label(&self) -> &'static str {
        match self {
            DownloadError::InvalidUrl { .. } | DownloadError::InvalidRequest { .. } => "rejected",
            DownloadError::Extraction(_) => "extract_failed",
            DownloadError::Timeout { .. } => "timeout",
            DownloadError::Storage(_) => "publish_failed",
        }
    }
}
