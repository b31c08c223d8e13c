use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for one download job (UUIDv7 for time-sortability).
///
/// Names the per-request staging directory and tags every log line emitted
/// while the job is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Hyphen-less form, safe to embed in file names.
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Output format and codec enums
// ---------------------------------------------------------------------------

/// What the client wants back: an audio-only transcode or the best muxed video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    #[default]
    Audio,
    Video,
}

impl MediaFormat {
    /// Parse the `format` field of a download request.
    ///
    /// `mp3` is accepted as an alias for audio since that is what browser
    /// clients send.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" | "mp3" => Some(MediaFormat::Audio),
            "video" | "mp4" => Some(MediaFormat::Video),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Audio => "audio",
            MediaFormat::Video => "video",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audio codecs the extractor can transcode to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,
    M4a,
    Opus,
    Vorbis,
    Flac,
    Wav,
}

impl AudioCodec {
    /// Codec name as passed to `yt-dlp --audio-format`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "mp3",
            AudioCodec::M4a => "m4a",
            AudioCodec::Opus => "opus",
            AudioCodec::Vorbis => "vorbis",
            AudioCodec::Flac => "flac",
            AudioCodec::Wav => "wav",
        }
    }

    /// File extension the transcoding postprocessor writes.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioCodec::Vorbis => "ogg",
            other => other.as_str(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Some(AudioCodec::Mp3),
            "m4a" => Some(AudioCodec::M4a),
            "opus" => Some(AudioCodec::Opus),
            "vorbis" | "ogg" => Some(AudioCodec::Vorbis),
            "flac" => Some(AudioCodec::Flac),
            "wav" => Some(AudioCodec::Wav),
            _ => None,
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Download request
// ---------------------------------------------------------------------------

/// A validated download request. Immutable; lives for one HTTP request.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source_url: Url,
    pub format: MediaFormat,
    /// Codec-specific quality hint, e.g. an audio bitrate in kbps.
    pub quality: String,
}
