use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::error::ExtractError;
use crate::core::redact::redact_url;
use crate::core::types::MediaFormat;

use super::{ExtractOptions, ExtractedMedia, MediaExtractor};

/// Longest stderr excerpt carried in an error message.
const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Output template, relative to the job's staging directory.
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Extractor backed by the `yt-dlp` command line tool.
///
/// # Security
/// - Arguments are passed via `.arg()` (no shell expansion)
/// - `--no-exec` prevents yt-dlp from running post-processing commands
/// - The reported file path is checked to be inside the output directory
///
/// The child is spawned with `kill_on_drop`, so dropping the future (client
/// disconnect, timeout, shutdown) terminates the download.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: String,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> ExtractError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExtractError::BinaryNotFound {
                binary: self.binary.clone(),
            }
        } else {
            ExtractError::Io(e)
        }
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn fetch(&self, url: &Url, options: &ExtractOptions) -> Result<ExtractedMedia, ExtractError> {
        let template = options.output_dir.join(OUTPUT_TEMPLATE);
        let template = template.to_str().ok_or_else(|| ExtractError::Failed {
            message: "output directory path contains invalid UTF-8".to_string(),
        })?;

        info!(
            url = %redact_url(url),
            format = %options.format,
            quality = %options.quality,
            "starting yt-dlp"
        );

        let output = self
            .command()
            .args(build_args(options, template))
            .arg(url.as_str())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = error_message(&stderr)
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            warn!(status = %output.status, "yt-dlp failed");
            return Err(ExtractError::Failed { message });
        }

        // `--print after_move:filepath` reports the final path on stdout.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let reported = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty());

        let path = match reported {
            Some(line) => {
                let candidate = PathBuf::from(line);
                validate_path_in_dir(&candidate, &options.output_dir)?;
                candidate
            }
            None => find_newest_file(&options.output_dir).await?,
        };

        debug!(path = %path.display(), "yt-dlp finished");

        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());
        Ok(ExtractedMedia { path, title })
    }

    async fn probe(&self) -> Result<String, ExtractError> {
        let output = self
            .command()
            .arg("--version")
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                message: format!("{} --version exited with {}", self.binary, output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Build the yt-dlp argument list (without the URL).
fn build_args(options: &ExtractOptions, output_template: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "--no-playlist",
        "--no-exec",
        "--no-progress",
        "--no-simulate",
        "--print",
        "after_move:filepath",
        "--output",
        output_template,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    match options.format {
        MediaFormat::Audio => {
            args.extend(
                [
                    "--format",
                    "bestaudio/best",
                    "--extract-audio",
                    "--audio-format",
                    options.audio_codec.as_str(),
                    "--audio-quality",
                ]
                .iter()
                .map(|s| s.to_string()),
            );
            args.push(audio_quality_arg(&options.quality));
        }
        MediaFormat::Video => {
            args.extend(
                ["--format", "bestvideo*+bestaudio/best"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
    }

    args
}

/// yt-dlp reads bare numbers 0-10 as a VBR level and anything with a `K`
/// suffix as a bitrate. A bare number above 10 is meant as kbps.
fn audio_quality_arg(quality: &str) -> String {
    match quality.parse::<u32>() {
        Ok(n) if n > 10 => format!("{}K", n),
        _ => quality.to_string(),
    }
}

/// Condense yt-dlp's stderr into a client-facing message.
///
/// Prefers the `ERROR:` lines; falls back to the whole output. Truncated to
/// keep huge dumps out of responses.
fn error_message(stderr: &str) -> Option<String> {
    let errors: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .collect();

    let message = if errors.is_empty() {
        stderr.trim().to_string()
    } else {
        errors.join("\n")
    };

    if message.is_empty() {
        None
    } else {
        Some(message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect())
    }
}

/// Normalize a path by resolving `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir => {}
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Validate that a path is inside the expected directory.
fn validate_path_in_dir(path: &Path, expected_dir: &Path) -> Result<(), ExtractError> {
    let canonical_dir = expected_dir
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(expected_dir));
    let canonical_path = path
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(path));

    if canonical_path.starts_with(&canonical_dir) {
        Ok(())
    } else {
        warn!(
            path = %path.display(),
            expected_dir = %expected_dir.display(),
            "extractor output outside expected directory"
        );
        Err(ExtractError::MissingOutput {
            reason: "reported file path is outside the output directory".to_string(),
        })
    }
}

/// Find the most recently modified finished file in a directory.
///
/// Fallback for yt-dlp builds that do not honour `--print after_move:...`.
async fn find_newest_file(dir: &Path) -> Result<PathBuf, ExtractError> {
    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_partial = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| matches!(ext, "part" | "ytdl" | "tmp"));
        if is_partial {
            continue;
        }
        if let Ok(meta) = entry.metadata().await {
            if !meta.is_file() {
                continue;
            }
            if let Ok(modified) = meta.modified() {
                if best.as_ref().map_or(true, |(_, t)| modified > *t) {
                    best = Some((path, modified));
                }
            }
        }
    }

    best.map(|(p, _)| p).ok_or_else(|| ExtractError::MissingOutput {
        reason: "no file found after download".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AudioCodec;

    fn options(format: MediaFormat, quality: &str) -> ExtractOptions {
        ExtractOptions {
            format,
            audio_codec: AudioCodec::Mp3,
            quality: quality.to_string(),
            output_dir: std::env::temp_dir(),
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_audio_args() {
        let args = build_args(&options(MediaFormat::Audio, "192"), "/tmp/x/%(title)s.%(ext)s");
        assert!(args.contains(&"--extract-audio".to_string()));
        assert_eq!(value_after(&args, "--audio-format"), Some("mp3"));
        assert_eq!(value_after(&args, "--audio-quality"), Some("192K"));
        assert_eq!(value_after(&args, "--format"), Some("bestaudio/best"));
        assert_eq!(value_after(&args, "--output"), Some("/tmp/x/%(title)s.%(ext)s"));
        assert!(args.contains(&"--no-exec".to_string()));
    }

    #[test]
    fn test_video_args_do_not_transcode() {
        let args = build_args(&options(MediaFormat::Video, "192"), "/tmp/x/t");
        assert!(!args.contains(&"--extract-audio".to_string()));
        assert!(!args.contains(&"--audio-format".to_string()));
        assert_eq!(value_after(&args, "--format"), Some("bestvideo*+bestaudio/best"));
    }

    #[test]
    fn test_audio_quality_arg() {
        assert_eq!(audio_quality_arg("192"), "192K");
        assert_eq!(audio_quality_arg("320K"), "320K");
        assert_eq!(audio_quality_arg("0"), "0");
        assert_eq!(audio_quality_arg("5"), "5");
    }

    #[test]
    fn test_error_message_prefers_error_lines() {
        let stderr = "WARNING: something\nERROR: [youtube] abc: Video unavailable\n";
        assert_eq!(
            error_message(stderr).unwrap(),
            "ERROR: [youtube] abc: Video unavailable"
        );
        assert_eq!(error_message("plain failure\n").unwrap(), "plain failure");
        assert!(error_message("   \n").is_none());
        assert_eq!(
            error_message(&"x".repeat(5000)).unwrap().len(),
            MAX_ERROR_MESSAGE_CHARS
        );
    }

    #[test]
    fn test_validate_path_in_dir() {
        let dir = std::env::temp_dir().join("mediadrop_ytdlp_test");
        assert!(validate_path_in_dir(&dir.join("a.mp3"), &dir).is_ok());
        assert!(validate_path_in_dir(Path::new("/etc/passwd"), &dir).is_err());
        let traversal = dir.join("..").join("..").join("etc").join("passwd");
        assert!(validate_path_in_dir(&traversal, &dir).is_err());
    }

    #[tokio::test]
    async fn test_find_newest_file_skips_partials() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("clip.webm.part"), b"partial").await.unwrap();
        assert!(find_newest_file(dir.path()).await.is_err());

        tokio::fs::write(dir.path().join("clip.mp3"), b"done").await.unwrap();
        let found = find_newest_file(dir.path()).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "clip.mp3");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let extractor = YtDlpExtractor::new("mediadrop-no-such-binary-xyz");
        let url = Url::parse("https://example.com/watch?v=1").unwrap();
        let err = extractor
            .fetch(&url, &options(MediaFormat::Audio, "192"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::BinaryNotFound { .. }));
        assert!(extractor.probe().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_binary_reports_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = YtDlpExtractor::new("false");
        let url = Url::parse("https://example.com/watch?v=1").unwrap();
        let mut opts = options(MediaFormat::Video, "best");
        opts.output_dir = dir.path().to_path_buf();

        let err = extractor.fetch(&url, &opts).await.unwrap_err();
        match err {
            ExtractError::Failed { message } => assert!(message.contains("yt-dlp exited with")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
