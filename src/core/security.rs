use url::Url;

// ---------------------------------------------------------------------------
// Input validation limits
// ---------------------------------------------------------------------------

/// Maximum accepted length of a source URL in bytes.
pub const MAX_SOURCE_URL_LENGTH: usize = 2048;

/// Maximum length of the `quality` hint.
pub const MAX_QUALITY_LENGTH: usize = 16;

/// Schemes the extractor is allowed to fetch from.
pub const ALLOWED_URL_SCHEMES: [&str; 2] = ["http", "https"];

/// Validate a client-supplied source URL.
///
/// The URL must parse as an absolute URL, use http(s) and carry a host.
/// Rejects `file://`, bare hosts and shell-looking input before it ever
/// reaches the extractor's argument list.
pub fn validate_source_url(raw: &str) -> Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("url must not be empty".to_string());
    }
    if trimmed.len() > MAX_SOURCE_URL_LENGTH {
        return Err(format!(
            "url too long: {} bytes (max {})",
            trimmed.len(),
            MAX_SOURCE_URL_LENGTH
        ));
    }

    let url = Url::parse(trimmed).map_err(|e| format!("invalid url '{}': {}", trimmed, e))?;

    if !ALLOWED_URL_SCHEMES.contains(&url.scheme()) {
        return Err(format!(
            "unsupported url scheme '{}' (must be http or https)",
            url.scheme()
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("url has no host".to_string());
    }

    Ok(url)
}

/// Validate the codec quality hint (e.g. `192`, `320K`, `0`).
pub fn validate_quality(quality: &str) -> Result<(), String> {
    if quality.is_empty() || quality.len() > MAX_QUALITY_LENGTH {
        return Err(format!(
            "quality must be 1 to {} characters",
            MAX_QUALITY_LENGTH
        ));
    }
    if !quality
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.')
    {
        return Err(format!("quality '{}' contains invalid characters", quality));
    }
    Ok(())
}
