// ---------------------------------------------------------------------------
// Published file names
// ---------------------------------------------------------------------------

/// Whether `c` may appear in a published file name.
fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// Map an extractor-produced file name onto the published name space.
///
/// Spaces become `-`, anything outside `[A-Za-z0-9_.-]` is dropped and
/// leading dots are stripped, so the result can never be `..`, a hidden file
/// or contain a path separator. The extension survives whenever its own
/// characters do. Total and idempotent; the result may be empty.
pub fn sanitize_file_name(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| is_safe_char(*c))
        .collect();
    kept.trim_start_matches('.').to_string()
}

/// Whether `name` could have been produced by [`sanitize_file_name`] and is
/// usable as a store key.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && name.chars().all(is_safe_char)
}
