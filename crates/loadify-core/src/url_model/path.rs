//! Filename hint from the URL path.

use super::content_disposition::percent_decode;

/// Last non-empty path segment of `url`, percent-decoded. Query and fragment are
/// ignored. None when the URL does not parse or has no usable segment.
pub fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path().rsplit('/').find(|s| !s.is_empty())?;
    let decoded = percent_decode(segment);
    match decoded.trim() {
        "" | "." | ".." => None,
        _ => Some(decoded),
    }
}
