//! Local filename derivation for transfers.
//!
//! A filename comes from the `Content-Disposition` header when a direct transfer
//! receives one, otherwise from the last URL path segment. Either way it is
//! percent-decoded and sanitized for Linux filesystems.

mod content_disposition;
mod path;
mod sanitize;

pub use content_disposition::parse_content_disposition_filename;
pub use path::filename_from_url_path;
pub use sanitize::sanitize_filename_for_linux;

/// Derives a safe filename, or None when neither source yields anything usable
/// (the caller then falls back to `download_<id>.file`).
///
/// - `derive_filename("https://example.com/archive.zip", None)` → `Some("archive.zip")`
/// - `derive_filename("https://example.com/", Some("attachment; filename=\"report.pdf\""))` → `Some("report.pdf")`
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> Option<String> {
    let raw = content_disposition
        .and_then(parse_content_disposition_filename)
        .filter(|s| !s.is_empty())
        .or_else(|| filename_from_url_path(url))?;

    let sanitized = sanitize_filename_for_linux(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        None
    } else {
        Some(sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_url_path() {
        assert_eq!(
            derive_filename("https://example.com/archive.zip", None).as_deref(),
            Some("archive.zip")
        );
        assert_eq!(
            derive_filename("https://cdn.example.com/pub/My%20Report%20(final).pdf", None)
                .as_deref(),
            Some("My_Report_(final).pdf")
        );
    }

    #[test]
    fn content_disposition_overrides_url() {
        assert_eq!(
            derive_filename(
                "https://example.com/archive.zip",
                Some("attachment; filename=\"real-name.tar.gz\"")
            )
            .as_deref(),
            Some("real-name.tar.gz")
        );
    }

    #[test]
    fn unusable_content_disposition_falls_back_to_path() {
        assert_eq!(
            derive_filename("https://example.com/a.bin", Some("inline")).as_deref(),
            Some("a.bin")
        );
    }

    #[test]
    fn nothing_usable() {
        assert_eq!(derive_filename("https://example.com/", None), None);
        assert_eq!(derive_filename("https://example.com", None), None);
        assert_eq!(derive_filename("not a url", None), None);
        assert_eq!(derive_filename("https://example.com/%2F", None), None);
    }
}
