//! Filename cleanup for Linux filesystems.

/// NAME_MAX on Linux, in bytes.
const NAME_MAX: usize = 255;

/// Cleans a candidate filename.
///
/// Separators, NUL, control characters and whitespace become `_` (runs collapse
/// to one), leading/trailing dots and underscores are stripped and the result is
/// cut to 255 bytes on a char boundary.
pub fn sanitize_filename_for_linux(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let unsafe_char = matches!(c, '/' | '\\' | '\0') || c.is_control() || c.is_whitespace();
        if unsafe_char {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(c);
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
