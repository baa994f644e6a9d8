//! Response header collection for direct transfers.

/// Headers of the final response. Redirect hops are discarded: each status line
/// starts a fresh response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResponseHeaders {
    pub status: Option<u32>,
    pub content_length: Option<u64>,
    pub content_disposition: Option<String>,
}

impl ResponseHeaders {
    /// Feeds one raw header line as delivered by curl's header callback.
    pub fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if line.get(..5).map_or(false, |p| p.eq_ignore_ascii_case("HTTP/")) {
            *self = Self {
                status: line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|c| c.parse().ok()),
                ..Self::default()
            };
            return;
        }
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("content-disposition") {
            self.content_disposition = Some(value.to_string());
        }
    }
}
