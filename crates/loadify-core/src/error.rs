//! Transfer failure taxonomy and classification of curl / HTTP failures.

use thiserror::Error;

/// Why a transfer did not complete. `Cancelled` is a terminal outcome rather than
/// a failure; everything else ends the item in ERROR with the display text as
/// its message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(String),
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Write(e.to_string())
    }
}

/// Classify a non-success HTTP status.
pub fn classify_http_status(code: u32) -> TransferError {
    match code {
        404 | 410 => TransferError::SourceNotFound(format!("HTTP {}", code)),
        401 | 407 => TransferError::Configuration(format!(
            "HTTP {}: authentication required or rejected",
            code
        )),
        _ => TransferError::Network(format!("HTTP {}", code)),
    }
}

/// CURLE_REMOTE_FILE_NOT_FOUND (FTP/SFTP "no such file"); curl has no predicate for it.
fn is_remote_file_not_found(e: &curl::Error) -> bool {
    e.code() == 78
}

/// Classify a curl error. `status` is the response code curl saw, if any; it is
/// only consulted for errors raised by `fail_on_error`.
pub fn classify_curl_error(e: &curl::Error, status: Option<u32>) -> TransferError {
    if e.is_http_returned_error() {
        if let Some(code) = status.filter(|c| *c >= 400) {
            return classify_http_status(code);
        }
    }
    if e.is_file_couldnt_read_file() || is_remote_file_not_found(e) {
        return TransferError::SourceNotFound(e.to_string());
    }
    if e.is_unsupported_protocol() || e.is_url_malformed() {
        return TransferError::UnsupportedSource(e.to_string());
    }
    if e.is_login_denied() {
        return TransferError::Configuration(e.to_string());
    }
    if e.is_write_error() {
        return TransferError::Write(e.to_string());
    }
    if e.is_operation_timedout() {
        return TransferError::Network(format!("timed out: {}", e));
    }
    TransferError::Network(e.to_string())
}
