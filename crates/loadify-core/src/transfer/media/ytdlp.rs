//! yt-dlp as the media extractor.

use std::path::PathBuf;
use std::process::Command;

use super::{ExtractRequest, ExtractorEvent, MediaExtractor};
use crate::error::TransferError;
use crate::network::AuthScheme;

const PROGRESS_TAG: &str = "LOADIFY_PROGRESS";
const FILE_TAG: &str = "LOADIFY_FILE";

/// Drives the `yt-dlp` command-line program (or a compatible fork).
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for one download, without the program name.
    pub fn args(&self, request: &ExtractRequest<'_>) -> Vec<String> {
        let template = request.destination.join("%(title)s.%(ext)s");
        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--no-playlist".into(),
            "--no-colors".into(),
            "--quiet".into(),
            "--progress".into(),
            "--progress-template".into(),
            format!(
                "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s",
                PROGRESS_TAG
            ),
            "--no-simulate".into(),
            "--print".into(),
            format!("before_dl:{} %(filename)s", FILE_TAG),
            "-f".into(),
            request.quality.format_selector().into(),
            "-o".into(),
            template.to_string_lossy().into_owned(),
        ];
        if let Some(proxy) = request.proxy {
            args.push("--proxy".into());
            args.push(proxy.into());
        }
        if let Some(creds) = request.credentials {
            if creds.scheme == AuthScheme::Digest {
                tracing::debug!("{}: digest auth not supported, sending credentials as-is", self.program);
            }
            args.push("--username".into());
            args.push(creds.username.clone());
            args.push("--password".into());
            args.push(creds.password.clone());
        }
        if let Some(rate) = request.rate_limit.filter(|r| *r > 0) {
            args.push("--limit-rate".into());
            args.push(rate.to_string());
        }
        args.push("--".into());
        args.push(request.url.into());
        args
    }
}

/// "NA" and friends mean unknown.
fn parse_bytes(field: Option<&str>) -> Option<u64> {
    let f = field?;
    f.parse::<u64>()
        .ok()
        .or_else(|| f.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64))
}

impl MediaExtractor for YtDlp {
    fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, request: &ExtractRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(request));
        cmd
    }

    fn parse_line(&self, line: &str) -> Option<ExtractorEvent> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix(PROGRESS_TAG) {
            let mut fields = rest.split_whitespace();
            let downloaded = parse_bytes(fields.next())?;
            let total = parse_bytes(fields.next());
            let estimate = parse_bytes(fields.next());
            return Some(ExtractorEvent::Progress {
                downloaded,
                total: total.or(estimate),
            });
        }
        if let Some(rest) = line.strip_prefix(FILE_TAG) {
            let path = rest.trim();
            if !path.is_empty() {
                return Some(ExtractorEvent::Destination(PathBuf::from(path)));
            }
        }
        None
    }

    fn classify_failure(&self, stderr: &[String]) -> TransferError {
        let joined = stderr.join("\n");
        if joined.contains("Unsupported URL") || joined.contains("is not a valid URL") {
            return TransferError::UnsupportedSource(last_error(stderr));
        }
        if joined.contains("HTTP Error 404") || joined.contains("Video unavailable") {
            return TransferError::SourceNotFound(last_error(stderr));
        }
        if joined.contains("Unable to download") || joined.contains("timed out") {
            return TransferError::Network(last_error(stderr));
        }
        TransferError::Extraction(last_error(stderr))
    }
}

/// Most relevant stderr line: the last `ERROR:` line, else the last line.
fn last_error(stderr: &[String]) -> String {
    stderr
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| stderr.last())
        .map(|l| l.trim_start_matches("ERROR:").trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "extractor exited with an error".to_string())
}
