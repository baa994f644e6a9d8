//! Media transfers driven through an external extractor process.
//!
//! The extractor runs as a child; reader threads forward its stdout/stderr
//! lines into a channel that the worker drains with a short timeout, so the
//! pause/cancel checkpoint runs even while the child is silent.

mod process;
mod ytdlp;

pub use ytdlp::YtDlp;

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use super::{Transfer, TransferContext, TransferOutcome};
use crate::error::TransferError;
use crate::item::{Checkpoint, ItemUpdate, Quality, TransferKind};
use crate::network::Credentials;
use crate::progress::ProgressTracker;

/// How long the worker waits for output before re-checking its signals.
const LINE_WAIT: Duration = Duration::from_millis(200);

/// Stderr lines kept for the failure message.
const STDERR_TAIL: usize = 20;

/// Inputs for one extractor invocation.
#[derive(Debug, Clone)]
pub struct ExtractRequest<'a> {
    pub url: &'a str,
    pub destination: &'a Path,
    pub quality: Quality,
    pub proxy: Option<&'a str>,
    pub credentials: Option<&'a Credentials>,
    /// Current limiter rate in bytes/sec, when limited.
    pub rate_limit: Option<u64>,
}

/// Something the extractor printed that the worker cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorEvent {
    Progress { downloaded: u64, total: Option<u64> },
    /// Final output path chosen by the extractor.
    Destination(PathBuf),
}

/// An external media extractor program.
pub trait MediaExtractor: Send + Sync {
    /// Program name for messages.
    fn program(&self) -> &str;

    fn command(&self, request: &ExtractRequest<'_>) -> Command;

    fn parse_line(&self, line: &str) -> Option<ExtractorEvent>;

    /// Error for a non-zero exit, given the last stderr lines.
    fn classify_failure(&self, stderr: &[String]) -> TransferError;
}

enum Line {
    Out(String),
    Err(String),
}

fn forward_lines<R: Read + Send + 'static>(
    reader: R,
    tx: mpsc::Sender<Line>,
    wrap: fn(String) -> Line,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("extractor-reader".into())
        .spawn(move || {
            for line in BufReader::new(reader).lines() {
                let Ok(line) = line else { break };
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
        })
        .map(|_| ())
}

/// Runs media transfers with the given extractor.
pub struct MediaTransfer<E> {
    extractor: E,
}

impl<E: MediaExtractor> MediaTransfer<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }

    fn spawn(&self, ctx: &TransferContext, quality: Quality) -> Result<Child, TransferError> {
        let rate = ctx.limiter.rate();
        let request = ExtractRequest {
            url: &ctx.url,
            destination: &ctx.destination,
            quality,
            proxy: ctx.network.proxy_for(&ctx.url),
            credentials: ctx.network.credentials.as_ref(),
            rate_limit: (rate > 0.0).then(|| rate as u64),
        };
        std::fs::create_dir_all(&ctx.destination)?;
        let mut cmd = self.extractor.command(&request);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransferError::Configuration(format!(
                    "{} not found; install it or set media.extractor",
                    self.extractor.program()
                ))
            } else {
                TransferError::Extraction(format!(
                    "could not start {}: {}",
                    self.extractor.program(),
                    e
                ))
            }
        })
    }
}

impl<E: MediaExtractor> Transfer for MediaTransfer<E> {
    fn run(&self, ctx: &TransferContext) -> Result<TransferOutcome, TransferError> {
        let quality = match ctx.kind {
            TransferKind::Media { quality } => quality,
            TransferKind::File => Quality::default(),
        };
        match ctx.checkpoint() {
            Checkpoint::Continue => {}
            Checkpoint::Cancel => return Err(TransferError::Cancelled),
            Checkpoint::Requeue => return Ok(TransferOutcome::Requeued),
        }

        let mut child = self.spawn(ctx, quality)?;
        tracing::info!(item = %ctx.id, pid = child.id(), "{} started", self.extractor.program());

        let (tx, rx) = mpsc::channel();
        let readers = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => forward_lines(out, tx.clone(), Line::Out)
                .and_then(|()| forward_lines(err, tx, Line::Err)),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "child pipes unavailable",
            )),
        };
        if let Err(e) = readers {
            process::terminate(&mut child);
            return Err(TransferError::Extraction(e.to_string()));
        }

        let mut tracker = ProgressTracker::new(0);
        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
        let mut output: Option<PathBuf> = None;

        loop {
            match ctx.checkpoint_with(|| process::suspend(&child)) {
                Checkpoint::Continue => {}
                Checkpoint::Cancel => {
                    process::terminate(&mut child);
                    return Err(TransferError::Cancelled);
                }
                Checkpoint::Requeue => {
                    process::terminate(&mut child);
                    return Ok(TransferOutcome::Requeued);
                }
            }
            match rx.recv_timeout(LINE_WAIT) {
                Ok(Line::Out(line)) => match self.extractor.parse_line(&line) {
                    Some(ExtractorEvent::Progress { downloaded, total }) => {
                        if let Some(total) = total.filter(|t| *t > 0) {
                            tracker.set_total(total);
                        }
                        let (delta, emit) = tracker.record_absolute(downloaded, Instant::now());
                        ctx.limiter.consume(delta as usize);
                        if emit {
                            ctx.report(tracker.update());
                        }
                    }
                    Some(ExtractorEvent::Destination(path)) => {
                        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                            ctx.report(ItemUpdate::filename(name));
                        }
                        output = Some(path);
                    }
                    None => tracing::trace!(item = %ctx.id, "extractor: {}", line),
                },
                Ok(Line::Err(line)) => {
                    if stderr_tail.len() == STDERR_TAIL {
                        stderr_tail.pop_front();
                    }
                    stderr_tail.push_back(line);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = child
            .wait()
            .map_err(|e| TransferError::Extraction(e.to_string()))?;
        if ctx.control.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if !status.success() {
            let tail: Vec<String> = stderr_tail.into_iter().collect();
            tracing::warn!(item = %ctx.id, %status, "{} failed", self.extractor.program());
            return Err(self.extractor.classify_failure(&tail));
        }

        let path = output.unwrap_or_else(|| ctx.filepath());
        let bytes = tracker.transferred();
        if tracker.total() == 0 {
            tracker.set_total(bytes);
        }
        let mut last = tracker.update();
        last.progress = Some(1.0);
        ctx.report(last);
        Ok(TransferOutcome::Completed { path, bytes })
    }
}
