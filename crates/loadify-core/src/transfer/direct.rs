//! Direct file transfers: one streaming GET through libcurl.
//!
//! The target file is opened lazily on the first body chunk, once the final
//! response headers are known, so a `Content-Disposition` filename can still
//! redirect the write. Each chunk goes through checkpoint, limiter, write and
//! progress in that order. curl's progress callback runs the same checkpoint
//! while no bytes arrive, so a stalled or still-connecting transfer still
//! honours pause and cancel.

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use curl::easy::{Auth, Easy};

use super::response::ResponseHeaders;
use super::{Transfer, TransferContext, TransferOutcome};
use crate::error::{classify_curl_error, TransferError};
use crate::item::{Checkpoint, ItemUpdate};
use crate::network::AuthScheme;
use crate::progress::ProgressTracker;
use crate::url_model::{derive_filename, parse_content_disposition_filename};

/// Size of the receive buffer, and so of the largest chunk seen per callback.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Why a callback aborted the transfer.
#[derive(Debug)]
enum Stop {
    Cancel,
    Requeue,
    Write(io::Error),
}

struct Sink {
    headers: ResponseHeaders,
    path: PathBuf,
    file: Option<File>,
    tracker: ProgressTracker,
    stop: Option<Stop>,
}

impl Sink {
    /// Opens (truncating) the target, choosing the filename from the final headers.
    fn open(&mut self, ctx: &TransferContext) -> io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(name) = self.header_filename(ctx) {
            if name != ctx.filename {
                tracing::debug!(item = %ctx.id, filename = %name, "filename from Content-Disposition");
                ctx.report(ItemUpdate::filename(name.clone()));
            }
            self.path = ctx.destination.join(name);
        }
        fs::create_dir_all(&ctx.destination)?;
        self.file = Some(File::create(&self.path)?);
        if let Some(len) = self.headers.content_length {
            self.tracker.set_total(len);
        }
        Ok(())
    }

    fn header_filename(&self, ctx: &TransferContext) -> Option<String> {
        let cd = self.headers.content_disposition.as_deref()?;
        parse_content_disposition_filename(cd)?;
        derive_filename(&ctx.url, Some(cd))
    }

    fn checkpoint(&self, ctx: &TransferContext) -> Result<(), Stop> {
        match ctx.checkpoint() {
            Checkpoint::Continue => Ok(()),
            Checkpoint::Cancel => Err(Stop::Cancel),
            Checkpoint::Requeue => Err(Stop::Requeue),
        }
    }

    fn write_chunk(&mut self, ctx: &TransferContext, data: &[u8]) -> Result<(), Stop> {
        self.checkpoint(ctx)?;
        ctx.limiter.consume(data.len());
        self.open(ctx).map_err(Stop::Write)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(data).map_err(Stop::Write)?;
        }
        if self.tracker.record(data.len() as u64, Instant::now()) {
            ctx.report(self.tracker.update());
        }
        Ok(())
    }
}

/// Streams a URL into `destination/filename` with libcurl.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectTransfer;

impl DirectTransfer {
    pub fn new() -> Self {
        Self
    }

    fn configure(&self, easy: &mut Easy, ctx: &TransferContext) -> Result<(), curl::Error> {
        easy.url(&ctx.url)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.fail_on_error(true)?;
        easy.buffer_size(CHUNK_SIZE)?;
        easy.connect_timeout(ctx.network.connect_timeout)?;
        // Stall detection: fewer than 1 byte/s for the whole window aborts.
        easy.low_speed_limit(1)?;
        easy.low_speed_time(ctx.network.stall_timeout)?;
        // Enables the progress callback, which curl also calls while idle.
        easy.progress(true)?;
        easy.useragent(concat!("loadify/", env!("CARGO_PKG_VERSION")))?;
        if let Some(proxy) = ctx.network.proxy_for(&ctx.url) {
            easy.proxy(proxy)?;
        }
        if let Some(creds) = &ctx.network.credentials {
            easy.username(&creds.username)?;
            easy.password(&creds.password)?;
            let mut auth = Auth::new();
            match creds.scheme {
                AuthScheme::Basic => auth.basic(true),
                AuthScheme::Digest => auth.digest(true),
            };
            easy.http_auth(&auth)?;
        }
        Ok(())
    }
}

impl Transfer for DirectTransfer {
    fn run(&self, ctx: &TransferContext) -> Result<TransferOutcome, TransferError> {
        match ctx.checkpoint() {
            Checkpoint::Continue => {}
            Checkpoint::Cancel => return Err(TransferError::Cancelled),
            Checkpoint::Requeue => return Ok(TransferOutcome::Requeued),
        }

        let mut easy = Easy::new();
        self.configure(&mut easy, ctx)
            .map_err(|e| classify_curl_error(&e, None))?;

        let sink = RefCell::new(Sink {
            headers: ResponseHeaders::default(),
            path: ctx.filepath(),
            file: None,
            tracker: ProgressTracker::new(0),
            stop: None,
        });

        let performed = {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|line| {
                    sink.borrow_mut().headers.push_line(line);
                    true
                })
                .map_err(|e| classify_curl_error(&e, None))?;
            transfer
                .write_function(|data| {
                    let mut sink = sink.borrow_mut();
                    match sink.write_chunk(ctx, data) {
                        Ok(()) => Ok(data.len()),
                        Err(stop) => {
                            sink.stop = Some(stop);
                            // Returning a short count makes curl abort the transfer.
                            Ok(0)
                        }
                    }
                })
                .map_err(|e| classify_curl_error(&e, None))?;
            transfer
                .progress_function(|_, _, _, _| {
                    let mut sink = sink.borrow_mut();
                    if sink.stop.is_some() {
                        return false;
                    }
                    match sink.checkpoint(ctx) {
                        Ok(()) => true,
                        Err(stop) => {
                            sink.stop = Some(stop);
                            false
                        }
                    }
                })
                .map_err(|e| classify_curl_error(&e, None))?;
            transfer.perform()
        };

        let mut sink = sink.into_inner();
        match sink.stop.take() {
            Some(Stop::Cancel) => {
                drop(sink.file.take());
                remove_partial(&sink.path);
                return Err(TransferError::Cancelled);
            }
            Some(Stop::Requeue) => return Ok(TransferOutcome::Requeued),
            Some(Stop::Write(e)) => {
                return Err(TransferError::Write(format!("{}: {}", sink.path.display(), e)))
            }
            None => {}
        }

        if let Err(e) = performed {
            if ctx.control.is_cancelled() {
                drop(sink.file.take());
                remove_partial(&sink.path);
                return Err(TransferError::Cancelled);
            }
            let status = easy.response_code().ok().or(sink.headers.status);
            return Err(classify_curl_error(&e, status));
        }

        // Empty bodies never reach the write callback.
        sink.open(ctx)?;
        if let Some(mut file) = sink.file.take() {
            file.flush()?;
        }

        let bytes = sink.tracker.transferred();
        if let Some(expected) = sink.headers.content_length {
            if bytes < expected {
                return Err(TransferError::Network(format!(
                    "connection closed after {} of {} bytes",
                    bytes, expected
                )));
            }
        }
        if sink.tracker.total() == 0 {
            sink.tracker.set_total(bytes);
        }
        let mut last = sink.tracker.update();
        last.progress = Some(1.0);
        ctx.report(last);

        Ok(TransferOutcome::Completed {
            path: sink.path,
            bytes,
        })
    }
}

/// Deletes a partial target file; a missing file is fine.
pub(crate) fn remove_partial(path: &std::path::Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("removed partial file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("could not remove {}: {}", path.display(), e),
    }
}
