//! Transfer items: the tracked record of one requested download.

mod kind;
mod signals;
mod state;
mod update;

pub use kind::{detect_kind, is_media_url, Quality, TransferKind};
pub use signals::{checkpoint, Checkpoint, ControlSignals, TransferControl, PAUSE_POLL_INTERVAL};
pub use state::{StateError, TransferState};
pub use update::{ItemUpdate, ProgressEvent};

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::id::ItemId;
use crate::progress::ETA_UNKNOWN;
use crate::url_model;

/// What the caller asks for when adding a transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub destination: PathBuf,
    /// Explicit kind; when None it is detected from the URL.
    pub kind: Option<TransferKind>,
    /// Quality used when the detected kind is media.
    pub quality: Option<Quality>,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into().trim().to_string(),
            destination: destination.into(),
            kind: None,
            quality: None,
        }
    }

    pub fn with_kind(mut self, kind: TransferKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// State and data of one transfer. Snapshots handed out by the manager are
/// clones; the live record stays in the manager's table.
#[derive(Debug, Clone, Serialize)]
pub struct TransferItem {
    pub id: ItemId,
    pub url: String,
    pub destination: PathBuf,
    pub filename: String,
    #[serde(flatten)]
    pub kind: TransferKind,
    pub state: TransferState,
    /// Fraction complete in [0.0, 1.0].
    pub progress: f64,
    /// 0 = unknown.
    pub total_size: u64,
    pub transferred_size: u64,
    /// Smoothed bytes per second.
    pub speed: f64,
    pub time_remaining: String,
    pub error_message: String,
    pub scan_status: Option<String>,
    #[serde(skip)]
    signals: Arc<ControlSignals>,
}

impl TransferItem {
    /// Creates a QUEUED item. `default_quality` applies when the request names no
    /// quality and the URL is detected as media.
    pub fn new(request: TransferRequest, default_quality: Quality) -> Self {
        let id = ItemId::generate();
        let quality = request.quality.unwrap_or(default_quality);
        let kind = request
            .kind
            .unwrap_or_else(|| detect_kind(&request.url, quality));
        let filename = url_model::derive_filename(&request.url, None)
            .unwrap_or_else(|| format!("download_{}.file", id));
        Self {
            id,
            url: request.url,
            destination: request.destination,
            filename,
            kind,
            state: TransferState::Queued,
            progress: 0.0,
            total_size: 0,
            transferred_size: 0,
            speed: 0.0,
            time_remaining: ETA_UNKNOWN.to_string(),
            error_message: String::new(),
            scan_status: None,
            signals: Arc::new(ControlSignals::new()),
        }
    }

    /// Target path of the transfer (destination directory + derived filename).
    pub fn filepath(&self) -> PathBuf {
        self.destination.join(&self.filename)
    }

    pub(crate) fn signals(&self) -> &Arc<ControlSignals> {
        &self.signals
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.signals.is_cancelled()
    }

    pub fn is_pause_requested(&self) -> bool {
        self.signals.is_paused()
    }

    /// Validated state change.
    pub fn transition(&mut self, next: TransferState) -> Result<(), StateError> {
        if !self.state.can_transition_to(next) {
            return Err(StateError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Forget progress of a previous attempt (the next admission restarts from byte 0).
    pub fn reset_progress(&mut self) {
        self.progress = 0.0;
        self.transferred_size = 0;
        self.speed = 0.0;
        self.time_remaining = ETA_UNKNOWN.to_string();
        self.error_message.clear();
    }

    /// Applies a partial update. The state change (if any) is validated first;
    /// on rejection nothing is applied.
    pub fn apply(&mut self, update: &ItemUpdate) -> Result<(), StateError> {
        if let Some(next) = update.state {
            if next != self.state {
                self.transition(next)?;
            }
        }
        if let Some(p) = update.progress {
            self.progress = p.clamp(0.0, 1.0);
        }
        if let Some(t) = update.total_size {
            self.total_size = t;
        }
        if let Some(n) = update.transferred_size {
            self.transferred_size = n;
        }
        if let Some(s) = update.speed {
            self.speed = s.max(0.0);
        }
        if let Some(ref eta) = update.time_remaining {
            self.time_remaining = eta.clone();
        }
        if let Some(ref name) = update.filename {
            self.filename = name.clone();
        }
        if let Some(ref msg) = update.error_message {
            self.error_message = msg.clone();
        }
        if let Some(ref status) = update.scan_status {
            self.scan_status = Some(status.clone());
        }
        Ok(())
    }
}
