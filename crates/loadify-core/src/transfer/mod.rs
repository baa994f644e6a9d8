//! Transfer strategies and the context a worker hands them.
//!
//! A worker picks one strategy from the item kind when it starts and calls
//! [`Transfer::run`] on its own thread. Strategies report progress through the
//! context, honour pause/cancel at every chunk via [`TransferContext::checkpoint`],
//! and charge every byte to the shared bandwidth limiter.

pub mod direct;
pub mod media;
mod response;

pub use direct::DirectTransfer;
pub use media::{ExtractRequest, ExtractorEvent, MediaExtractor, MediaTransfer, YtDlp};

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::TransferError;
use crate::id::ItemId;
use crate::item::{checkpoint, Checkpoint, ItemUpdate, TransferControl, TransferKind, TransferState};
use crate::limiter::BandwidthLimiter;
use crate::network::NetworkSettings;

/// Receives progress updates produced on a worker thread.
pub type UpdateSink = Arc<dyn Fn(ItemUpdate) + Send + Sync>;

/// Everything a strategy needs for one run. Built by the manager at admission.
pub struct TransferContext {
    pub id: ItemId,
    pub url: String,
    pub destination: PathBuf,
    /// Filename derived at creation; direct transfers may refine it from headers.
    pub filename: String,
    pub kind: TransferKind,
    pub control: Arc<dyn TransferControl>,
    pub limiter: Arc<BandwidthLimiter>,
    pub network: NetworkSettings,
    sink: UpdateSink,
}

impl TransferContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ItemId,
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        filename: impl Into<String>,
        kind: TransferKind,
        control: Arc<dyn TransferControl>,
        limiter: Arc<BandwidthLimiter>,
        network: NetworkSettings,
        sink: UpdateSink,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            destination: destination.into(),
            filename: filename.into(),
            kind,
            control,
            limiter,
            network,
            sink,
        }
    }

    pub fn report(&self, update: ItemUpdate) {
        (self.sink)(update);
    }

    /// Signal check at a chunk boundary; reports PAUSED before blocking in the
    /// pause wait.
    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint_with(|| {})
    }

    /// Like [`checkpoint`](Self::checkpoint), running `on_pause` right after the
    /// PAUSED report (the media strategy stops its child there).
    pub fn checkpoint_with(&self, on_pause: impl FnOnce()) -> Checkpoint {
        checkpoint(self.control.as_ref(), || {
            self.report(ItemUpdate::state(TransferState::Paused));
            on_pause();
        })
    }

    pub fn filepath(&self) -> PathBuf {
        self.destination.join(&self.filename)
    }
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { path: PathBuf, bytes: u64 },
    /// Paused then resumed: the worker stands down and the item goes back in the queue.
    Requeued,
}

/// One way of moving bytes from a source to the destination.
pub trait Transfer: Send + Sync {
    fn run(&self, ctx: &TransferContext) -> Result<TransferOutcome, TransferError>;
}

/// Strategy per transfer kind.
#[derive(Clone)]
pub struct Strategies {
    pub file: Arc<dyn Transfer>,
    pub media: Arc<dyn Transfer>,
}

impl Strategies {
    /// Direct curl transfers plus the given media extractor program.
    pub fn with_extractor(program: impl Into<String>) -> Self {
        Self {
            file: Arc::new(DirectTransfer::new()),
            media: Arc::new(MediaTransfer::new(YtDlp::new(program))),
        }
    }

    pub fn for_kind(&self, kind: &TransferKind) -> Arc<dyn Transfer> {
        if kind.is_media() {
            Arc::clone(&self.media)
        } else {
            Arc::clone(&self.file)
        }
    }
}

impl Default for Strategies {
    fn default() -> Self {
        Self::with_extractor("yt-dlp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ControlSignals, Quality};
    use std::sync::Mutex;

    struct Named(&'static str);

    impl Transfer for Named {
        fn run(&self, _ctx: &TransferContext) -> Result<TransferOutcome, TransferError> {
            Err(TransferError::Extraction(self.0.to_string()))
        }
    }

    fn ctx(sink: UpdateSink, signals: Arc<ControlSignals>) -> TransferContext {
        TransferContext::new(
            ItemId::from(9),
            "https://example.com/a.bin",
            "/tmp/out",
            "a.bin",
            TransferKind::File,
            signals,
            Arc::new(BandwidthLimiter::disabled()),
            NetworkSettings::default(),
            sink,
        )
    }

    #[test]
    fn strategy_selected_by_kind() {
        let s = Strategies {
            file: Arc::new(Named("file")),
            media: Arc::new(Named("media")),
        };
        let c = ctx(Arc::new(|_: ItemUpdate| {}), Arc::new(ControlSignals::new()));
        let media = TransferKind::Media {
            quality: Quality::Audio,
        };
        assert_eq!(
            s.for_kind(&TransferKind::File).run(&c),
            Err(TransferError::Extraction("file".into()))
        );
        assert_eq!(
            s.for_kind(&media).run(&c),
            Err(TransferError::Extraction("media".into()))
        );
    }

    #[test]
    fn pause_is_reported_before_waiting() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let signals = Arc::new(ControlSignals::new());
        let c = ctx(
            Arc::new(move |u: ItemUpdate| seen2.lock().unwrap().push(u)),
            Arc::clone(&signals),
        );
        signals.pause();
        let s2 = Arc::clone(&signals);
        let h = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(150));
            s2.cancel();
        });
        assert_eq!(c.checkpoint(), Checkpoint::Cancel);
        h.join().unwrap();
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[ItemUpdate::state(TransferState::Paused)]
        );
        assert_eq!(c.filepath(), PathBuf::from("/tmp/out/a.bin"));
    }
}
