//! Cooperative pause/cancel signals.
//!
//! User actions flip the flags from any thread; the worker polls them at every
//! chunk boundary through [`TransferControl`], so the worker logic is the same
//! whichever transfer strategy runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How often a paused worker re-checks its signals.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Read-only view of an item's control signals, as seen by a worker.
pub trait TransferControl: Send + Sync {
    fn is_cancelled(&self) -> bool;
    fn is_paused(&self) -> bool;
}

/// Shared pause and cancel flags of one item. Setting either is idempotent.
#[derive(Debug, Default)]
pub struct ControlSignals {
    cancelled: AtomicBool,
    paused: AtomicBool,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Clears the pause flag; returns whether it was set.
    pub fn clear_pause(&self) -> bool {
        self.paused.swap(false, Ordering::SeqCst)
    }
}

impl TransferControl for ControlSignals {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// What a worker must do after checking its signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Keep transferring.
    Continue,
    /// Cancellation was requested; stop and finalize as cancelled.
    Cancel,
    /// The item was paused and then resumed; stand down so it can be admitted afresh.
    Requeue,
}

/// Checks the signals at a chunk boundary. When paused, calls `on_pause` once and
/// then blocks in a polling wait (without releasing anything the caller holds)
/// until the pause is cleared or cancellation is requested. Cancellation is
/// re-checked on every iteration.
pub fn checkpoint(control: &dyn TransferControl, on_pause: impl FnOnce()) -> Checkpoint {
    if control.is_cancelled() {
        return Checkpoint::Cancel;
    }
    if !control.is_paused() {
        return Checkpoint::Continue;
    }
    on_pause();
    loop {
        if control.is_cancelled() {
            return Checkpoint::Cancel;
        }
        if !control.is_paused() {
            return Checkpoint::Requeue;
        }
        std::thread::sleep(PAUSE_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn idle_signals_continue() {
        let s = ControlSignals::new();
        let mut paused_called = false;
        assert_eq!(checkpoint(&s, || paused_called = true), Checkpoint::Continue);
        assert!(!paused_called);
    }

    #[test]
    fn cancel_wins_over_pause() {
        let s = ControlSignals::new();
        s.pause();
        s.cancel();
        s.cancel();
        assert_eq!(checkpoint(&s, || {}), Checkpoint::Cancel);
    }

    #[test]
    fn cancel_during_pause_is_observed() {
        let s = Arc::new(ControlSignals::new());
        s.pause();
        let s2 = Arc::clone(&s);
        let h = std::thread::spawn(move || checkpoint(s2.as_ref(), || {}));
        std::thread::sleep(Duration::from_millis(150));
        s.cancel();
        assert_eq!(h.join().unwrap(), Checkpoint::Cancel);
    }

    #[test]
    fn clearing_pause_requests_requeue() {
        let s = Arc::new(ControlSignals::new());
        s.pause();
        let s2 = Arc::clone(&s);
        let start = Instant::now();
        let h = std::thread::spawn(move || {
            let mut notified = 0;
            let r = checkpoint(s2.as_ref(), || notified += 1);
            (r, notified)
        });
        std::thread::sleep(Duration::from_millis(150));
        assert!(s.clear_pause());
        assert!(!s.clear_pause());
        let (r, notified) = h.join().unwrap();
        assert_eq!(r, Checkpoint::Requeue);
        assert_eq!(notified, 1);
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
