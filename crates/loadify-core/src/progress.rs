//! Per-transfer progress bookkeeping: bytes, smoothed speed and ETA.
//!
//! Strategies feed byte counts into a `ProgressTracker`; it decides when a new
//! progress update is worth emitting and formats the ETA for display.

use std::time::{Duration, Instant};

use crate::item::ItemUpdate;

/// ETA shown while the remaining time cannot be estimated.
pub const ETA_UNKNOWN: &str = "∞";

/// Speed is sampled over windows of at least this length.
const SAMPLE_WINDOW: Duration = Duration::from_millis(250);

/// Weight of the newest sample in the exponential moving average.
const SMOOTHING: f64 = 0.3;

#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    transferred: u64,
    /// Smoothed bytes per second; None until the first window closes.
    speed: Option<f64>,
    window_start: Instant,
    window_bytes: u64,
    emitted_once: bool,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self::starting_at(total, Instant::now())
    }

    pub fn starting_at(total: u64, now: Instant) -> Self {
        Self {
            total,
            transferred: 0,
            speed: None,
            window_start: now,
            window_bytes: 0,
            emitted_once: false,
        }
    }

    /// Total size once known (0 = unknown).
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Adds `n` freshly written bytes. Returns true when an update should be emitted
    /// (first bytes, or a speed window just closed).
    pub fn record(&mut self, n: u64, now: Instant) -> bool {
        self.transferred += n;
        self.window_bytes += n;
        let elapsed = now.saturating_duration_since(self.window_start);
        let sampled = if elapsed >= SAMPLE_WINDOW {
            let instant = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.speed = Some(match self.speed {
                Some(prev) => SMOOTHING * instant + (1.0 - SMOOTHING) * prev,
                None => instant,
            });
            self.window_start = now;
            self.window_bytes = 0;
            true
        } else {
            false
        };
        let first = !self.emitted_once;
        self.emitted_once = true;
        sampled || first
    }

    /// Moves to an absolute byte count (media extractor reports totals, not deltas).
    /// Returns the delta added, which is 0 if the count went backwards.
    pub fn record_absolute(&mut self, transferred: u64, now: Instant) -> (u64, bool) {
        let delta = transferred.saturating_sub(self.transferred);
        let emit = self.record(delta, now);
        (delta, emit)
    }

    pub fn speed(&self) -> f64 {
        self.speed.unwrap_or(0.0)
    }

    /// Fraction complete in [0.0, 1.0]; 0 while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.transferred as f64 / self.total as f64).min(1.0)
    }

    /// Seconds remaining, None when total or speed is unknown.
    pub fn eta_secs(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.transferred);
        if remaining == 0 {
            return Some(0.0);
        }
        let speed = self.speed();
        if speed <= 0.0 {
            return None;
        }
        Some(remaining as f64 / speed)
    }

    /// Progress fields for the current position.
    pub fn update(&self) -> ItemUpdate {
        ItemUpdate {
            progress: Some(self.fraction()),
            total_size: Some(self.total),
            transferred_size: Some(self.transferred),
            speed: Some(self.speed()),
            time_remaining: Some(format_eta(self.eta_secs())),
            ..ItemUpdate::default()
        }
    }
}

/// `HH:MM:SS`, or `∞` when unknown.
pub fn format_eta(secs: Option<f64>) -> String {
    match secs {
        Some(s) if s.is_finite() && s >= 0.0 => {
            let total = s.round() as u64;
            format!(
                "{:02}:{:02}:{:02}",
                total / 3600,
                (total % 3600) / 60,
                total % 60
            )
        }
        _ => ETA_UNKNOWN.to_string(),
    }
}
