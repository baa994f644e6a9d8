//! Lifecycle state of a transfer item and its allowed transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// High-level lifecycle state of a transfer item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    Queued,
    Downloading,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Queued => "QUEUED",
            TransferState::Downloading => "DOWNLOADING",
            TransferState::Paused => "PAUSED",
            TransferState::Completed => "COMPLETED",
            TransferState::Error => "ERROR",
            TransferState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Some(TransferState::Queued),
            "DOWNLOADING" => Some(TransferState::Downloading),
            "PAUSED" => Some(TransferState::Paused),
            "COMPLETED" => Some(TransferState::Completed),
            "ERROR" => Some(TransferState::Error),
            "CANCELLED" => Some(TransferState::Cancelled),
            _ => None,
        }
    }

    /// Completed, Error and Cancelled never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Error | TransferState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (a, b) if a == b => false,
            (Queued, Downloading | Paused | Cancelled | Error) => true,
            (Downloading, Paused | Queued | Completed | Error | Cancelled) => true,
            (Paused, Queued | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to}")]
pub struct StateError {
    pub from: TransferState,
    pub to: TransferState,
}
