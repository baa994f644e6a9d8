//! Partial field updates flowing from workers (and the scanner) to the item table.

use serde::{Deserialize, Serialize};

use super::state::TransferState;
use crate::id::ItemId;

/// Any subset of an item's mutable fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TransferState>,
    /// Fraction complete in [0.0, 1.0].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transferred_size: Option<u64>,
    /// Smoothed bytes per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_status: Option<String>,
}

impl ItemUpdate {
    pub fn state(state: TransferState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: Some(TransferState::Error),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn filename(name: impl Into<String>) -> Self {
        Self {
            filename: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn scan_status(status: impl Into<String>) -> Self {
        Self {
            scan_status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn with_total_size(mut self, total: u64) -> Self {
        self.total_size = Some(total);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One update for one item, as delivered to the caller's event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub item_id: ItemId,
    #[serde(flatten)]
    pub update: ItemUpdate,
}
