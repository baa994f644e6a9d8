//! Loadify core: a multi-transfer download orchestrator.
//!
//! [`manager::DownloadManager`] owns the item table and wires together the
//! admission [`dispatcher`], one [`worker`] thread per running transfer, the
//! shared bandwidth [`limiter`], the wall-clock [`scheduler`] for deferred
//! starts, and post-completion [`checksum`] scanning.

pub mod checksum;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod id;
pub mod item;
pub mod limiter;
pub mod logging;
pub mod manager;
pub mod network;
pub mod progress;
pub mod scheduler;
pub mod transfer;
pub mod url_model;
pub mod worker;

pub use error::TransferError;
pub use id::{ItemId, JobId};
pub use item::{ItemUpdate, ProgressEvent, Quality, TransferItem, TransferKind, TransferRequest, TransferState};
pub use limiter::BandwidthLimiter;
pub use manager::{DownloadManager, ManagerError, ManagerOptions, Stats};
