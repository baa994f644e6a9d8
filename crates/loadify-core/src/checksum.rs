//! Post-completion verification.
//!
//! The manager hands every COMPLETED file to a `Scanner`. The default scanner
//! hashes the file with SHA-256 off the worker thread and reports the digest as
//! the item's scan status.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::id::ItemId;

const BUF_SIZE: usize = 64 * 1024;

/// Scan status reported while a scan is running.
pub const SCAN_IN_PROGRESS: &str = "SCANNING";

/// Callback receiving scan-status strings for one item.
pub type ScanReport = Arc<dyn Fn(String) + Send + Sync + 'static>;

/// Something that inspects completed files. Implementations must not block the
/// caller; the status travels back through `report`. A scan counts as pending
/// from the first report until a final one replaces it.
pub trait Scanner: Send + Sync {
    fn submit(&self, path: PathBuf, id: ItemId, report: ScanReport);
}

/// Computes the SHA-256 of each completed file on a short-lived thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChecksumScanner;

impl Scanner for ChecksumScanner {
    fn submit(&self, path: PathBuf, id: ItemId, report: ScanReport) {
        report(SCAN_IN_PROGRESS.to_string());
        let worker_report = Arc::clone(&report);
        let spawned = std::thread::Builder::new()
            .name(format!("scan-{}", id))
            .spawn(move || {
                let report = worker_report;
                match sha256_path(&path) {
                    Ok(digest) => {
                        tracing::debug!(item = %id, %digest, "checksum computed");
                        report(format!("sha256:{}", digest));
                    }
                    Err(e) => {
                        tracing::warn!(item = %id, "checksum failed: {:#}", e);
                        report(format!("scan failed: {:#}", e));
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(item = %id, "could not start scan thread: {}", e);
            report(format!("scan failed: {}", e));
        }
    }
}

/// True when `status` says a scan is still running (or about to start).
pub fn is_scan_pending(status: Option<&str>) -> bool {
    status == Some(SCAN_IN_PROGRESS)
}

/// SHA-256 of a file as lowercase hex, read in bounded chunks.
pub fn sha256_path(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
