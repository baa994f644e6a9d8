//! Human-readable rendering of items and events.

use loadify_core::checksum::SCAN_IN_PROGRESS;
use loadify_core::{ItemUpdate, TransferItem, TransferState};

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

pub fn human_bytes(bytes: f64) -> String {
    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// One status row: id, state, percentage, sizes, speed, ETA and filename.
pub fn item_line(item: &TransferItem) -> String {
    let size = if item.total_size > 0 {
        format!(
            "{}/{}",
            human_bytes(item.transferred_size as f64),
            human_bytes(item.total_size as f64)
        )
    } else {
        human_bytes(item.transferred_size as f64)
    };
    let mut line = format!(
        "{}  {:<11}  {:>5.1}%  {:>21}  {:>12}/s  ETA {:>8}  {}",
        item.id,
        item.state.as_str(),
        item.progress * 100.0,
        size,
        human_bytes(item.speed),
        item.time_remaining,
        item.filename
    );
    if item.state == TransferState::Error && !item.error_message.is_empty() {
        line.push_str(&format!("  ({})", item.error_message));
    }
    if let Some(scan) = item.scan_status.as_deref() {
        line.push_str(&format!("  [{}]", scan));
    }
    line
}

/// Line for one progress event, or None when it carries nothing worth printing.
pub fn update_line(id: impl std::fmt::Display, update: &ItemUpdate) -> Option<String> {
    if let Some(state) = update.state {
        return Some(match (state, update.error_message.as_deref()) {
            (TransferState::Error, Some(msg)) => format!("{}  {}  {}", id, state, msg),
            _ => format!("{}  {}", id, state),
        });
    }
    if let Some(name) = update.filename.as_deref() {
        return Some(format!("{}  saving as {}", id, name));
    }
    if let Some(scan) = update.scan_status.as_deref() {
        if scan == SCAN_IN_PROGRESS {
            return None;
        }
        return Some(format!("{}  scan {}", id, scan));
    }
    let progress = update.progress?;
    Some(format!(
        "{}  {:>5.1}%  {}/s  ETA {}",
        id,
        progress * 100.0,
        human_bytes(update.speed.unwrap_or(0.0)),
        update.time_remaining.as_deref().unwrap_or("?")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_scale_to_binary_units() {
        assert_eq!(human_bytes(0.0), "0 B");
        assert_eq!(human_bytes(1023.0), "1023 B");
        assert_eq!(human_bytes(1536.0), "1.5 KiB");
        assert_eq!(human_bytes(5.0 * 1024.0 * 1024.0), "5.0 MiB");
    }

    #[test]
    fn state_updates_win_over_progress() {
        let update = ItemUpdate {
            progress: Some(0.5),
            ..ItemUpdate::state(TransferState::Paused)
        };
        assert_eq!(update_line("dl_1", &update).unwrap(), "dl_1  PAUSED");
    }

    #[test]
    fn failure_includes_message() {
        let update = ItemUpdate::failed("source not found: HTTP 404");
        assert_eq!(
            update_line("dl_2", &update).unwrap(),
            "dl_2  ERROR  source not found: HTTP 404"
        );
    }

    #[test]
    fn progress_line_and_silent_scan_start() {
        let update = ItemUpdate {
            progress: Some(0.25),
            speed: Some(2048.0),
            time_remaining: Some("00:00:03".to_string()),
            ..ItemUpdate::default()
        };
        assert_eq!(
            update_line("dl_3", &update).unwrap(),
            "dl_3   25.0%  2.0 KiB/s  ETA 00:00:03"
        );
        assert!(update_line("dl_3", &ItemUpdate::scan_status(SCAN_IN_PROGRESS)).is_none());
        assert!(update_line("dl_3", &ItemUpdate::default()).is_none());
    }
}
