//! End-to-end transfers against a local HTTP server.

mod common;

use std::path::Path;
use std::time::{Duration, Instant};

use common::http_server::{self, Route};
use loadify_core::checksum::sha256_path;
use loadify_core::{
    DownloadManager, ItemId, ManagerOptions, TransferRequest, TransferState,
};
use tempfile::tempdir;

fn body(len: usize) -> Vec<u8> {
    (0u8..=250).cycle().take(len).collect()
}

fn manager(cap: usize) -> DownloadManager {
    let opts = ManagerOptions {
        max_concurrent: cap,
        scheduler_tick: Duration::from_millis(50),
        ..ManagerOptions::default()
    };
    DownloadManager::new(opts, None).unwrap()
}

fn wait_state(m: &DownloadManager, id: ItemId, want: TransferState, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        match m.get(id) {
            Some(item) if item.state == want => return true,
            Some(item) if item.state.is_terminal() => return false,
            _ => {}
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn request(base: &str, path: &str, dest: &Path) -> TransferRequest {
    TransferRequest::new(format!("{}{}", base, path), dest)
}

#[test]
fn file_download_completes_and_is_verified() {
    let data = body(200 * 1024);
    let base = http_server::start(vec![("/files/debian.iso", Route::new(data.clone()))]);
    let dest = tempdir().unwrap();
    let m = manager(3);

    let id = m.add(request(&base, "/files/debian.iso", dest.path()));
    assert!(wait_state(&m, id, TransferState::Completed, Duration::from_secs(10)));

    let path = dest.path().join("debian.iso");
    assert_eq!(std::fs::read(&path).unwrap(), data);
    let item = m.get(id).unwrap();
    assert_eq!(item.total_size, data.len() as u64);
    assert_eq!(item.transferred_size, data.len() as u64);
    assert_eq!(item.progress, 1.0);

    let expected = format!("sha256:{}", sha256_path(&path).unwrap());
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && m.get(id).unwrap().scan_status.as_deref() != Some(expected.as_str()) {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(m.get(id).unwrap().scan_status, Some(expected));
}

#[test]
fn missing_source_ends_in_error() {
    let base = http_server::start(vec![]);
    let dest = tempdir().unwrap();
    let m = manager(3);

    let id = m.add(request(&base, "/nope.bin", dest.path()));
    assert!(wait_state(&m, id, TransferState::Error, Duration::from_secs(10)));
    let item = m.get(id).unwrap();
    assert!(item.error_message.contains("404"), "{}", item.error_message);
    assert!(!dest.path().join("nope.bin").exists());
}

#[test]
fn content_disposition_names_the_file() {
    let data = body(10_000);
    let base = http_server::start(vec![(
        "/get",
        Route::new(data.clone()).with_disposition("attachment; filename=\"report 2024.pdf\""),
    )]);
    let dest = tempdir().unwrap();
    let m = manager(1);

    let id = m.add(request(&base, "/get", dest.path()));
    assert_eq!(m.get(id).unwrap().filename, "get");
    assert!(wait_state(&m, id, TransferState::Completed, Duration::from_secs(10)));
    assert_eq!(m.get(id).unwrap().filename, "report_2024.pdf");
    assert_eq!(
        std::fs::read(dest.path().join("report_2024.pdf")).unwrap(),
        data
    );
    assert!(!dest.path().join("get").exists());
}

#[test]
fn bandwidth_limit_slows_the_transfer() {
    // 300 KB at 100 KB/s with a full 100 KB bucket: about two seconds.
    let data = body(300_000);
    let base = http_server::start(vec![("/big.bin", Route::new(data.clone()))]);
    let dest = tempdir().unwrap();
    let m = manager(1);
    m.configure_limiter(true, 100_000.0);

    let start = Instant::now();
    let id = m.add(request(&base, "/big.bin", dest.path()));
    assert!(wait_state(&m, id, TransferState::Completed, Duration::from_secs(15)));
    let secs = start.elapsed().as_secs_f64();
    assert!(secs >= 1.7, "finished too fast: {secs}");
    assert_eq!(std::fs::read(dest.path().join("big.bin")).unwrap(), data);
}

#[test]
fn cancel_mid_transfer_removes_partial_file() {
    let data = body(400_000);
    let base = http_server::start(vec![(
        "/slow.bin",
        Route::new(data).trickle(8 * 1024, Duration::from_millis(50)),
    )]);
    let dest = tempdir().unwrap();
    let m = manager(1);

    let id = m.add(request(&base, "/slow.bin", dest.path()));
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && m.get(id).unwrap().transferred_size == 0 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(dest.path().join("slow.bin").exists());
    m.cancel(id).unwrap();
    assert!(wait_state(&m, id, TransferState::Cancelled, Duration::from_secs(10)));
    assert!(!dest.path().join("slow.bin").exists());
}

#[test]
fn pause_then_resume_finishes_with_full_content() {
    let data = body(160 * 1024);
    let base = http_server::start(vec![(
        "/paced.bin",
        Route::new(data.clone()).trickle(16 * 1024, Duration::from_millis(40)),
    )]);
    let dest = tempdir().unwrap();
    let m = manager(1);

    let id = m.add(request(&base, "/paced.bin", dest.path()));
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && m.get(id).unwrap().transferred_size == 0 {
        std::thread::sleep(Duration::from_millis(5));
    }
    m.pause(id).unwrap();
    assert!(wait_state(&m, id, TransferState::Paused, Duration::from_secs(5)));
    let frozen = m.get(id).unwrap().transferred_size;
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(m.get(id).unwrap().transferred_size, frozen);

    m.resume(id).unwrap();
    assert!(wait_state(&m, id, TransferState::Completed, Duration::from_secs(15)));
    assert_eq!(std::fs::read(dest.path().join("paced.bin")).unwrap(), data);
}

#[test]
fn concurrency_cap_holds_over_http() {
    let routes: Vec<(&str, Route)> = ["/a", "/b", "/c", "/d"]
        .into_iter()
        .map(|p| (p, Route::new(body(40 * 1024)).trickle(8 * 1024, Duration::from_millis(30))))
        .collect();
    let base = http_server::start(routes);
    let dest = tempdir().unwrap();
    let m = manager(2);

    let ids: Vec<ItemId> = ["/a", "/b", "/c", "/d"]
        .iter()
        .map(|p| m.add(request(&base, p, dest.path())))
        .collect();
    let deadline = Instant::now() + Duration::from_secs(20);
    while Instant::now() < deadline && !m.is_settled() {
        assert!(m.stats().active <= 2);
        std::thread::sleep(Duration::from_millis(5));
    }
    for id in ids {
        assert_eq!(m.get(id).unwrap().state, TransferState::Completed);
    }
}

/// Waits until the first bytes of `id` have been written.
fn wait_first_bytes(m: &DownloadManager, id: ItemId) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && m.get(id).unwrap().transferred_size == 0 {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(m.get(id).unwrap().transferred_size > 0);
}

fn silent_route() -> Route {
    // 8 KiB, then nothing for 12 s: well inside the 30 s stall timeout.
    Route::new(body(32 * 1024)).trickle(8 * 1024, Duration::from_secs(12))
}

#[test]
fn cancel_is_observed_while_the_server_is_silent() {
    let base = http_server::start(vec![("/stalled.bin", silent_route())]);
    let dest = tempdir().unwrap();
    let m = manager(1);

    let id = m.add(request(&base, "/stalled.bin", dest.path()));
    wait_first_bytes(&m, id);
    let start = Instant::now();
    m.cancel(id).unwrap();
    assert!(wait_state(&m, id, TransferState::Cancelled, Duration::from_secs(4)));
    assert!(start.elapsed() < Duration::from_secs(4));
    assert!(!dest.path().join("stalled.bin").exists());
}

#[test]
fn pause_is_observed_while_the_server_is_silent() {
    let base = http_server::start(vec![("/stalled.bin", silent_route())]);
    let dest = tempdir().unwrap();
    let m = manager(1);

    let id = m.add(request(&base, "/stalled.bin", dest.path()));
    wait_first_bytes(&m, id);
    m.pause(id).unwrap();
    assert!(wait_state(&m, id, TransferState::Paused, Duration::from_secs(4)));

    m.cancel(id).unwrap();
    assert!(wait_state(&m, id, TransferState::Cancelled, Duration::from_secs(4)));
}
