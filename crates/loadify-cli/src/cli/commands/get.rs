//! Get command: run the engine for a batch of URLs until every transfer settles.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use loadify_core::checksum;
use loadify_core::config;
use loadify_core::{
    DownloadManager, ManagerOptions, ProgressEvent, Quality, TransferRequest, TransferState,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cli::control_socket;
use crate::cli::display;

const SETTLE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default)]
pub struct GetArgs {
    pub urls: Vec<String>,
    pub dest: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub limit_kib: Option<f64>,
    pub quality: Option<String>,
    pub start_at: Option<DateTime<Local>>,
    pub json: bool,
}

/// Options for this run: config file values overridden by command-line flags.
pub fn manager_options(cfg: &config::LoadifyConfig, args: &GetArgs) -> ManagerOptions {
    let mut options = ManagerOptions::from_config(cfg);
    if let Some(jobs) = args.jobs {
        options.max_concurrent = jobs.max(1);
    }
    if let Some(kib) = args.limit_kib {
        options.speed_limit = if kib > 0.0 { kib * 1024.0 } else { 0.0 };
    }
    options
}

pub async fn run_get(args: GetArgs) -> Result<()> {
    let cfg = config::load_or_init()?;
    let options = manager_options(&cfg, &args);
    let dest = match args.dest.clone().or_else(|| cfg.download_dir.clone()) {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&dest).with_context(|| format!("create {}", dest.display()))?;
    let quality = args.quality.as_deref().map(Quality::from_name);

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let manager = Arc::new(DownloadManager::new(options, Some(tx))?);

    let socket_path = config::control_socket_path()?;
    let listener =
        match control_socket::spawn_control_listener(Arc::clone(&manager), &socket_path).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                eprintln!("warning: control socket unavailable: {:#}", e);
                None
            }
        };

    for url in &args.urls {
        let mut request = TransferRequest::new(url.clone(), dest.clone());
        if let Some(q) = quality {
            request = request.with_quality(q);
        }
        match args.start_at {
            Some(at) => {
                let (id, job) = manager.add_scheduled(request, at);
                println!("{}  {}  starts {} ({})", id, url, at.format("%Y-%m-%d %H:%M:%S"), job);
            }
            None => {
                let id = manager.add(request);
                println!("{}  {}", id, url);
            }
        }
    }

    let mut poll = tokio::time::interval(SETTLE_POLL);
    let mut interrupted = false;
    loop {
        tokio::select! {
            Some(event) = rx.recv() => print_event(&event, args.json),
            _ = poll.tick() => {
                if is_done(&manager) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted, cancelling transfers");
                manager.shutdown();
                interrupted = true;
                break;
            }
        }
    }
    while let Ok(event) = rx.try_recv() {
        print_event(&event, args.json);
    }

    if let Some(handle) = listener {
        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }

    let items = manager.list();
    if !args.json {
        println!();
        for item in &items {
            println!("{}", display::item_line(item));
        }
    }
    let failed = items
        .iter()
        .filter(|item| item.state == TransferState::Error)
        .count();
    if interrupted {
        bail!("interrupted");
    }
    if failed > 0 {
        bail!("{} of {} transfer(s) failed", failed, items.len());
    }
    Ok(())
}

/// Settled and no checksum still being computed.
fn is_done(manager: &DownloadManager) -> bool {
    manager.is_settled()
        && !manager
            .list()
            .iter()
            .any(|item| checksum::is_scan_pending(item.scan_status.as_deref()))
}

fn print_event(event: &ProgressEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("serialize event: {}", e),
        }
    } else if let Some(line) = display::update_line(event.item_id, &event.update) {
        println!("{}", line);
    }
}
