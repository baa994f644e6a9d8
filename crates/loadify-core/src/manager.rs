//! The orchestrator: item table, admission, workers, scheduling and scanning.
//!
//! Lock order is item table first, then the start-job map, then dispatcher or
//! scheduler. The dispatcher calls back into [`Launcher::launch`] without
//! holding its own lock; scheduled actions run outside the scheduler lock.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::checksum::{ChecksumScanner, Scanner};
use crate::config::LoadifyConfig;
use crate::dispatcher::{Admission, Dispatcher, Launcher, DEFAULT_MAX_CONCURRENT};
use crate::id::{ItemId, JobId};
use crate::item::{
    ItemUpdate, ProgressEvent, Quality, TransferControl, TransferItem, TransferRequest,
    TransferState,
};
use crate::limiter::BandwidthLimiter;
use crate::network::NetworkSettings;
use crate::scheduler::{ScheduledJob, TimeScheduler, DEFAULT_TICK};
use crate::transfer::{Strategies, TransferContext, UpdateSink};
use crate::worker::{TransferWorker, WorkerResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("unknown item {0}")]
    UnknownItem(ItemId),
    #[error("cannot {action} {id}: item is {state}")]
    InvalidState {
        id: ItemId,
        state: TransferState,
        action: &'static str,
    },
}

/// Construction parameters, usually derived from [`LoadifyConfig`].
#[derive(Clone)]
pub struct ManagerOptions {
    pub max_concurrent: usize,
    pub default_quality: Quality,
    pub network: NetworkSettings,
    /// Aggregate cap in bytes per second; 0 disables it.
    pub speed_limit: f64,
    pub scheduler_tick: Duration,
    pub strategies: Strategies,
    pub scanner: Option<Arc<dyn Scanner>>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            default_quality: Quality::Best,
            network: NetworkSettings::default(),
            speed_limit: 0.0,
            scheduler_tick: DEFAULT_TICK,
            strategies: Strategies::default(),
            scanner: Some(Arc::new(ChecksumScanner)),
        }
    }
}

impl ManagerOptions {
    pub fn from_config(cfg: &LoadifyConfig) -> Self {
        Self {
            max_concurrent: cfg.max_concurrent,
            default_quality: Quality::from_name(&cfg.media.default_quality),
            network: cfg.network_settings(),
            speed_limit: cfg.speed_limit.bytes_per_sec(),
            scheduler_tick: cfg.scheduler_tick(),
            strategies: Strategies::with_extractor(cfg.media.extractor.clone()),
            scanner: cfg
                .verify_checksums
                .then(|| Arc::new(ChecksumScanner) as Arc<dyn Scanner>),
        }
    }
}

/// Aggregate figures over the item table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Stats {
    pub active: usize,
    pub queued: usize,
    pub paused: usize,
    pub finished: usize,
    pub failed: usize,
    /// Sum of the smoothed speeds of downloading items, bytes per second.
    pub total_speed: f64,
}

struct Inner {
    items: Mutex<BTreeMap<ItemId, TransferItem>>,
    dispatcher: Dispatcher,
    scheduler: TimeScheduler,
    /// Pending deferred start per item, dropped once it fires or the item is
    /// cancelled, resumed or removed.
    starts: Mutex<HashMap<ItemId, JobId>>,
    limiter: Arc<BandwidthLimiter>,
    network: RwLock<NetworkSettings>,
    default_quality: Quality,
    strategies: Strategies,
    scanner: Option<Arc<dyn Scanner>>,
    events: Option<UnboundedSender<ProgressEvent>>,
    me: Weak<Inner>,
}

type Items = BTreeMap<ItemId, TransferItem>;

impl Inner {
    fn items(&self) -> MutexGuard<'_, Items> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn starts(&self) -> MutexGuard<'_, HashMap<ItemId, JobId>> {
        self.starts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancels the pending deferred start of `id`, if any.
    fn drop_start(&self, id: ItemId) {
        let job = self.starts().remove(&id);
        if let Some(job) = job {
            if self.scheduler.cancel(job) {
                tracing::debug!(item = %id, %job, "deferred start dropped");
            }
        }
    }

    /// Registers the deferred start of a QUEUED item. The caller holds the item
    /// table, so the action cannot look the job up before it is recorded.
    fn schedule_start(&self, id: ItemId, fire_time: DateTime<Local>) -> JobId {
        let me = self.me.clone();
        let job = self
            .scheduler
            .schedule_with(fire_time, format!("start {}", id), move |job| {
                Box::new(move || {
                    let inner = me
                        .upgrade()
                        .ok_or_else(|| anyhow::anyhow!("manager is gone"))?;
                    inner.start_scheduled(id, job);
                    Ok(())
                })
            });
        let replaced = self.starts().insert(id, job);
        if let Some(old) = replaced {
            self.scheduler.cancel(old);
        }
        job
    }

    /// Action of a deferred start. A start that was replaced or dropped, or
    /// whose item left QUEUED in the meantime, does nothing.
    fn start_scheduled(&self, id: ItemId, job: JobId) {
        let items = self.items();
        {
            let mut starts = self.starts();
            if starts.get(&id) != Some(&job) {
                return;
            }
            starts.remove(&id);
        }
        match items.get(&id) {
            Some(item) if item.state == TransferState::Queued => {
                tracing::info!(item = %id, %job, "deferred start fired");
                self.dispatcher.enqueue(id);
            }
            Some(item) => {
                tracing::debug!(item = %id, state = %item.state, "deferred start skipped");
            }
            None => {}
        }
    }

    fn emit(&self, id: ItemId, update: ItemUpdate) {
        if let Some(tx) = &self.events {
            let _ = tx.send(ProgressEvent {
                item_id: id,
                update,
            });
        }
    }

    /// Applies and publishes an update while the caller holds the table.
    fn apply_locked(&self, item: &mut TransferItem, update: ItemUpdate) {
        match item.apply(&update) {
            Ok(()) => self.emit(item.id, update),
            Err(e) => tracing::warn!(item = %item.id, "rejected update: {}", e),
        }
    }

    fn set_state_locked(&self, item: &mut TransferItem, state: TransferState) {
        self.apply_locked(item, ItemUpdate::state(state));
    }

    /// Update produced by a worker or the scanner.
    fn on_update(&self, id: ItemId, mut update: ItemUpdate) {
        let mut items = self.items();
        let Some(item) = items.get_mut(&id) else {
            return;
        };
        // A resume can land before the worker reports its pause.
        if update.state == Some(TransferState::Paused) && !item.is_pause_requested() {
            update.state = None;
        }
        if !update.is_empty() {
            self.apply_locked(item, update);
        }
    }

    fn on_finished(&self, id: ItemId, result: WorkerResult) {
        let mut completed = None;
        {
            let mut items = self.items();
            let mut requeue = false;
            if let Some(item) = items.get_mut(&id) {
                let update = match result {
                    WorkerResult::Completed { path, bytes } => {
                        let total = if item.total_size == 0 { bytes } else { item.total_size };
                        completed = Some(path);
                        ItemUpdate {
                            state: Some(TransferState::Completed),
                            progress: Some(1.0),
                            transferred_size: Some(bytes),
                            total_size: Some(total),
                            speed: Some(0.0),
                            time_remaining: Some(crate::progress::format_eta(Some(0.0))),
                            ..ItemUpdate::default()
                        }
                    }
                    WorkerResult::Requeued if item.is_pause_requested() => {
                        // Paused again before the worker stood down.
                        ItemUpdate::state(TransferState::Paused)
                    }
                    WorkerResult::Requeued => {
                        requeue = true;
                        ItemUpdate::state(TransferState::Queued)
                    }
                    WorkerResult::Cancelled => ItemUpdate::state(TransferState::Cancelled),
                    WorkerResult::Failed(msg) => ItemUpdate::failed(msg),
                };
                self.apply_locked(item, update);
            }
            self.dispatcher.on_worker_finished(id, requeue);
        }
        if let (Some(path), Some(scanner)) = (completed, &self.scanner) {
            let me = self.me.clone();
            scanner.submit(
                path,
                id,
                Arc::new(move |status| {
                    if let Some(inner) = me.upgrade() {
                        inner.on_update(id, ItemUpdate::scan_status(status));
                    }
                }),
            );
        }
    }

    fn sink_for(&self, id: ItemId) -> UpdateSink {
        let me = self.me.clone();
        Arc::new(move |update| {
            if let Some(inner) = me.upgrade() {
                inner.on_update(id, update);
            }
        })
    }

    fn lookup<'a>(items: &'a mut Items, id: ItemId) -> Result<&'a mut TransferItem, ManagerError> {
        items.get_mut(&id).ok_or(ManagerError::UnknownItem(id))
    }

    fn enqueue(&self, id: ItemId) -> Result<(), ManagerError> {
        let mut items = self.items();
        let item = Self::lookup(&mut items, id)?;
        if item.state != TransferState::Queued {
            return Err(ManagerError::InvalidState {
                id,
                state: item.state,
                action: "enqueue",
            });
        }
        self.drop_start(id);
        self.dispatcher.enqueue(id);
        Ok(())
    }
}

impl Launcher for Inner {
    fn launch(&self, id: ItemId) -> Admission {
        let mut items = self.items();
        let Some(item) = items.get_mut(&id) else {
            return Admission::Skipped;
        };
        if item.state != TransferState::Queued {
            return Admission::Skipped;
        }
        // Signals set while the slot was being reserved.
        if item.is_cancel_requested() {
            self.set_state_locked(item, TransferState::Cancelled);
            return Admission::Skipped;
        }
        if item.is_pause_requested() {
            self.set_state_locked(item, TransferState::Paused);
            return Admission::Skipped;
        }

        item.reset_progress();
        self.apply_locked(
            item,
            ItemUpdate {
                state: Some(TransferState::Downloading),
                progress: Some(0.0),
                transferred_size: Some(0),
                speed: Some(0.0),
                ..ItemUpdate::default()
            },
        );
        let network = self
            .network
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let control: Arc<dyn TransferControl> = Arc::clone(item.signals()) as Arc<dyn TransferControl>;
        let ctx = TransferContext::new(
            id,
            item.url.clone(),
            item.destination.clone(),
            item.filename.clone(),
            item.kind,
            control,
            Arc::clone(&self.limiter),
            network,
            self.sink_for(id),
        );
        let strategy = self.strategies.for_kind(&item.kind);
        let me = self.me.clone();
        let spawned = TransferWorker::spawn(
            ctx,
            strategy,
            Box::new(move |id, result| {
                if let Some(inner) = me.upgrade() {
                    inner.on_finished(id, result);
                }
            }),
        );
        match spawned {
            Ok(_) => {
                tracing::info!(item = %id, "transfer started");
                Admission::Started
            }
            Err(e) => {
                tracing::error!(item = %id, "could not start worker: {}", e);
                self.apply_locked(item, ItemUpdate::failed(format!("could not start worker: {}", e)));
                Admission::Skipped
            }
        }
    }
}

/// Owns the whole engine. Dropping it stops admission and scheduling and
/// cancels running transfers.
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    /// Builds the manager and starts its admission and scheduler loops. Progress
    /// events go to `events` when given.
    pub fn new(
        options: ManagerOptions,
        events: Option<UnboundedSender<ProgressEvent>>,
    ) -> std::io::Result<Self> {
        let inner = Arc::new_cyclic(|me| Inner {
            items: Mutex::new(BTreeMap::new()),
            dispatcher: Dispatcher::new(options.max_concurrent),
            scheduler: TimeScheduler::new(options.scheduler_tick),
            starts: Mutex::new(HashMap::new()),
            limiter: Arc::new(BandwidthLimiter::new(options.speed_limit)),
            network: RwLock::new(options.network),
            default_quality: options.default_quality,
            strategies: options.strategies,
            scanner: options.scanner,
            events,
            me: me.clone(),
        });
        inner
            .dispatcher
            .start(Arc::downgrade(&inner) as Weak<dyn Launcher>)?;
        inner.scheduler.start()?;
        Ok(Self { inner })
    }

    /// Creates a QUEUED item without submitting it for admission.
    pub fn create(&self, request: TransferRequest) -> ItemId {
        let item = TransferItem::new(request, self.inner.default_quality);
        let id = item.id;
        tracing::info!(item = %id, url = %item.url, kind = ?item.kind, "item created");
        let update = ItemUpdate {
            state: Some(TransferState::Queued),
            filename: Some(item.filename.clone()),
            ..ItemUpdate::default()
        };
        let mut items = self.inner.items();
        items.insert(id, item);
        self.inner.emit(id, update);
        id
    }

    /// Creates an item and queues it.
    pub fn add(&self, request: TransferRequest) -> ItemId {
        let id = self.create(request);
        self.inner.dispatcher.enqueue(id);
        id
    }

    /// Submits a QUEUED item for admission.
    pub fn enqueue(&self, id: ItemId) -> Result<(), ManagerError> {
        self.inner.enqueue(id)
    }

    pub fn cancel(&self, id: ItemId) -> Result<(), ManagerError> {
        let mut items = self.inner.items();
        let item = Inner::lookup(&mut items, id)?;
        if item.state.is_terminal() {
            return Err(ManagerError::InvalidState {
                id,
                state: item.state,
                action: "cancel",
            });
        }
        item.signals().cancel();
        self.inner.drop_start(id);
        if !self.inner.dispatcher.is_live(id) {
            self.inner.dispatcher.dequeue(id);
            self.inner.set_state_locked(item, TransferState::Cancelled);
        }
        tracing::info!(item = %id, "cancel requested");
        Ok(())
    }

    pub fn pause(&self, id: ItemId) -> Result<(), ManagerError> {
        let mut items = self.inner.items();
        let item = Inner::lookup(&mut items, id)?;
        match item.state {
            TransferState::Paused => return Ok(()),
            TransferState::Queued | TransferState::Downloading => {}
            state => {
                return Err(ManagerError::InvalidState {
                    id,
                    state,
                    action: "pause",
                })
            }
        }
        item.signals().pause();
        if !self.inner.dispatcher.is_live(id) {
            self.inner.dispatcher.dequeue(id);
            self.inner.set_state_locked(item, TransferState::Paused);
        }
        tracing::info!(item = %id, "pause requested");
        Ok(())
    }

    /// Resumes a paused item: it goes to the back of the queue and restarts
    /// once admitted.
    pub fn resume(&self, id: ItemId) -> Result<(), ManagerError> {
        let mut items = self.inner.items();
        let item = Inner::lookup(&mut items, id)?;
        let was_paused = item.signals().clear_pause();
        if !was_paused && item.state != TransferState::Paused {
            return Err(ManagerError::InvalidState {
                id,
                state: item.state,
                action: "resume",
            });
        }
        // Resuming starts the item now rather than at its deferred time.
        self.inner.drop_start(id);
        // A live worker notices the cleared flag and stands down; it is requeued
        // when it finishes.
        if !self.inner.dispatcher.is_live(id) {
            if item.state == TransferState::Paused {
                self.inner.set_state_locked(item, TransferState::Queued);
            }
            if item.state == TransferState::Queued {
                self.inner.dispatcher.enqueue(id);
            }
        }
        tracing::info!(item = %id, "resume requested");
        Ok(())
    }

    /// Evicts an item. A running transfer is cancelled.
    pub fn remove(&self, id: ItemId) -> Result<TransferItem, ManagerError> {
        let mut items = self.inner.items();
        let item = items.remove(&id).ok_or(ManagerError::UnknownItem(id))?;
        if !item.state.is_terminal() {
            item.signals().cancel();
        }
        self.inner.drop_start(id);
        self.inner.dispatcher.dequeue(id);
        tracing::info!(item = %id, "item removed");
        Ok(item)
    }

    pub fn get(&self, id: ItemId) -> Option<TransferItem> {
        self.inner.items().get(&id).cloned()
    }

    /// Snapshot of every item in creation order.
    pub fn list(&self) -> Vec<TransferItem> {
        self.inner.items().values().cloned().collect()
    }

    pub fn stats(&self) -> Stats {
        let items = self.inner.items();
        let mut stats = Stats::default();
        for item in items.values() {
            match item.state {
                TransferState::Downloading => {
                    stats.active += 1;
                    stats.total_speed += item.speed;
                }
                TransferState::Queued => stats.queued += 1,
                TransferState::Paused => stats.paused += 1,
                TransferState::Completed => stats.finished += 1,
                TransferState::Error => stats.failed += 1,
                TransferState::Cancelled => {}
            }
        }
        stats
    }

    /// True when no item can make further progress on its own and no start is
    /// scheduled. Paused items count as unsettled.
    pub fn is_settled(&self) -> bool {
        let items = self.inner.items();
        items.values().all(|i| i.state.is_terminal()) && self.inner.scheduler.pending().is_empty()
    }

    pub fn configure_limiter(&self, enabled: bool, bytes_per_sec: f64) {
        self.inner.limiter.configure(enabled, bytes_per_sec);
    }

    pub fn limiter(&self) -> Arc<BandwidthLimiter> {
        Arc::clone(&self.inner.limiter)
    }

    pub fn set_max_concurrent(&self, n: usize) {
        self.inner.dispatcher.set_max_concurrent(n);
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.dispatcher.max_concurrent()
    }

    /// Network settings for transfers started from now on.
    pub fn set_network(&self, network: NetworkSettings) {
        *self.inner.network.write().unwrap_or_else(|e| e.into_inner()) = network;
    }

    /// Runs `action` at `fire_time` on the scheduler thread.
    pub fn schedule(
        &self,
        fire_time: DateTime<Local>,
        label: impl Into<String>,
        action: crate::scheduler::JobAction,
    ) -> JobId {
        self.inner.scheduler.schedule(fire_time, label, action)
    }

    /// Queues an existing QUEUED item at `fire_time`. Replaces any earlier
    /// deferred start of the same item.
    pub fn schedule_enqueue(&self, id: ItemId, fire_time: DateTime<Local>) -> Result<JobId, ManagerError> {
        let mut items = self.inner.items();
        let item = Inner::lookup(&mut items, id)?;
        if item.state != TransferState::Queued {
            return Err(ManagerError::InvalidState {
                id,
                state: item.state,
                action: "schedule",
            });
        }
        Ok(self.inner.schedule_start(id, fire_time))
    }

    /// Creates an item now and queues it at `fire_time`.
    pub fn add_scheduled(&self, request: TransferRequest, fire_time: DateTime<Local>) -> (ItemId, JobId) {
        let id = self.create(request);
        let _items = self.inner.items();
        let job = self.inner.schedule_start(id, fire_time);
        (id, job)
    }

    pub fn cancel_scheduled(&self, job: JobId) -> bool {
        self.inner.starts().retain(|_, pending| *pending != job);
        self.inner.scheduler.cancel(job)
    }

    pub fn scheduled(&self) -> Vec<ScheduledJob> {
        self.inner.scheduler.pending()
    }

    /// Where an item is (or will be) written.
    pub fn filepath(&self, id: ItemId) -> Option<PathBuf> {
        self.inner.items().get(&id).map(TransferItem::filepath)
    }

    /// Stops admission and scheduling and cancels running transfers.
    pub fn shutdown(&self) {
        self.inner.dispatcher.stop();
        self.inner.scheduler.stop();
        let items = self.inner.items();
        for item in items.values().filter(|i| !i.state.is_terminal()) {
            item.signals().cancel();
        }
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
