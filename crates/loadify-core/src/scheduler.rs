//! Deferred actions at wall-clock times.
//!
//! Jobs sit in a min-heap keyed by fire instant; one background loop wakes every
//! tick (or when a job is added) and runs what is due. A job is also due once
//! the wall clock reaches its fire time, and a due instant is pushed back when
//! the wall clock was set back, so clock changes move the fire time with them.
//! Actions run outside the job-table lock and their failures are logged, never
//! propagated.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::id::JobId;
use crate::worker::panic_message;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Upper bound on how long `stop` waits for the loop.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub type JobAction = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

struct Job {
    label: String,
    fire_time: DateTime<Local>,
    action: JobAction,
}

/// A pending job as listed by [`TimeScheduler::pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: JobId,
    pub label: String,
    pub fire_time: DateTime<Local>,
}

#[derive(Default)]
struct Table {
    heap: BinaryHeap<Reverse<(Instant, JobId)>>,
    jobs: HashMap<JobId, Job>,
    running: bool,
}

impl Table {
    /// Removes every job due at `now` / `wall`. Heap entries of cancelled jobs
    /// are dropped.
    fn take_due(&mut self, now: Instant, wall: DateTime<Local>) -> Vec<(JobId, Job)> {
        let mut due = Vec::new();
        let mut later = Vec::new();
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            let Some(fire_time) = self.jobs.get(&id).map(|job| job.fire_time) else {
                self.heap.pop();
                continue;
            };
            let wall_due = fire_time <= wall;
            if at > now && !wall_due {
                break;
            }
            self.heap.pop();
            if wall_due {
                if let Some(job) = self.jobs.remove(&id) {
                    due.push((id, job));
                }
            } else {
                let rest = (fire_time - wall).to_std().unwrap_or(Duration::ZERO);
                later.push(Reverse((now + rest, id)));
            }
        }
        self.heap.extend(later);
        due
    }
}

struct Shared {
    table: Mutex<Table>,
    wake: Condvar,
    tick: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct LoopHandle {
    thread: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

pub struct TimeScheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<LoopHandle>>,
}

impl Default for TimeScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl TimeScheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(Table::default()),
                wake: Condvar::new(),
                tick: tick.max(Duration::from_millis(1)),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Registers `action` to run at `fire_time`; a time in the past means "now".
    pub fn schedule(
        &self,
        fire_time: DateTime<Local>,
        label: impl Into<String>,
        action: JobAction,
    ) -> JobId {
        self.schedule_with(fire_time, label, move |_| action)
    }

    /// Like [`schedule`](Self::schedule), for actions that need their own job id.
    pub fn schedule_with(
        &self,
        fire_time: DateTime<Local>,
        label: impl Into<String>,
        make_action: impl FnOnce(JobId) -> JobAction,
    ) -> JobId {
        let id = JobId::generate();
        let action = make_action(id);
        let label = label.into();
        let delay = (fire_time - Local::now()).to_std().unwrap_or(Duration::ZERO);
        let at = Instant::now() + delay;
        {
            let mut table = self.shared.lock();
            table.heap.push(Reverse((at, id)));
            table.jobs.insert(
                id,
                Job {
                    label: label.clone(),
                    fire_time,
                    action,
                },
            );
        }
        tracing::info!(job = %id, %label, fire_time = %fire_time.format("%Y-%m-%d %H:%M:%S"), "job scheduled");
        self.shared.wake.notify_all();
        id
    }

    /// Removes a pending job. False when it already fired or never existed.
    pub fn cancel(&self, id: JobId) -> bool {
        let removed = self.shared.lock().jobs.remove(&id);
        match removed {
            Some(job) => {
                tracing::info!(job = %id, label = %job.label, "job cancelled");
                true
            }
            None => false,
        }
    }

    /// Pending jobs ordered by fire time.
    pub fn pending(&self) -> Vec<ScheduledJob> {
        let table = self.shared.lock();
        let mut jobs: Vec<ScheduledJob> = table
            .jobs
            .iter()
            .map(|(id, job)| ScheduledJob {
                id: *id,
                label: job.label.clone(),
                fire_time: job.fire_time,
            })
            .collect();
        jobs.sort_by_key(|j| (j.fire_time, j.id));
        jobs
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Starts the background loop (no-op when already running).
    pub fn start(&self) -> std::io::Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() {
            return Ok(());
        }
        self.shared.lock().running = true;
        let shared = Arc::clone(&self.shared);
        let (done_tx, done_rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("time-scheduler".into())
            .spawn(move || {
                run_loop(&shared);
                let _ = done_tx.send(());
            });
        match spawned {
            Ok(thread) => {
                *handle = Some(LoopHandle {
                    thread,
                    done: done_rx,
                });
                tracing::debug!("time scheduler started");
                Ok(())
            }
            Err(e) => {
                self.shared.lock().running = false;
                Err(e)
            }
        }
    }

    /// Stops the loop, waiting at most five seconds for a running action to
    /// return. Safe to call when never started.
    pub fn stop(&self) {
        self.shared.lock().running = false;
        self.shared.wake.notify_all();
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread.thread().id() == std::thread::current().id() {
            return;
        }
        match handle.done.recv_timeout(STOP_TIMEOUT) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = handle.thread.join();
                tracing::debug!("time scheduler stopped");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!("time scheduler did not stop within {:?}; detaching", STOP_TIMEOUT);
            }
        }
    }
}

impl Drop for TimeScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &Shared) {
    loop {
        let due = {
            let mut table = shared.lock();
            if !table.running {
                return;
            }
            let due = table.take_due(Instant::now(), Local::now());
            if due.is_empty() {
                let (guard, _) = shared
                    .wake
                    .wait_timeout(table, shared.tick)
                    .unwrap_or_else(|e| e.into_inner());
                if !guard.running {
                    return;
                }
                continue;
            }
            due
        };
        for (id, job) in due {
            run_job(id, job);
        }
    }
}

fn run_job(id: JobId, job: Job) {
    tracing::info!(job = %id, label = %job.label, "running scheduled job");
    match panic::catch_unwind(AssertUnwindSafe(job.action)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(job = %id, label = %job.label, "scheduled job failed: {:#}", e),
        Err(payload) => tracing::error!(
            job = %id,
            label = %job.label,
            "scheduled job panicked: {}",
            panic_message(payload.as_ref())
        ),
    }
}
