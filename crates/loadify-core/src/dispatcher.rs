//! Admission control: a FIFO of waiting items and a cap on live workers.
//!
//! A background thread admits queued ids while `live < cap`. The slot is reserved
//! under the dispatcher lock; the launcher then runs outside the lock, and a
//! launcher that declines the item gives the slot back.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;

use crate::id::ItemId;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// What the launcher did with an admitted id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A worker is running; it will call `on_worker_finished` when done.
    Started,
    /// Nothing started (cancelled, paused, evicted or no longer queued).
    Skipped,
}

/// Starts a worker for an admitted id.
pub trait Launcher: Send + Sync {
    fn launch(&self, id: ItemId) -> Admission;
}

#[derive(Debug)]
struct State {
    queue: VecDeque<ItemId>,
    live: HashSet<ItemId>,
    cap: usize,
    shutdown: bool,
}

impl State {
    /// Removes and returns the first waiting id whose previous worker is gone.
    fn next_admissible(&mut self) -> Option<ItemId> {
        if self.live.len() >= self.cap {
            return None;
        }
        let pos = self.queue.iter().position(|id| !self.live.contains(id))?;
        self.queue.remove(pos)
    }
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl Dispatcher {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    live: HashSet::new(),
                    cap: max_concurrent.max(1),
                    shutdown: false,
                }),
                wake: Condvar::new(),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Starts the admission loop. The launcher is held weakly so the owner can
    /// implement `Launcher` itself; the loop ends once it is gone.
    pub fn start(&self, launcher: Weak<dyn Launcher>) -> std::io::Result<()> {
        let mut slot = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(());
        }
        self.shared.lock().shutdown = false;
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("admission".into())
            .spawn(move || admission_loop(&shared, &launcher))?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stops the admission loop and waits for it. Queue contents are kept.
    pub fn stop(&self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Appends `id` to the queue unless it is already waiting. Never blocks on
    /// admission.
    pub fn enqueue(&self, id: ItemId) {
        let mut st = self.shared.lock();
        if st.queue.contains(&id) {
            tracing::debug!(item = %id, "already queued");
            return;
        }
        st.queue.push_back(id);
        tracing::debug!(item = %id, position = st.queue.len(), "queued");
        drop(st);
        self.shared.wake.notify_all();
    }

    /// Drops a waiting id from the queue; returns whether it was there.
    pub fn dequeue(&self, id: ItemId) -> bool {
        let mut st = self.shared.lock();
        let before = st.queue.len();
        st.queue.retain(|q| *q != id);
        before != st.queue.len()
    }

    /// Frees the worker slot of `id`; with `requeue` the id goes to the back of
    /// the queue.
    pub fn on_worker_finished(&self, id: ItemId, requeue: bool) {
        let mut st = self.shared.lock();
        st.live.remove(&id);
        if requeue && !st.queue.contains(&id) {
            st.queue.push_back(id);
        }
        tracing::debug!(item = %id, requeue, live = st.live.len(), "slot freed");
        drop(st);
        self.shared.wake.notify_all();
    }

    pub fn set_max_concurrent(&self, cap: usize) {
        let cap = cap.max(1);
        self.shared.lock().cap = cap;
        tracing::info!("max concurrent transfers set to {}", cap);
        self.shared.wake.notify_all();
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.lock().cap
    }

    pub fn is_live(&self, id: ItemId) -> bool {
        self.shared.lock().live.contains(&id)
    }

    pub fn is_queued(&self, id: ItemId) -> bool {
        self.shared.lock().queue.contains(&id)
    }

    pub fn live_count(&self) -> usize {
        self.shared.lock().live.len()
    }

    pub fn queued_len(&self) -> usize {
        self.shared.lock().queue.len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn admission_loop(shared: &Shared, launcher: &Weak<dyn Launcher>) {
    tracing::debug!("admission loop started");
    loop {
        let id = {
            let mut st = shared.lock();
            loop {
                if st.shutdown {
                    tracing::debug!("admission loop stopped");
                    return;
                }
                if let Some(id) = st.next_admissible() {
                    st.live.insert(id);
                    break id;
                }
                st = shared.wake.wait(st).unwrap_or_else(|e| e.into_inner());
            }
        };

        let Some(launcher) = launcher.upgrade() else {
            shared.lock().live.remove(&id);
            return;
        };
        match launcher.launch(id) {
            Admission::Started => tracing::debug!(item = %id, "admitted"),
            Admission::Skipped => {
                tracing::debug!(item = %id, "admission skipped");
                shared.lock().live.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Records starts; workers finish when the test says so, or by themselves
    /// after `auto_finish_after`.
    struct Recorder {
        dispatcher: Weak<Dispatcher>,
        started: Mutex<Vec<ItemId>>,
        skip: Mutex<HashSet<ItemId>>,
        auto_finish_after: Option<Duration>,
        peak: AtomicUsize,
    }

    impl Recorder {
        fn new(dispatcher: &Arc<Dispatcher>, auto_finish_after: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                dispatcher: Arc::downgrade(dispatcher),
                started: Mutex::new(Vec::new()),
                skip: Mutex::new(HashSet::new()),
                auto_finish_after,
                peak: AtomicUsize::new(0),
            })
        }

        fn started(&self) -> Vec<ItemId> {
            self.started.lock().unwrap().clone()
        }
    }

    impl Launcher for Recorder {
        fn launch(&self, id: ItemId) -> Admission {
            if self.skip.lock().unwrap().contains(&id) {
                return Admission::Skipped;
            }
            self.started.lock().unwrap().push(id);
            if let Some(d) = self.dispatcher.upgrade() {
                self.peak.fetch_max(d.live_count(), Ordering::SeqCst);
            }
            if let Some(after) = self.auto_finish_after {
                let d = self.dispatcher.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(after);
                    if let Some(d) = d.upgrade() {
                        d.on_worker_finished(id, false);
                    }
                });
            }
            Admission::Started
        }
    }

    fn wait_until(what: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if what() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn ids(n: u64) -> Vec<ItemId> {
        (1..=n).map(ItemId::from).collect()
    }

    #[test]
    fn cap_is_never_exceeded() {
        let d = Arc::new(Dispatcher::new(2));
        let rec = Recorder::new(&d, None);
        d.start(Arc::downgrade(&rec) as Weak<dyn Launcher>).unwrap();
        for id in ids(10) {
            d.enqueue(id);
        }
        assert!(wait_until(|| rec.started().len() == 2));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(rec.started().len(), 2);
        assert_eq!(d.live_count(), 2);
        assert_eq!(d.queued_len(), 8);
        d.stop();
    }

    #[test]
    fn fifo_with_single_slot() {
        let d = Arc::new(Dispatcher::new(1));
        let rec = Recorder::new(&d, None);
        d.start(Arc::downgrade(&rec) as Weak<dyn Launcher>).unwrap();
        let [a, b, c] = [ItemId::from(1), ItemId::from(2), ItemId::from(3)];
        d.enqueue(a);
        d.enqueue(b);
        d.enqueue(c);
        assert!(wait_until(|| rec.started() == vec![a]));
        d.on_worker_finished(a, false);
        assert!(wait_until(|| rec.started() == vec![a, b]));
        d.on_worker_finished(b, false);
        assert!(wait_until(|| rec.started() == vec![a, b, c]));
        d.stop();
    }

    #[test]
    fn duplicate_enqueue_is_ignored() {
        let d = Dispatcher::new(1);
        d.enqueue(ItemId::from(1));
        d.enqueue(ItemId::from(1));
        assert_eq!(d.queued_len(), 1);
        assert!(d.dequeue(ItemId::from(1)));
        assert!(!d.dequeue(ItemId::from(1)));
    }

    #[test]
    fn skipped_admission_returns_the_slot() {
        let d = Arc::new(Dispatcher::new(1));
        let rec = Recorder::new(&d, None);
        rec.skip.lock().unwrap().insert(ItemId::from(1));
        d.start(Arc::downgrade(&rec) as Weak<dyn Launcher>).unwrap();
        d.enqueue(ItemId::from(1));
        d.enqueue(ItemId::from(2));
        assert!(wait_until(|| rec.started() == vec![ItemId::from(2)]));
        assert_eq!(d.live_count(), 1);
        d.stop();
    }

    #[test]
    fn requeue_goes_to_the_back_and_live_id_is_deferred() {
        let d = Arc::new(Dispatcher::new(2));
        let rec = Recorder::new(&d, None);
        d.start(Arc::downgrade(&rec) as Weak<dyn Launcher>).unwrap();
        let [a, b, c] = [ItemId::from(1), ItemId::from(2), ItemId::from(3)];
        d.enqueue(a);
        assert!(wait_until(|| rec.started() == vec![a]));
        // `a` is still live: a second enqueue must wait for its worker.
        d.enqueue(a);
        d.enqueue(b);
        assert!(wait_until(|| rec.started() == vec![a, b]));
        d.enqueue(c);
        d.on_worker_finished(b, false);
        // `a` is first in the queue but live; `c` goes ahead of it.
        assert!(wait_until(|| rec.started() == vec![a, b, c]));
        d.on_worker_finished(a, false);
        d.on_worker_finished(c, true);
        assert!(wait_until(|| rec.started() == vec![a, b, c, a, c]));
        d.stop();
    }

    #[test]
    fn raising_the_cap_admits_more() {
        let d = Arc::new(Dispatcher::new(1));
        let rec = Recorder::new(&d, None);
        d.start(Arc::downgrade(&rec) as Weak<dyn Launcher>).unwrap();
        for id in ids(3) {
            d.enqueue(id);
        }
        assert!(wait_until(|| rec.started().len() == 1));
        d.set_max_concurrent(3);
        assert!(wait_until(|| rec.started().len() == 3));
        assert_eq!(d.max_concurrent(), 3);
        d.stop();
    }

    #[test]
    fn short_workers_all_run_within_cap() {
        let d = Arc::new(Dispatcher::new(2));
        let rec = Recorder::new(&d, Some(Duration::from_millis(20)));
        d.start(Arc::downgrade(&rec) as Weak<dyn Launcher>).unwrap();
        for id in ids(8) {
            d.enqueue(id);
        }
        assert!(wait_until(|| rec.started().len() == 8));
        assert!(wait_until(|| d.live_count() == 0));
        assert_eq!(rec.started(), ids(8));
        assert!(rec.peak.load(Ordering::SeqCst) <= 2);
        d.stop();
    }

    #[test]
    fn stop_without_start_is_fine() {
        let d = Dispatcher::new(3);
        d.stop();
        d.stop();
    }
}
