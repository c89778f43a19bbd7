//! The bounded worker pool (§4.1, §5)
//!
//! Mirrors an accept loop handed off to a fixed pool of long-lived workers,
//! but switched from `tokio::spawn` tasks pulling from an async queue to
//! plain OS threads pulling from a `crossbeam::channel`: this worker pool is
//! synchronous, not an async runtime, so `tokio` is dropped in favour of
//! `std::thread` + `crossbeam::channel` (the same crate already depended on
//! elsewhere, repurposed from a `SegQueue` use to its blocking MPMC
//! channel).

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::errors::CoreError;

/// Anything the dispatcher can run. [`crate::server::task::Task`] is the
/// production implementation; tests substitute simpler runnables.
pub trait Runnable: Send {
    fn service(&self) -> Result<(), CoreError>;
    /// Invoked when the task never runs: shutdown drain, or a `defer()`
    /// failure (§3 lifecycle, §4.1 `add_task`).
    fn cancel(&self);
    /// Accounting hook invoked on the producing thread before enqueue; a
    /// failure here cancels the task and re-surfaces to the caller (§4.1).
    fn defer(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

enum QueueItem {
    Task(Box<dyn Runnable>),
    Die,
}

struct Inner {
    live: BTreeSet<usize>,
    stop_count: usize,
}

/// The FIFO worker pool described in §4.1.
pub struct TaskDispatcher {
    sender: Sender<QueueItem>,
    receiver: Receiver<QueueItem>,
    inner: Mutex<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    queue_len_hint: Arc<std::sync::atomic::AtomicUsize>,
}

impl TaskDispatcher {
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = unbounded();
        Arc::new(Self {
            sender,
            receiver,
            inner: Mutex::new(Inner {
                live: BTreeSet::new(),
                stop_count: 0,
            }),
            handles: Mutex::new(Vec::new()),
            queue_len_hint: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        })
    }

    /// Adjusts live minus pending-stops toward `n` (§4.1). Idempotent and
    /// safe under concurrent calls: membership changes happen under
    /// `inner`'s mutex.
    pub fn set_thread_count(self: &Arc<Self>, n: usize) {
        let mut inner = self.inner.lock().unwrap();
        let effective = inner.live.len().saturating_sub(inner.stop_count);

        if effective < n {
            let to_start = n - effective;
            let mut next_id = 0usize;
            for _ in 0..to_start {
                while inner.live.contains(&next_id) {
                    next_id += 1;
                }
                inner.live.insert(next_id);
                let id = next_id;
                let me = Arc::clone(self);
                let handle = thread::Builder::new()
                    .name(format!("waitress-worker-{id}"))
                    .spawn(move || me.worker_loop(id))
                    .expect("failed to spawn worker thread");
                self.handles.lock().unwrap().push(handle);
            }
        } else if effective > n {
            let to_stop = effective - n;
            for _ in 0..to_stop {
                let _ = self.sender.send(QueueItem::Die);
            }
            inner.stop_count += to_stop;
        }
    }

    /// Reads the queue depth *before* enqueuing (§4.1, SPEC_FULL §C);
    /// `defer()` runs on the producing thread first, and a failure there
    /// cancels the task instead of enqueuing it.
    pub fn add_task(&self, task: Box<dyn Runnable>) -> Result<(), CoreError> {
        let queue_depth = self.queue_len_hint.load(std::sync::atomic::Ordering::Relaxed);
        if queue_depth > 0 {
            log::warn!(target: "waitress::dispatcher", "task queue depth is {queue_depth}");
        }

        if let Err(err) = task.defer() {
            task.cancel();
            return Err(err);
        }

        self.queue_len_hint
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.sender
            .send(QueueItem::Task(task))
            .map_err(|_| CoreError::Enqueue("dispatcher queue closed".to_string()))
    }

    /// Sets target to 0, then polls until the live set is empty or
    /// `timeout` expires (§4.1). When `cancel_pending` is true, drains
    /// remaining non-sentinel entries and cancels each.
    pub fn shutdown(self: &Arc<Self>, cancel_pending: bool, timeout: Duration) -> bool {
        self.set_thread_count(0);

        let deadline = Instant::now() + timeout;
        let drained = loop {
            if self.inner.lock().unwrap().live.is_empty() {
                break true;
            }
            if Instant::now() >= deadline {
                break false;
            }
            thread::sleep(Duration::from_millis(100));
        };

        if !drained {
            log::warn!(
                target: "waitress::dispatcher",
                "shutdown timed out with workers still live"
            );
        }

        if cancel_pending {
            while let Ok(item) = self.receiver.try_recv() {
                if let QueueItem::Task(task) = item {
                    task.cancel();
                }
            }
            return true;
        }

        drained
    }

    fn worker_loop(self: Arc<Self>, id: usize) {
        loop {
            if !self.inner.lock().unwrap().live.contains(&id) {
                break;
            }

            let item = match self.receiver.recv() {
                Ok(item) => item,
                Err(_) => break,
            };

            let task = match item {
                QueueItem::Die => break,
                QueueItem::Task(task) => task,
            };
            self.queue_len_hint
                .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

            match task.service() {
                Ok(()) => {}
                Err(CoreError::TestSentinel) => {
                    log::debug!(target: "waitress::dispatcher", "worker {id} exiting on test sentinel");
                    self.retire(id);
                    break;
                }
                Err(err) => {
                    log::error!(target: "waitress::dispatcher", "task failed: {err}");
                }
            }
        }

        self.retire(id);
    }

    fn retire(&self, id: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.live.remove(&id);
        inner.stop_count = inner.stop_count.saturating_sub(1);
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTask {
        counter: Arc<AtomicUsize>,
        fail_with: Option<CoreErrorKind>,
    }

    #[derive(Clone, Copy)]
    enum CoreErrorKind {
        TestSentinel,
    }

    impl Runnable for CountingTask {
        fn service(&self) -> Result<(), CoreError> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(CoreErrorKind::TestSentinel) => Err(CoreError::TestSentinel),
                None => Ok(()),
            }
        }

        fn cancel(&self) {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until<F: Fn() -> bool>(f: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        f()
    }

    #[test]
    fn set_thread_count_converges_after_quiescence() {
        let dispatcher = TaskDispatcher::new();
        dispatcher.set_thread_count(3);
        assert!(wait_until(|| dispatcher.live_count() == 3, Duration::from_secs(1)));

        dispatcher.set_thread_count(1);
        assert!(wait_until(|| dispatcher.live_count() == 1, Duration::from_secs(1)));
    }

    #[test]
    fn shutdown_drains_completed_tasks() {
        let dispatcher = TaskDispatcher::new();
        dispatcher.set_thread_count(2);
        assert!(wait_until(|| dispatcher.live_count() == 2, Duration::from_secs(1)));

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            dispatcher
                .add_task(Box::new(CountingTask {
                    counter: counter.clone(),
                    fail_with: None,
                }))
                .unwrap();
        }

        let ok = dispatcher.shutdown(true, Duration::from_secs(2));
        assert!(ok);
        assert_eq!(dispatcher.live_count(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_sentinel_exits_worker_without_killing_others() {
        let dispatcher = TaskDispatcher::new();
        dispatcher.set_thread_count(1);
        assert!(wait_until(|| dispatcher.live_count() == 1, Duration::from_secs(1)));

        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher
            .add_task(Box::new(CountingTask {
                counter: counter.clone(),
                fail_with: Some(CoreErrorKind::TestSentinel),
            }))
            .unwrap();

        assert!(wait_until(|| dispatcher.live_count() == 0, Duration::from_secs(1)));
    }
}
