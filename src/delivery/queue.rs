//! Task queues that run observer callbacks off the notifying thread.

use crate::error::Result;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// A unit of queued work.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Configuration for a [`CallbackQueue`].
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Name used for worker threads and log output.
    /// Default: "callbacks"
    pub name: String,

    /// Number of worker threads.
    /// 0 = drained manually with [`CallbackQueue::drain`],
    /// 1 = serial (FIFO), >1 = concurrent pool.
    /// Default: 1
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "callbacks".to_string(),
            workers: 1,
        }
    }
}

struct QueueInner {
    name: String,
    workers: usize,
    sender: Sender<Task>,
    /// Kept only by manual queues; worker queues hand it to their threads.
    manual: Option<Receiver<Task>>,
}

/// An execution context callbacks can be marshaled onto.
///
/// Enqueueing never blocks the caller. Cloning shares the same queue.
/// Worker threads exit once every handle to the queue is dropped and the
/// remaining tasks have run.
#[derive(Clone)]
pub struct CallbackQueue {
    inner: Arc<QueueInner>,
}

impl CallbackQueue {
    /// Create a queue from configuration, spawning its workers.
    pub fn new(config: QueueConfig) -> Result<Self> {
        let (sender, receiver) = unbounded::<Task>();

        let manual = if config.workers == 0 {
            Some(receiver)
        } else {
            for index in 0..config.workers {
                let receiver = receiver.clone();
                let name = config.name.clone();
                thread::Builder::new()
                    .name(format!("{}-{}", config.name, index))
                    .spawn(move || Self::work(&name, receiver))?;
            }
            None
        };

        debug!(queue = %config.name, workers = config.workers, "callback queue started");

        Ok(Self {
            inner: Arc::new(QueueInner {
                name: config.name,
                workers: config.workers,
                sender,
                manual,
            }),
        })
    }

    /// A serial queue backed by one worker thread.
    pub fn serial(name: &str) -> Result<Self> {
        Self::new(QueueConfig {
            name: name.to_string(),
            workers: 1,
        })
    }

    /// A concurrent queue backed by `workers` threads. Tasks from different
    /// observers may run in any order and at the same time; one observer's
    /// callbacks still run one at a time, in order.
    pub fn concurrent(name: &str, workers: usize) -> Result<Self> {
        Self::new(QueueConfig {
            name: name.to_string(),
            workers: workers.max(1),
        })
    }

    /// A queue whose tasks only run when [`drain`](Self::drain) is called.
    pub fn manual(name: &str) -> Self {
        let (sender, receiver) = unbounded::<Task>();
        Self {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                workers: 0,
                sender,
                manual: Some(receiver),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.sender.len()
    }

    /// Queue a task. Never blocks.
    pub(crate) fn enqueue(&self, task: Task) {
        // Receivers live as long as the inner sender for manual queues, and
        // worker threads only exit after every sender is gone.
        if self.inner.sender.send(task).is_err() {
            warn!(queue = %self.inner.name, "callback queue disconnected, task dropped");
        }
    }

    /// Run every pending task on the calling thread, including tasks queued
    /// while draining. Returns the number of tasks run. A no-op for queues
    /// with worker threads.
    pub fn drain(&self) -> usize {
        let Some(receiver) = &self.inner.manual else {
            return 0;
        };
        let mut ran = 0;
        while let Ok(task) = receiver.try_recv() {
            Self::run(&self.inner.name, task);
            ran += 1;
        }
        ran
    }

    /// Wait until every task queued before this call has run.
    ///
    /// Exact for manual and serial queues. On a concurrent queue it only
    /// waits for one worker to reach the barrier.
    pub fn flush(&self) {
        if self.inner.workers == 0 {
            self.drain();
            return;
        }
        let (done_tx, done_rx) = bounded::<()>(1);
        self.enqueue(Box::new(move || {
            let _ = done_tx.send(());
        }));
        let _ = done_rx.recv();
    }

    fn work(name: &str, receiver: Receiver<Task>) {
        while let Ok(task) = receiver.recv() {
            Self::run(name, task);
        }
        debug!(queue = %name, "callback queue worker exiting");
    }

    /// Run one task; a panicking callback is logged and does not take the
    /// worker down.
    fn run(name: &str, task: Task) {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!(queue = %name, "queued callback panicked");
        }
    }
}

/// One observer's share of a [`CallbackQueue`].
///
/// Tasks submitted to a lane run one at a time in submission order, even on
/// a concurrent queue. At most one lane task sits on the queue at a time; it
/// runs everything pending in the lane before giving the worker back.
pub(crate) struct SerialLane {
    queue: CallbackQueue,
    state: Arc<Mutex<LaneState>>,
}

#[derive(Default)]
struct LaneState {
    pending: VecDeque<Task>,
    /// A drain task is on the queue or running.
    scheduled: bool,
}

impl SerialLane {
    pub(crate) fn new(queue: CallbackQueue) -> Self {
        Self {
            queue,
            state: Arc::new(Mutex::new(LaneState::default())),
        }
    }

    /// Queue a task behind this lane's earlier tasks. Never blocks.
    pub(crate) fn submit(&self, task: Task) {
        {
            let mut state = self.state.lock();
            state.pending.push_back(task);
            if state.scheduled {
                return;
            }
            state.scheduled = true;
        }
        let state = Arc::clone(&self.state);
        let name = self.queue.inner.name.clone();
        self.queue.enqueue(Box::new(move || Self::drain(&name, &state)));
    }

    fn drain(name: &str, state: &Mutex<LaneState>) {
        loop {
            let task = {
                let mut state = state.lock();
                match state.pending.pop_front() {
                    Some(task) => task,
                    None => {
                        state.scheduled = false;
                        return;
                    }
                }
            };
            CallbackQueue::run(name, task);
        }
    }
}

impl std::fmt::Debug for SerialLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLane")
            .field("queue", &self.queue)
            .field("pending", &self.state.lock().pending.len())
            .finish()
    }
}

impl std::fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackQueue")
            .field("name", &self.inner.name)
            .field("workers", &self.inner.workers)
            .field("pending", &self.pending())
            .finish()
    }
}
