//! Fixed pool of worker threads running cancellable background jobs, at most
//! one per `(owner, kind)`.

use crossbeam_channel::{unbounded, Receiver, Sender};
use cutline_core::types::ItemId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobKind {
    Cache,
    Thumbnails,
    Proxy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub owner: ItemId,
    pub kind: JobKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Progress(u8),
    Done,
    /// Stopped on request; carries the progress reached.
    Cancelled(u8),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub key: TaskKey,
    pub status: TaskStatus,
}

/// Work run on a pool thread. Implementations poll
/// [`TaskContext::should_stop`] between units of work.
pub trait Task: Send {
    fn kind(&self) -> JobKind;
    fn run(&mut self, ctx: &TaskContext) -> Result<(), String>;
}

/// Handle given to a running task.
pub struct TaskContext {
    key: TaskKey,
    cancelled: Arc<AtomicBool>,
    shared: Arc<Shared>,
    progress: AtomicU8,
    stop_seen: AtomicBool,
}

impl TaskContext {
    pub fn key(&self) -> TaskKey {
        self.key
    }

    /// True once the task was cancelled or the manager blocked. A task that
    /// saw `true` here ends as `Cancelled`, one that never looked again after
    /// the request ends as `Done`.
    pub fn should_stop(&self) -> bool {
        let stop = self.cancelled.load(Ordering::SeqCst) || self.shared.blocked.load(Ordering::SeqCst);
        if stop {
            self.stop_seen.store(true, Ordering::SeqCst);
        }
        stop
    }

    pub fn report_progress(&self, percent: u8) {
        let percent = percent.min(100);
        self.progress.store(percent, Ordering::SeqCst);
        self.shared.emit(self.key, TaskStatus::Progress(percent));
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }
}

struct Job {
    key: TaskKey,
    task: Box<dyn Task>,
    cancelled: Arc<AtomicBool>,
}

struct Shared {
    active: Mutex<HashMap<TaskKey, Arc<AtomicBool>>>,
    idle: Condvar,
    blocked: AtomicBool,
    events: Sender<TaskEvent>,
}

impl Shared {
    fn emit(&self, key: TaskKey, status: TaskStatus) {
        let _ = self.events.send(TaskEvent { key, status });
    }

    fn finish(&self, key: TaskKey, status: TaskStatus) {
        {
            let mut active = self.active.lock();
            active.remove(&key);
            if active.is_empty() {
                self.idle.notify_all();
            }
        }
        self.emit(key, status);
    }
}

pub struct TaskManager {
    shared: Arc<Shared>,
    submit: Option<Sender<Job>>,
    events: Receiver<TaskEvent>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl TaskManager {
    pub fn new(workers: usize) -> Self {
        let (submit_tx, submit_rx) = unbounded::<Job>();
        let (events_tx, events_rx) = unbounded::<TaskEvent>();
        let shared = Arc::new(Shared {
            active: Mutex::new(HashMap::new()),
            idle: Condvar::new(),
            blocked: AtomicBool::new(false),
            events: events_tx,
        });
        let workers = (0..workers.max(1))
            .map(|index| {
                let rx = submit_rx.clone();
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("cutline-task-{index}"))
                    .spawn(move || worker_loop(rx, shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "could not spawn task worker");
                    None
                }
            })
            .collect::<Vec<_>>();
        info!(workers = workers.len(), "task manager started");
        Self {
            shared,
            submit: Some(submit_tx),
            events: events_rx,
            workers,
        }
    }

    /// Queue `task` for `owner`. Returns false when the manager is blocked or
    /// the same kind of job is already pending for that owner.
    pub fn start_task(&self, owner: ItemId, task: Box<dyn Task>) -> bool {
        if self.is_blocked() {
            return false;
        }
        let Some(submit) = &self.submit else {
            return false;
        };
        let key = TaskKey {
            owner,
            kind: task.kind(),
        };
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut active = self.shared.active.lock();
            if active.contains_key(&key) {
                debug!(%owner, kind = ?key.kind, "job already pending");
                return false;
            }
            active.insert(key, cancelled.clone());
        }
        self.shared.emit(key, TaskStatus::Queued);
        if submit.send(Job { key, task, cancelled }).is_err() {
            self.shared.finish(key, TaskStatus::Failed("task pool is gone".into()));
            return false;
        }
        true
    }

    pub fn has_pending_job(&self, owner: ItemId, kind: JobKind) -> bool {
        self.shared.active.lock().contains_key(&TaskKey { owner, kind })
    }

    pub fn pending_count(&self) -> usize {
        self.shared.active.lock().len()
    }

    pub fn cancel_task(&self, owner: ItemId, kind: JobKind) {
        if let Some(flag) = self.shared.active.lock().get(&TaskKey { owner, kind }) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Cancel everything and refuse new work until [`unblock`](Self::unblock).
    pub fn cancel_jobs(&self) {
        self.block();
        for flag in self.shared.active.lock().values() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn block(&self) {
        self.shared.blocked.store(true, Ordering::SeqCst);
    }

    pub fn unblock(&self) {
        self.shared.blocked.store(false, Ordering::SeqCst);
    }

    pub fn is_blocked(&self) -> bool {
        self.shared.blocked.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Receiver<TaskEvent> {
        self.events.clone()
    }

    /// Wait until no job is queued or running. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut active = self.shared.active.lock();
        while !active.is_empty() {
            if self.shared.idle.wait_until(&mut active, deadline).timed_out() {
                return active.is_empty();
            }
        }
        true
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.cancel_jobs();
        self.submit.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("task worker panicked");
            }
        }
    }
}

fn worker_loop(rx: Receiver<Job>, shared: Arc<Shared>) {
    while let Ok(Job {
        key,
        mut task,
        cancelled,
    }) = rx.recv()
    {
        let ctx = TaskContext {
            key,
            cancelled,
            shared: shared.clone(),
            progress: AtomicU8::new(0),
            stop_seen: AtomicBool::new(false),
        };
        if ctx.should_stop() {
            shared.finish(key, TaskStatus::Cancelled(0));
            continue;
        }
        shared.emit(key, TaskStatus::Running);
        let result = task.run(&ctx);
        let status = match result {
            _ if ctx.stop_seen.load(Ordering::SeqCst) => TaskStatus::Cancelled(ctx.progress()),
            Ok(()) => TaskStatus::Done,
            Err(message) => {
                warn!(owner = %key.owner, kind = ?key.kind, %message, "task failed");
                TaskStatus::Failed(message)
            }
        };
        shared.finish(key, status);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
