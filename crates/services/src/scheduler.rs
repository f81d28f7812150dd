//! Cancellable periodic tasks.
//!
//! Tasks run on one cooperative timeline: a task is never re-entered while
//! it is running, and it stops either when it returns `TaskControl::Stop` or
//! when its handle is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    Stop,
}

pub type Task = Box<dyn FnMut() -> TaskControl + Send + 'static>;

/// Handle returned by `Scheduler::schedule`.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the task before its next run. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `task` every `every` until it stops itself or the handle is cancelled.
    fn schedule(&self, every: Duration, task: Task) -> TaskHandle;
}

/// Runs tasks on a tokio runtime using `tokio::time::interval`.
#[derive(Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, every: Duration, mut task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let watch = handle.clone();
        self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(every);
            // Suspended processes should not replay missed ticks in a burst.
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                if watch.is_cancelled() {
                    break;
                }
                if task() == TaskControl::Stop {
                    break;
                }
            }
        });
        handle
    }
}

/// Runs tasks only when asked to, for deterministic tests.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    tasks: Arc<Mutex<Vec<(TaskHandle, Task)>>>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every live task once. Returns how many tasks ran.
    pub fn run_pending(&self) -> usize {
        let due = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return 0,
        };

        let mut ran = 0;
        let mut survivors = Vec::with_capacity(due.len());
        for (handle, mut task) in due {
            if handle.is_cancelled() {
                continue;
            }
            ran += 1;
            if task() == TaskControl::Continue && !handle.is_cancelled() {
                survivors.push((handle, task));
            }
        }

        if let Ok(mut guard) = self.tasks.lock() {
            // Tasks scheduled while we were running keep their place after survivors.
            survivors.append(&mut guard);
            *guard = survivors;
        }
        ran
    }

    /// Number of tasks that would run on the next `run_pending`.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tasks
            .lock()
            .map(|g| g.iter().filter(|(h, _)| !h.is_cancelled()).count())
            .unwrap_or(0)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, _every: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        if let Ok(mut guard) = self.tasks.lock() {
            guard.push((handle.clone(), task));
        }
        handle
    }
}
