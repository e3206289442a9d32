//! # Cooperative Scheduler Capability
//!
//! The core never sleeps, spawns or blocks on its own. Whenever it needs to run
//! something later (the next batch cycle, the next chunk, a reconnection
//! attempt) it asks the injected `Scheduler` and keeps the returned
//! `TaskToken` so the work can be cancelled.
//!
//! Two implementations ship with the crate:
//!
//! - **`TokioScheduler`** spawns each task onto a Tokio runtime. `NextFrame`
//!   runs on the next runtime turn, or on the next frame boundary when a frame
//!   interval is configured.
//! - **`ManualScheduler`** queues tasks against a virtual clock and runs them
//!   only when the host says so. Hosts that own their own loop use it, and so
//!   do the tests.
//!
//! Cancelling a token that already fired, or was already cancelled, is a
//! no-op. Owners still re-check the token under their own lock when the task
//! runs, because a task may already be executing on another worker when
//! `cancel` is called.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::errors::FeedError;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifies one scheduled task so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskToken(u64);

impl TaskToken {
    /// The raw identifier, unique per scheduler instance.
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// When a scheduled task should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// At the next tick boundary the host exposes ("next time it is idle or
    /// ready to paint"). Not a fixed delay.
    NextFrame,
    /// As soon as possible, after other ready work has had a turn.
    Yield,
    /// After a fixed delay.
    After(Duration),
}

/// Host-provided cooperative scheduling.
pub trait Scheduler: Send + Sync {
    /// Queues `task` to run according to `wake`.
    fn schedule(&self, wake: Wake, task: Task) -> TaskToken;

    /// Prevents a queued task from starting.
    fn cancel(&self, token: TaskToken);
}

/// # Tokio Scheduler
///
/// Spawns every task onto a captured runtime handle. Outstanding tasks are
/// tracked by id so that `cancel` can abort them before they start.
pub struct TokioScheduler {
    handle: Handle,
    frame_interval: Option<Duration>,
    origin: Instant,
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    /// Creates a scheduler bound to the runtime of the calling thread.
    ///
    /// # Errors
    /// Returns `FeedError::RuntimeUnavailable` outside a Tokio runtime.
    pub fn new() -> Result<Self, FeedError> {
        Ok(Self::with_handle(Handle::try_current()?))
    }

    /// Creates a scheduler bound to an explicit runtime handle.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            frame_interval: None,
            origin: Instant::now(),
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Aligns `Wake::NextFrame` to a fixed refresh cadence (e.g. 16ms for a
    /// 60Hz consumer) instead of the next runtime turn.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.frame_interval = Some(interval);
        }
        self
    }

    /// Number of tasks that have been scheduled but have not started yet.
    pub fn outstanding(&self) -> usize {
        self.tasks.lock().expect("Scheduler lock poisoned").len()
    }

    fn next_frame_boundary(&self, frame: Duration) -> Instant {
        let elapsed = self.origin.elapsed().as_nanos();
        let frame_nanos = frame.as_nanos().max(1);
        let frames = elapsed / frame_nanos + 1;
        let offset = u64::try_from(frames * frame_nanos).unwrap_or(u64::MAX);
        self.origin + Duration::from_nanos(offset)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, wake: Wake, task: Task) -> TaskToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = match wake {
            Wake::NextFrame => self.frame_interval.map(|f| self.next_frame_boundary(f)),
            Wake::Yield => None,
            Wake::After(delay) => Some(Instant::now() + delay),
        };

        // Holding the registry lock across the spawn keeps the task from
        // deregistering itself before its abort handle is stored.
        let mut tasks = self.tasks.lock().expect("Scheduler lock poisoned");
        let registry = Arc::clone(&self.tasks);
        let join = self.handle.spawn(async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => tokio::task::yield_now().await,
            }
            registry.lock().expect("Scheduler lock poisoned").remove(&id);
            task();
        });
        tasks.insert(id, join.abort_handle());
        TaskToken(id)
    }

    fn cancel(&self, token: TaskToken) {
        let removed = self
            .tasks
            .lock()
            .expect("Scheduler lock poisoned")
            .remove(&token.0);
        if let Some(abort) = removed {
            abort.abort();
            log::trace!("Cancelled {}", token);
        }
    }
}

struct QueuedTask {
    id: u64,
    due: Duration,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    queue: Vec<QueuedTask>,
}

/// # Manual Scheduler
///
/// Runs nothing until the host calls `run_ready` or `advance`. Time is
/// virtual: `Wake::After(d)` becomes due once `advance` has moved the clock
/// by at least `d`. `NextFrame` and `Yield` are due immediately. Ready tasks
/// run in due-time order, FIFO among equals.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    /// Creates an empty scheduler with its clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every task that is due, including tasks that become due while
    /// running. Returns how many ran.
    pub fn run_ready(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.pop_ready() {
            task();
            ran += 1;
        }
        ran
    }

    /// Runs the single earliest due task, if any.
    pub fn run_next(&self) -> bool {
        match self.pop_ready() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Moves the virtual clock forward and runs whatever became due.
    pub fn advance(&self, by: Duration) -> usize {
        {
            let mut state = self.state.lock().expect("Scheduler lock poisoned");
            state.now += by;
        }
        self.run_ready()
    }

    /// Number of queued tasks, due or not.
    pub fn pending(&self) -> usize {
        self.state.lock().expect("Scheduler lock poisoned").queue.len()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.state.lock().expect("Scheduler lock poisoned").now
    }

    fn pop_ready(&self) -> Option<Task> {
        let mut state = self.state.lock().expect("Scheduler lock poisoned");
        let now = state.now;
        let index = state
            .queue
            .iter()
            .enumerate()
            .filter(|(_, queued)| queued.due <= now)
            .min_by_key(|(_, queued)| (queued.due, queued.id))
            .map(|(index, _)| index)?;
        Some(state.queue.remove(index).task)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, wake: Wake, task: Task) -> TaskToken {
        let mut state = self.state.lock().expect("Scheduler lock poisoned");
        state.next_id += 1;
        let id = state.next_id;
        let due = match wake {
            Wake::NextFrame | Wake::Yield => state.now,
            Wake::After(delay) => state.now + delay,
        };
        state.queue.push(QueuedTask { id, due, task });
        TaskToken(id)
    }

    fn cancel(&self, token: TaskToken) {
        let mut state = self.state.lock().expect("Scheduler lock poisoned");
        state.queue.retain(|queued| queued.id != token.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |name: &'static str| -> Task {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().unwrap().push(name))
        };
        (log, make)
    }

    #[test]
    fn manual_runs_due_tasks_in_order() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();

        scheduler.schedule(Wake::After(Duration::from_millis(50)), task("late"));
        scheduler.schedule(Wake::NextFrame, task("frame"));
        scheduler.schedule(Wake::Yield, task("yield"));

        assert_eq!(scheduler.run_ready(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["frame", "yield"]);
        assert_eq!(scheduler.pending(), 1);

        assert_eq!(scheduler.advance(Duration::from_millis(49)), 0);
        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(*log.lock().unwrap(), vec!["frame", "yield", "late"]);
    }

    #[test]
    fn manual_cancel_prevents_run() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();

        let token = scheduler.schedule(Wake::NextFrame, task("cancelled"));
        scheduler.schedule(Wake::NextFrame, task("kept"));
        scheduler.cancel(token);
        scheduler.cancel(token);

        scheduler.run_ready();
        assert_eq!(*log.lock().unwrap(), vec!["kept"]);
    }

    #[tokio::test]
    async fn tokio_runs_and_cancels() {
        let scheduler = TokioScheduler::new().unwrap();
        let (log, task) = recorder();

        scheduler.schedule(Wake::After(Duration::from_millis(10)), task("ran"));
        let token = scheduler.schedule(Wake::After(Duration::from_millis(10)), task("aborted"));
        scheduler.cancel(token);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*log.lock().unwrap(), vec!["ran"]);
        assert_eq!(scheduler.outstanding(), 0);
    }

    #[tokio::test]
    async fn tokio_frame_interval_defers_next_frame() {
        let scheduler = TokioScheduler::new()
            .unwrap()
            .with_frame_interval(Duration::from_millis(20));
        let (log, task) = recorder();

        scheduler.schedule(Wake::NextFrame, task("frame"));
        tokio::task::yield_now().await;
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*log.lock().unwrap(), vec!["frame"]);
    }

    #[test]
    fn tokio_scheduler_requires_runtime() {
        assert!(matches!(
            TokioScheduler::new(),
            Err(FeedError::RuntimeUnavailable(_))
        ));
    }
}
