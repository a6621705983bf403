// ── Dispatch queue ────────────────────────────────────────────────────────────
//
// Many producer threads, one consumer (the UI thread).  A producer wraps its
// computation in a `WorkItem`, pushes it, wakes the pump, and blocks on a
// one-shot channel until the UI thread publishes the outcome.
//
// Invariants:
//   • The queue and the runner state share one mutex, so a submission either
//     lands while the runner is `Running` or is rejected; nothing can be
//     stranded behind the final drain.
//   • A call made on the UI thread itself never touches the queue.
//   • A panic inside a queued computation is caught on the UI thread and
//     resumed, payload intact, on the submitting thread.

use std::{
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError},
    thread::{self, ThreadId},
};

use crossbeam_channel::bounded;

use crate::{
    error::{Result, WmError},
    platform::Platform,
};

// ── Runner state ──────────────────────────────────────────────────────────────

/// Lifecycle of the UI thread.  Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunnerState {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
}

// ── WorkItem ──────────────────────────────────────────────────────────────────

/// A type-erased computation plus the sending half of its completion channel.
///
/// Dropping an item without running it drops the sender, which the waiting
/// producer observes as `WmError::Stopped`.
pub(crate) struct WorkItem(Box<dyn FnOnce() + Send>);

impl WorkItem {
    fn new<T, F>(f: F) -> (Self, crossbeam_channel::Receiver<thread::Result<T>>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let item = Self(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            // Send only fails once the receiver is gone.
            let _ = tx.send(outcome);
        }));
        (item, rx)
    }

    fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WorkItem")
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

struct Inner {
    state: RunnerState,
    queue: VecDeque<WorkItem>,
}

/// The dispatch entry point shared by the manager, its window handles and
/// the UI thread runner.
pub(crate) struct Dispatcher {
    inner: Mutex<Inner>,
    state_changed: Condvar,
    ui_thread: OnceLock<ThreadId>,
    platform: Arc<dyn Platform>,
}

impl Dispatcher {
    pub(crate) fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RunnerState::NotStarted,
                queue: VecDeque::new(),
            }),
            state_changed: Condvar::new(),
            ui_thread: OnceLock::new(),
            platform,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> RunnerState {
        self.lock().state
    }

    /// Whether the calling thread is this dispatcher's UI thread.
    pub(crate) fn is_ui_thread(&self) -> bool {
        self.ui_thread
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    /// Fail unless the runner is accepting work.
    pub(crate) fn ensure_running(&self) -> Result<()> {
        match self.state() {
            RunnerState::Running => Ok(()),
            RunnerState::NotStarted => Err(WmError::NotRunning),
            RunnerState::StopRequested | RunnerState::Stopped => Err(WmError::Stopped),
        }
    }

    // ── Producer side ─────────────────────────────────────────────────────────

    /// Run `f` on the UI thread and return its value.
    ///
    /// Off the UI thread this blocks until the runner has executed `f`; on
    /// the UI thread `f` runs inline, immediately, at any nesting depth.
    /// A panic in `f` is resumed on this thread with the original payload.
    pub(crate) fn dispatch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_ui_thread() {
            return Ok(f());
        }

        let (item, outcome) = WorkItem::new(f);
        self.enqueue(item)?;

        match outcome.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            // The item was dropped unrun: the runner died under it.
            Err(_) => Err(WmError::Stopped),
        }
    }

    fn enqueue(&self, item: WorkItem) -> Result<()> {
        {
            let mut inner = self.lock();
            match inner.state {
                RunnerState::Running => inner.queue.push_back(item),
                RunnerState::NotStarted => return Err(WmError::NotRunning),
                RunnerState::StopRequested | RunnerState::Stopped => {
                    log::warn!("rejecting dispatch: window manager is stopping");
                    return Err(WmError::Stopped);
                }
            }
        }
        self.platform.wake();
        Ok(())
    }

    // ── Consumer side (UI thread only) ────────────────────────────────────────

    /// Record the calling thread as the UI thread and enter `Running`,
    /// unless a stop was requested before the thread got this far.
    pub(crate) fn begin(&self) {
        let _ = self.ui_thread.set(thread::current().id());
        let mut inner = self.lock();
        if inner.state == RunnerState::NotStarted {
            inner.state = RunnerState::Running;
            log::debug!("UI thread runner: NotStarted -> Running");
        }
        self.state_changed.notify_all();
    }

    /// Execute every queued item in FIFO order.  Returns how many ran.
    ///
    /// Items are popped one at a time and run with the lock released, so a
    /// running item may itself submit (re-entrantly, inline) or other
    /// threads may keep enqueueing.
    pub(crate) fn drain(&self) -> usize {
        let mut ran = 0;
        while let Some(item) = self.pop() {
            item.run();
            ran += 1;
        }
        ran
    }

    /// Number of items waiting to run.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    fn pop(&self) -> Option<WorkItem> {
        self.lock().queue.pop_front()
    }

    /// Drain whatever is still queued, then enter `Stopped` atomically with
    /// observing an empty queue.
    pub(crate) fn finish(&self) {
        loop {
            let item = {
                let mut inner = self.lock();
                match inner.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        inner.state = RunnerState::Stopped;
                        log::debug!("UI thread runner: -> Stopped");
                        self.state_changed.notify_all();
                        return;
                    }
                }
            };
            item.run();
        }
    }

    /// Request a cooperative stop.  Returns `true` if this call made the
    /// transition.  Wakes the pump so it notices promptly.
    pub(crate) fn request_stop(&self) -> bool {
        let changed = {
            let mut inner = self.lock();
            match inner.state {
                RunnerState::NotStarted | RunnerState::Running => {
                    log::debug!("UI thread runner: {:?} -> StopRequested", inner.state);
                    inner.state = RunnerState::StopRequested;
                    self.state_changed.notify_all();
                    true
                }
                RunnerState::StopRequested | RunnerState::Stopped => false,
            }
        };
        if changed {
            self.platform.wake();
        }
        changed
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.state() >= RunnerState::StopRequested
    }

    /// Block until the runner has left `NotStarted`.
    pub(crate) fn wait_started(&self) -> RunnerState {
        let inner = self
            .state_changed
            .wait_while(self.lock(), |inner| {
                inner.state == RunnerState::NotStarted
            })
            .unwrap_or_else(PoisonError::into_inner);
        inner.state
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
