// ── UI thread runner ──────────────────────────────────────────────────────────
//
// The body of the dedicated UI thread.  It owns every native window the
// manager creates and interleaves two kinds of work:
//   • draining the dispatch queue, and
//   • retrieving and dispatching native messages.
//
// Nothing that happens inside the loop may unwind out of the thread: queued
// computations catch their own panics (see `dispatch`), window procedures
// catch theirs (see `platform::route_message`), and anything else is turned
// into `WmError::PumpPanicked` and reported through the exit signal.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, OnceLock, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::{
    error::{panic_message, Result, WmError},
    manager::Context,
    platform::{Pumped, Wake},
};

// ── Exit signal ───────────────────────────────────────────────────────────────

/// Set exactly once, when the runner has reached `Stopped`.
///
/// Waiters block on a channel that never carries a message: publishing
/// stores the result and drops the only sender, which wakes every receiver
/// at once and keeps waking them on later calls.
#[derive(Debug)]
pub(crate) struct ExitSignal {
    result: OnceLock<Result<()>>,
    closer: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

impl Default for ExitSignal {
    fn default() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            result: OnceLock::new(),
            closer: Mutex::new(Some(tx)),
            closed: rx,
        }
    }
}

impl ExitSignal {
    /// Record the outcome.  Only the first result is kept.
    pub(crate) fn publish(&self, result: Result<()>) {
        let _ = self.result.set(result);
        self.closer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.result.get().is_some()
    }

    pub(crate) fn wait(&self) -> Result<()> {
        // Only disconnection ends the receive; nothing is ever sent.
        let _ = self.closed.recv();
        self.result.get().cloned().unwrap_or(Ok(()))
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        match self.closed.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => None,
            _ => self.result.get().cloned(),
        }
    }
}

// ── Runner ────────────────────────────────────────────────────────────────────

pub(crate) struct UiThreadRunner {
    ctx: Arc<Context>,
    exit: Arc<ExitSignal>,
}

impl UiThreadRunner {
    pub(crate) fn new(ctx: Arc<Context>, exit: Arc<ExitSignal>) -> Self {
        Self { ctx, exit }
    }

    /// Start the dedicated UI thread.
    pub(crate) fn spawn(self, name: String) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    fn run(self) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.pump()))
            .unwrap_or_else(|payload| Err(WmError::PumpPanicked(panic_message(payload.as_ref()))));
        if let Err(e) = &result {
            log::error!("UI thread pump failed: {e}");
        }

        // Whatever ended the loop, callers already queued still get an answer
        // and later callers get `Stopped`.
        let dispatcher = &self.ctx.dispatcher;
        dispatcher.request_stop();
        let drained = panic::catch_unwind(AssertUnwindSafe(|| {
            dispatcher.finish();
            self.ctx.destroy_all();
        }));
        let result = match drained {
            Ok(()) => result,
            Err(payload) => result.and(Err(WmError::PumpPanicked(panic_message(payload.as_ref())))),
        };

        log::info!("UI thread stopped");
        self.exit.publish(result);
    }

    fn pump(&self) -> Result<()> {
        let ctx = &self.ctx;
        ctx.platform.init_thread()?;
        ctx.dispatcher.begin();
        log::info!("UI thread running");

        loop {
            // Queued work first, in arrival order.
            let ran = ctx.dispatcher.drain();
            if ran > 0 {
                log::trace!("ran {ran} dispatched item(s)");
            }

            // A stop request ends the loop; `run` drains what is left.
            if ctx.dispatcher.stop_requested() {
                return Ok(());
            }

            // Sleep until there is input or new work.
            match ctx.platform.wait(None)? {
                // One native message per turn, so queued work never waits
                // behind a burst of input.
                Wake::Message => {
                    if ctx.platform.pump_message()? == Pumped::Quit {
                        log::debug!("quit message received");
                        ctx.dispatcher.request_stop();
                    }
                }
                Wake::Signaled | Wake::TimedOut => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_signal_keeps_first_result() {
        let exit = ExitSignal::default();
        assert!(!exit.is_set());
        exit.publish(Err(WmError::PumpPanicked("first".to_owned())));
        exit.publish(Ok(()));
        assert!(exit.is_set());
        assert_eq!(exit.wait(), Err(WmError::PumpPanicked("first".to_owned())));
        // Waiting again after the signal fired returns at once.
        assert_eq!(
            exit.wait_timeout(Duration::from_millis(1)),
            Some(Err(WmError::PumpPanicked("first".to_owned())))
        );
    }

    #[test]
    fn exit_signal_wait_timeout_expires_when_unset() {
        let exit = ExitSignal::default();
        assert_eq!(exit.wait_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn exit_signal_wakes_waiters_across_threads() {
        let exit = Arc::new(ExitSignal::default());
        let publisher = Arc::clone(&exit);
        let t = thread::spawn(move || publisher.publish(Ok(())));
        assert_eq!(exit.wait(), Ok(()));
        t.join().expect("join");
    }
}
