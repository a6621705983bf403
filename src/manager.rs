// ── Window manager ────────────────────────────────────────────────────────────
//
// Owns the UI thread's lifecycle and the set of live windows.  Every native
// call is made on the UI thread; this type only decides *when* to start and
// stop it and routes window creation through dispatch.
//
// Drop order: dropping the manager requests a stop and joins the UI thread,
// which destroys any window still open before exiting.  No native window
// outlives the thread that created it.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

use crate::{
    config::ManagerConfig,
    dispatch::{Dispatcher, RunnerState},
    error::{Result, WmError},
    platform::{self, NativeWindow, Platform, Rect, WindowOptions, USE_DEFAULT},
    runner::{ExitSignal, UiThreadRunner},
    window::{WindowHandle, WindowState},
};

// ── Shared context ────────────────────────────────────────────────────────────

/// State shared by the manager, its window handles, its shutdown tokens and
/// the UI thread.
pub(crate) struct Context {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) config: ManagerConfig,
    windows: Mutex<HashMap<NativeWindow, Arc<WindowState>>>,
    class_registered: AtomicBool,
}

impl Context {
    fn windows(&self) -> MutexGuard<'_, HashMap<NativeWindow, Arc<WindowState>>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the class (first time only) and create one native window.
    /// UI thread only.
    fn create_native(&self, mut options: WindowOptions) -> Result<Arc<WindowState>> {
        if !self.class_registered.load(Ordering::Acquire) {
            self.platform.register_class(&self.config.class_name)?;
            self.class_registered.store(true, Ordering::Release);
            log::debug!("registered window class {:?}", self.config.class_name);
        }

        if options.title.is_empty() {
            options.title.clone_from(&self.config.default_title);
        }
        let rect = options.rect.unwrap_or(Rect::new(
            USE_DEFAULT,
            USE_DEFAULT,
            self.config.default_width,
            self.config.default_height,
        ));

        let native = self
            .platform
            .create_window(&self.config.class_name, &options, rect)?;
        let state = Arc::new(WindowState::new(native));
        self.windows().insert(native, Arc::clone(&state));
        log::debug!("created window {:#x} ({:?})", native.raw(), options.title);
        Ok(state)
    }

    /// Destroy one window and invalidate its handle.  UI thread only.
    ///
    /// The window stays tracked until the native call succeeds, so a failed
    /// destroy can be retried by `close` or by the shutdown sweep.
    pub(crate) fn destroy_native(&self, state: &WindowState) -> Result<()> {
        if state.is_closed() {
            return Err(WmError::InvalidWindow);
        }
        self.platform.destroy_window(state.native)?;
        // The destroy hook has normally run by now; this covers a platform
        // that reports nothing.
        state.mark_closed();
        let mut windows = self.windows();
        if windows
            .get(&state.native)
            .is_some_and(|tracked| std::ptr::eq(Arc::as_ptr(tracked), state))
        {
            windows.remove(&state.native);
        }
        log::debug!("destroyed window {:#x}", state.native.raw());
        Ok(())
    }

    /// The platform reports `window` gone: stop tracking it and invalidate
    /// every handle to it, whoever destroyed it.
    pub(crate) fn forget_native(&self, window: NativeWindow) {
        let state = self.windows().remove(&window);
        if let Some(state) = state {
            state.mark_closed();
            log::debug!("window {:#x} destroyed natively", window.raw());
        }
    }

    /// Destroy every window still open.  Runs on the UI thread as it exits.
    pub(crate) fn destroy_all(&self) {
        let leftover: Vec<_> = self.windows().drain().collect();
        if !leftover.is_empty() {
            log::warn!("destroying {} window(s) still open at shutdown", leftover.len());
        }
        for (native, state) in leftover {
            state.mark_closed();
            if let Err(e) = self.platform.destroy_window(native) {
                log::warn!("failed to destroy window {:#x}: {e}", native.raw());
            }
        }
    }
}

// ── RunHandle ─────────────────────────────────────────────────────────────────

/// Observes the termination of a manager's UI thread.
///
/// `wait` returns `Ok(())` after a clean stop (cancellation, drop, or a quit
/// message) and the pump's error if it failed.
#[derive(Debug, Clone)]
pub struct RunHandle {
    exit: Arc<ExitSignal>,
}

impl RunHandle {
    /// Block until the UI thread has stopped.
    pub fn wait(&self) -> Result<()> {
        self.exit.wait()
    }

    /// Like `wait`, but gives up after `timeout` and returns `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        self.exit.wait_timeout(timeout)
    }

    pub fn is_finished(&self) -> bool {
        self.exit.is_set()
    }
}

// ── ShutdownToken ─────────────────────────────────────────────────────────────

/// Cooperative cancellation for one manager's UI thread.  Cheap to clone and
/// usable from any thread, including the UI thread.
#[derive(Clone)]
pub struct ShutdownToken {
    ctx: Arc<Context>,
}

impl ShutdownToken {
    /// Ask the UI thread to drain queued work and stop.  Does not block and
    /// never interrupts a computation that is already running.
    pub fn cancel(&self) {
        if self.ctx.dispatcher.request_stop() {
            log::info!("window manager shutdown requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.dispatcher.stop_requested()
    }
}

// ── WindowManager ─────────────────────────────────────────────────────────────

/// Owns one dedicated UI thread and the windows created on it.
pub struct WindowManager {
    ctx: Arc<Context>,
    exit: Arc<ExitSignal>,
    thread: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WindowManager {
    /// A manager driving `platform`.  Each platform instance serves one
    /// manager: its windows belong to that manager's UI thread.
    pub fn new(platform: Arc<dyn Platform>, config: ManagerConfig) -> Self {
        let ctx = Context {
            dispatcher: Dispatcher::new(Arc::clone(&platform)),
            platform,
            config,
            windows: Mutex::new(HashMap::new()),
            class_registered: AtomicBool::new(false),
        };
        let ctx = Arc::new(ctx);

        // Weak, so the platform does not keep the context alive.
        let weak = Arc::downgrade(&ctx);
        ctx.platform.set_destroy_hook(Arc::new(move |window| {
            if let Some(ctx) = weak.upgrade() {
                ctx.forget_native(window);
            }
        }));

        Self {
            ctx,
            exit: Arc::new(ExitSignal::default()),
            thread: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// A manager on the current target's platform (see `platform::native`).
    pub fn with_native_platform(config: ManagerConfig) -> Result<Self> {
        Ok(Self::new(platform::native()?, config))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.ctx.config
    }

    pub fn state(&self) -> RunnerState {
        self.ctx.dispatcher.state()
    }

    /// Whether the calling thread is this manager's UI thread.
    pub fn is_ui_thread(&self) -> bool {
        self.ctx.dispatcher.is_ui_thread()
    }

    /// Number of windows created and not yet closed.
    pub fn window_count(&self) -> usize {
        self.ctx.windows().len()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Spawn the UI thread and wait until it is pumping.
    ///
    /// Fails with `AlreadyStarted` on a second call, or with the thread's own
    /// error if its one-time setup failed.
    pub fn start(&self) -> Result<RunHandle> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WmError::AlreadyStarted);
        }

        let runner = UiThreadRunner::new(Arc::clone(&self.ctx), Arc::clone(&self.exit));
        let thread = runner
            .spawn(self.ctx.config.thread_name.clone())
            .map_err(|e| WmError::Native {
                function: "CreateThread",
                code: e.raw_os_error().unwrap_or_default() as u32,
            })?;
        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread);

        let state = self.ctx.dispatcher.wait_started();
        if state != RunnerState::Running {
            // Setup failed or a stop raced the start; either way the thread
            // is on its way out.
            self.join();
            self.exit.wait()?;
        }
        log::info!("window manager started ({:?})", self.ctx.config.thread_name);

        Ok(RunHandle {
            exit: Arc::clone(&self.exit),
        })
    }

    /// Create a native window on the UI thread.
    pub fn create_window(&self, options: WindowOptions) -> Result<WindowHandle> {
        self.ctx.dispatcher.ensure_running()?;
        let ctx = Arc::clone(&self.ctx);
        let state = self
            .ctx
            .dispatcher
            .dispatch(move || ctx.create_native(options))??;
        Ok(WindowHandle::new(Arc::clone(&self.ctx), state))
    }

    /// Run `f` on the UI thread; see `WindowHandle::dispatch`.
    pub fn dispatch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.ctx.dispatcher.dispatch(f)
    }

    /// Request a stop and wait for the UI thread to exit.
    ///
    /// Called on the UI thread itself this only requests the stop: a thread
    /// cannot join itself.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_token().cancel();
        if !self.started.load(Ordering::SeqCst) {
            // Never started: nothing is queued, settle straight into Stopped.
            self.ctx.dispatcher.finish();
            return Ok(());
        }
        if self.is_ui_thread() {
            return Ok(());
        }
        self.join();
        self.exit.wait()
    }

    fn join(&self) {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                self.exit
                    .publish(Err(WmError::PumpPanicked("UI thread unwound".to_owned())));
            }
        }
    }
}

impl Drop for WindowManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("window manager stopped with error: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, thread, time::Instant};

    use super::*;
    use crate::{
        platform::headless::{replay, HeadlessPlatform, NativeOp, ERROR_WRONG_THREAD},
        window::ShowCommand,
    };

    fn started() -> (WindowManager, Arc<HeadlessPlatform>, RunHandle) {
        let platform = Arc::new(HeadlessPlatform::new());
        let manager = WindowManager::new(platform.clone(), ManagerConfig::default());
        let run = manager.start().expect("start");
        (manager, platform, run)
    }

    fn window(manager: &WindowManager) -> WindowHandle {
        manager
            .create_window(WindowOptions::new("test"))
            .expect("create")
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[test]
    fn start_twice_fails() {
        let (manager, _, _) = started();
        assert_eq!(manager.state(), RunnerState::Running);
        assert!(matches!(manager.start(), Err(WmError::AlreadyStarted)));
    }

    #[test]
    fn create_before_start_fails() {
        let manager = WindowManager::new(Arc::new(HeadlessPlatform::new()), ManagerConfig::default());
        assert!(matches!(
            manager.create_window(WindowOptions::default()),
            Err(WmError::NotRunning)
        ));
    }

    #[test]
    fn cancel_completes_run_handle_and_joins_thread() {
        let (manager, _, run) = started();
        let token = manager.shutdown_token();
        assert!(!run.is_finished());

        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(run.wait(), Ok(()));
        assert_eq!(manager.state(), RunnerState::Stopped);

        assert_eq!(manager.shutdown(), Ok(()));
        assert!(manager
            .thread
            .lock()
            .expect("lock")
            .is_none());
    }

    #[test]
    fn dispatch_after_stop_is_rejected() {
        let (manager, _, run) = started();
        manager.shutdown_token().cancel();
        run.wait().expect("clean stop");
        assert_eq!(manager.dispatch(|| 1), Err(WmError::Stopped));
        assert!(matches!(
            manager.create_window(WindowOptions::default()),
            Err(WmError::Stopped)
        ));
    }

    #[test]
    fn drop_destroys_open_windows_on_ui_thread() {
        let (manager, platform, run) = started();
        let handle = window(&manager);
        assert_eq!(platform.window_count(), 1);

        drop(manager);

        assert!(run.is_finished());
        assert_eq!(platform.window_count(), 0);
        assert_eq!(handle.show(ShowCommand::SHOW), Err(WmError::InvalidWindow));
    }

    #[test]
    fn failed_thread_setup_surfaces_from_start() {
        let platform = Arc::new(HeadlessPlatform::new());
        // Claim the platform for this thread so the UI thread cannot.
        platform.init_thread().expect("init");
        let manager = WindowManager::new(platform, ManagerConfig::default());

        let err = manager.start().expect_err("setup must fail");
        assert_eq!(
            err,
            WmError::Native {
                function: "init_thread",
                code: ERROR_WRONG_THREAD,
            }
        );
        assert_eq!(manager.state(), RunnerState::Stopped);
    }

    #[test]
    fn quit_message_stops_the_pump() {
        let (_manager, platform, run) = started();
        platform.post_quit();
        assert_eq!(run.wait_timeout(Duration::from_secs(5)), Some(Ok(())));
    }

    #[test]
    fn ui_thread_is_named_from_config() {
        let config = ManagerConfig {
            thread_name: "custom-ui".to_owned(),
            ..ManagerConfig::default()
        };
        let manager = WindowManager::new(Arc::new(HeadlessPlatform::new()), config);
        manager.start().expect("start");
        let name = manager
            .dispatch(|| thread::current().name().map(str::to_owned))
            .expect("dispatch");
        assert_eq!(name.as_deref(), Some("custom-ui"));
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    #[test]
    fn queued_items_finish_during_shutdown() {
        let (manager, _, run) = started();
        let manager = Arc::new(manager);
        let entered = Arc::new(AtomicBool::new(false));
        let gate = Arc::new((Mutex::new(false), std::sync::Condvar::new()));

        // Hold the UI thread inside one item while more queue up behind it.
        let blocker = {
            let manager = Arc::clone(&manager);
            let entered = Arc::clone(&entered);
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                manager.dispatch(move || {
                    entered.store(true, Ordering::SeqCst);
                    let (open, cv) = &*gate;
                    let _open = cv
                        .wait_while(open.lock().expect("lock"), |open| !*open)
                        .expect("wait");
                    1
                })
            })
        };
        while !entered.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        let done = Arc::new(AtomicUsize::new(0));
        let queued: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let done = Arc::clone(&done);
                thread::spawn(move || manager.dispatch(move || done.fetch_add(1, Ordering::SeqCst)))
            })
            .collect();
        while manager.ctx.dispatcher.pending() < 4 {
            thread::yield_now();
        }

        manager.shutdown_token().cancel();
        assert_eq!(manager.dispatch(|| ()), Err(WmError::Stopped));
        {
            let (open, cv) = &*gate;
            *open.lock().expect("lock") = true;
            cv.notify_all();
        }

        assert_eq!(blocker.join().expect("join"), Ok(1));
        for q in queued {
            assert!(q.join().expect("join").is_ok());
        }
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(run.wait(), Ok(()));
    }

    #[test]
    fn reentrant_dispatch_runs_inline_while_stop_is_requested() {
        let (manager, _, run) = started();
        let handle = window(&manager);
        let token = manager.shutdown_token();
        let ctx = Arc::clone(&manager.ctx);
        let inner = handle.clone();

        let outcome = handle.dispatch(move || {
            token.cancel();
            // Still on the UI thread, mid-item: the nested call must not queue.
            (ctx.dispatcher.state(), inner.dispatch(|| 888))
        });

        assert_eq!(outcome, Ok((RunnerState::StopRequested, Ok(888))));
        assert_eq!(run.wait(), Ok(()));
        assert_eq!(manager.state(), RunnerState::Stopped);
        assert_eq!(handle.dispatch(|| 1), Err(WmError::InvalidWindow));
    }

    #[test]
    fn pump_survives_panicking_window_procedure() {
        let (manager, platform, _) = started();
        let handled = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&handled);
        let handle = manager
            .create_window(WindowOptions::new("faulty").with_handler(move |m| {
                if m.id == 0x0401 {
                    panic!("handler fault");
                }
                seen.fetch_add(1, Ordering::SeqCst);
                Some(0)
            }))
            .expect("create");

        platform.post_message(handle.native(), 0x0401, 0, 0);
        platform.post_message(handle.native(), 0x0400, 0, 0);

        // Messages are handled in order; once the second is seen the first
        // (panicking) one has been contained.
        while handled.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        assert_eq!(handle.dispatch(|| 7), Ok(7));
        assert_eq!(manager.state(), RunnerState::Running);
    }

    #[test]
    fn handler_can_dispatch_reentrantly() {
        let (manager, platform, _) = started();
        let slot: Arc<Mutex<Option<WindowHandle>>> = Arc::default();
        let result = Arc::new(Mutex::new(None));

        let options = {
            let slot = Arc::clone(&slot);
            let result = Arc::clone(&result);
            WindowOptions::new("reentrant").with_handler(move |_| {
                let handle = slot.lock().expect("lock").clone()?;
                // The window procedure runs on the UI thread: these calls go
                // inline instead of queueing behind the message being handled.
                let moved = handle.move_to(3, 4, 50, 60, false);
                let value = handle.dispatch(|| 888);
                *result.lock().expect("lock") = Some((moved, value));
                Some(0)
            })
        };
        let handle = manager.create_window(options).expect("create");
        *slot.lock().expect("lock") = Some(handle.clone());

        platform.post_message(handle.native(), 0x0400, 0, 0);
        while result.lock().expect("lock").is_none() {
            thread::yield_now();
        }
        assert_eq!(*result.lock().expect("lock"), Some((Ok(()), Ok(888))));
        assert_eq!(
            platform.snapshot(handle.native()).expect("live").rect,
            Rect::new(3, 4, 50, 60)
        );
        slot.lock().expect("lock").take();
    }

    #[test]
    fn creation_failure_surfaces_native_error() {
        let (manager, platform, _) = started();
        platform.fail_next_create(0x5AF);
        let err = manager
            .create_window(WindowOptions::new("doomed"))
            .expect_err("creation must fail");
        assert_eq!(
            err,
            WmError::Creation {
                function: "CreateWindowExW",
                code: 0x5AF,
            }
        );
        assert_eq!(manager.window_count(), 0);
        // The pump is unaffected.
        window(&manager);
        assert_eq!(manager.window_count(), 1);
    }

    #[test]
    fn window_destroyed_by_its_own_procedure_is_forgotten() {
        const WM_CLOSE: u32 = 0x0010;
        let (manager, platform, _) = started();
        let native = Arc::clone(&platform);
        let handle = manager
            .create_window(WindowOptions::new("self-closing").with_handler(move |m| {
                if m.id == WM_CLOSE {
                    native.destroy_window(m.window).ok()?;
                }
                Some(0)
            }))
            .expect("create");

        platform.post_message(handle.native(), WM_CLOSE, 0, 0);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_closed() && Instant::now() < deadline {
            thread::yield_now();
        }

        assert!(handle.is_closed());
        assert_eq!(manager.window_count(), 0);
        assert_eq!(platform.window_count(), 0);
        assert_eq!(handle.show(ShowCommand::SHOW), Err(WmError::InvalidWindow));
        assert_eq!(handle.close(), Err(WmError::InvalidWindow));
    }

    #[test]
    fn failed_destroy_leaves_window_tracked_for_retry() {
        let (manager, platform, run) = started();
        let retried = window(&manager);
        let swept = window(&manager);

        platform.fail_next_destroy(0x578);
        assert_eq!(
            retried.close(),
            Err(WmError::Native {
                function: "DestroyWindow",
                code: 0x578,
            })
        );
        assert!(!retried.is_closed());
        assert_eq!(manager.window_count(), 2);
        retried.close().expect("retry");
        assert_eq!(manager.window_count(), 1);

        platform.fail_next_destroy(0x578);
        assert!(swept.close().is_err());
        drop(manager);
        assert_eq!(run.wait(), Ok(()));
        assert!(swept.is_closed());
        assert_eq!(platform.window_count(), 0);
    }

    #[test]
    fn defaults_from_config_fill_missing_options() {
        let platform = Arc::new(HeadlessPlatform::new());
        let config = ManagerConfig {
            default_title: "fallback".to_owned(),
            default_width: 320,
            default_height: 200,
            ..ManagerConfig::default()
        };
        let manager = WindowManager::new(platform.clone(), config);
        manager.start().expect("start");
        let handle = manager
            .create_window(WindowOptions::default())
            .expect("create");

        let snapshot = platform.snapshot(handle.native()).expect("live");
        assert_eq!(snapshot.title, "fallback");
        assert_eq!(snapshot.rect, Rect::new(0, 0, 320, 200));
    }

    #[test]
    fn all_native_calls_happen_on_ui_thread() {
        let (manager, platform, _) = started();
        let handle = window(&manager);
        handle.move_to(1, 1, 2, 2, true).expect("move");
        handle.close().expect("close");
        let ui = manager.dispatch(|| thread::current().id()).expect("dispatch");
        assert_eq!(platform.ui_thread(), Some(ui));
        assert_ne!(ui, thread::current().id());
        // The headless platform rejects off-thread calls, so a clean history
        // means every call ran on `ui`.
        assert!(matches!(platform.history().last(), Some(NativeOp::Destroy { .. })));
    }

    #[test]
    fn concurrent_operations_replay_to_final_state() {
        const THREADS: i32 = 8;
        const CALLS: i32 = 40;

        let (manager, platform, _) = started();
        let handle = window(&manager);

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let handle = handle.clone();
                thread::spawn(move || {
                    for i in 0..CALLS {
                        let x = t * 1000 + i;
                        handle.move_to(x, t, 10 + i, 10, i % 2 == 0).expect("move");
                        handle.show(i % 2).expect("show");
                        handle.set_window_style(x as u32).expect("style");
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().expect("join");
        }

        let history = platform.history();
        assert_eq!(replay(&history), platform.snapshots());

        // Per-thread submission order survives the serialisation.
        for t in 0..THREADS {
            let xs: Vec<i32> = history
                .iter()
                .filter_map(|op| match op {
                    NativeOp::Move { rect, .. } if rect.y == t => Some(rect.x),
                    _ => None,
                })
                .collect();
            assert_eq!(xs, (0..CALLS).map(|i| t * 1000 + i).collect::<Vec<_>>());
        }
    }
}
