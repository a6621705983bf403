// ── Managed window handle ─────────────────────────────────────────────────────
//
// A `WindowHandle` is a cheap, cloneable reference to one native window.  It
// never touches the native handle itself: every operation is a closure sent
// through the manager's dispatcher and executed on the UI thread.
//
// Once closed, destroyed at shutdown, or destroyed natively (for example by
// its own window procedure) the handle is dead for good; every
// later call fails with `WmError::InvalidWindow` without dispatching.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    error::{Result, WmError},
    manager::Context,
    platform::{NativeWindow, Platform, Rect},
};

// ── Show commands ─────────────────────────────────────────────────────────────

/// A native show-state command (`SW_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShowCommand(pub i32);

impl ShowCommand {
    pub const HIDE: Self = Self(0);
    pub const SHOW_NORMAL: Self = Self(1);
    pub const SHOW_MINIMIZED: Self = Self(2);
    pub const SHOW_MAXIMIZED: Self = Self(3);
    pub const SHOW_NO_ACTIVATE: Self = Self(4);
    pub const SHOW: Self = Self(5);
    pub const MINIMIZE: Self = Self(6);
    pub const RESTORE: Self = Self(9);
}

impl From<i32> for ShowCommand {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

// ── WindowState ───────────────────────────────────────────────────────────────

/// Validity of one native window, shared by every clone of its handle and by
/// the manager's live-window table.
pub(crate) struct WindowState {
    pub(crate) native: NativeWindow,
    closed: AtomicBool,
}

impl WindowState {
    pub(crate) fn new(native: NativeWindow) -> Self {
        Self {
            native,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns `true` if this call is the one that closed the window.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

// ── WindowHandle ──────────────────────────────────────────────────────────────

/// Handle to one window owned by a `WindowManager`.
///
/// Safe to use from any thread.  Calls from other threads block until the UI
/// thread has run them; calls from the UI thread (e.g. inside a message
/// handler) run inline.
#[derive(Clone)]
pub struct WindowHandle {
    ctx: Arc<Context>,
    state: Arc<WindowState>,
}

impl WindowHandle {
    pub(crate) fn new(ctx: Arc<Context>, state: Arc<WindowState>) -> Self {
        Self { ctx, state }
    }

    /// The underlying native window.  Only meaningful on the UI thread, and
    /// only until the handle is closed.
    pub fn native(&self) -> NativeWindow {
        self.state.native
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_closed() {
            Err(WmError::InvalidWindow)
        } else {
            Ok(())
        }
    }

    /// Run a native operation on the UI thread, re-checking validity there:
    /// another thread may have closed the window while this call was queued.
    fn with_native<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn Platform, NativeWindow) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_open()?;
        let ctx = Arc::clone(&self.ctx);
        let state = Arc::clone(&self.state);
        self.ctx.dispatcher.dispatch(move || {
            if state.is_closed() {
                return Err(WmError::InvalidWindow);
            }
            op(ctx.platform.as_ref(), state.native)
        })?
    }

    /// Reposition and resize the window.
    pub fn move_to(&self, x: i32, y: i32, width: i32, height: i32, repaint: bool) -> Result<()> {
        let rect = Rect::new(x, y, width, height);
        self.with_native(move |platform, window| platform.move_window(window, rect, repaint))
    }

    /// Apply a show command.  Returns whether the window was visible before.
    pub fn show(&self, command: impl Into<ShowCommand>) -> Result<bool> {
        let ShowCommand(code) = command.into();
        self.with_native(move |platform, window| platform.show_window(window, code))
    }

    /// Replace the window's style bits.  Returns whether the native call
    /// reported success.
    pub fn set_window_style(&self, style: u32) -> Result<bool> {
        self.with_native(move |platform, window| platform.set_window_style(window, style))
    }

    /// Run `f` on this window's UI thread and return its value.
    ///
    /// Use this to group several window operations into one atomic unit, or
    /// to read state that only the window procedure touches.  Re-entrant
    /// calls from the UI thread run inline; a panic in `f` is resumed on the
    /// calling thread.
    pub fn dispatch<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.with_native(move |_, _| Ok(f()))
    }

    /// Destroy the native window and invalidate this handle (and its clones).
    /// A second `close` fails with `InvalidWindow`.
    pub fn close(&self) -> Result<()> {
        self.ensure_open()?;
        let ctx = Arc::clone(&self.ctx);
        let state = Arc::clone(&self.state);
        self.ctx
            .dispatcher
            .dispatch(move || ctx.destroy_native(&state))?
    }
}

impl fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowHandle")
            .field("native", &format_args!("{:#x}", self.state.native.raw()))
            .field("closed", &self.state.is_closed())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        panic::{self, AssertUnwindSafe},
        thread,
    };

    use super::*;
    use crate::{
        config::ManagerConfig,
        error::panic_message,
        manager::WindowManager,
        platform::{headless::HeadlessPlatform, WindowOptions},
    };

    fn open() -> (WindowManager, Arc<HeadlessPlatform>, WindowHandle) {
        let platform = Arc::new(HeadlessPlatform::new());
        let manager = WindowManager::new(platform.clone(), ManagerConfig::default());
        manager.start().expect("start");
        let handle = manager
            .create_window(WindowOptions::new("handle"))
            .expect("create");
        (manager, platform, handle)
    }

    #[test]
    fn dispatch_returns_value_from_other_thread() {
        let (_manager, _, handle) = open();
        assert_eq!(handle.dispatch(|| 999), Ok(999));
    }

    #[test]
    fn nested_dispatch_does_not_deadlock() {
        let (_manager, _, handle) = open();
        let inner = handle.clone();
        let value = handle
            .dispatch(move || inner.dispatch(|| 888).expect("inner"))
            .expect("outer");
        assert_eq!(value, 888);
    }

    #[test]
    fn deep_nesting_runs_inline_at_every_level() {
        fn nest(handle: WindowHandle, depth: u32) -> u32 {
            if depth == 0 {
                return 0;
            }
            let next = handle.clone();
            handle
                .dispatch(move || nest(next, depth - 1) + 1)
                .expect("dispatch")
        }
        let (_manager, _, handle) = open();
        assert_eq!(nest(handle, 32), 32);
    }

    #[test]
    fn panic_surfaces_on_caller_with_original_payload() {
        let (_manager, _, handle) = open();
        let code: u32 = "42".parse().expect("number");
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            handle.dispatch(move || -> i32 { panic!("computation failed: {code}") })
        }))
        .expect_err("must panic");
        assert_eq!(panic_message(caught.as_ref()), "computation failed: 42");

        // Typed payloads keep their type too.
        #[derive(Debug, PartialEq)]
        struct Custom(u8);
        let caught = panic::catch_unwind(AssertUnwindSafe(|| {
            handle.dispatch(|| -> () { panic::panic_any(Custom(7)) })
        }))
        .expect_err("must panic");
        assert_eq!(caught.downcast_ref::<Custom>(), Some(&Custom(7)));

        // The pump is still alive.
        assert_eq!(handle.dispatch(|| "still here"), Ok("still here"));
    }

    #[test]
    fn fallible_computation_returns_its_error_as_a_value() {
        let (_manager, _, handle) = open();
        let result: Result<std::result::Result<(), String>> =
            handle.dispatch(|| Err("nope".to_owned()));
        assert_eq!(result, Ok(Err("nope".to_owned())));
    }

    #[test]
    fn lifecycle_scenario() {
        let (manager, platform, handle) = open();

        handle.move_to(0, 0, 100, 100, true).expect("move");
        handle.show(1).expect("show");
        handle.move_to(100, 100, 100, 100, true).expect("move");
        handle.show(0).expect("hide");
        assert_eq!(handle.set_window_style(0), Ok(true));

        let snapshot = platform.snapshot(handle.native()).expect("live");
        assert_eq!(snapshot.rect, Rect::new(100, 100, 100, 100));
        assert_eq!(snapshot.show, Some(0));
        assert!(!snapshot.visible);
        assert_eq!(snapshot.style, 0);

        handle.close().expect("close");
        assert!(handle.is_closed());
        assert_eq!(manager.window_count(), 0);
        assert_eq!(platform.snapshot(handle.native()), None);

        assert_eq!(handle.show(1), Err(WmError::InvalidWindow));
    }

    #[test]
    fn every_operation_fails_after_close() {
        let (_manager, _, handle) = open();
        let clone = handle.clone();
        handle.close().expect("close");

        assert_eq!(clone.show(ShowCommand::SHOW), Err(WmError::InvalidWindow));
        assert_eq!(clone.move_to(0, 0, 1, 1, false), Err(WmError::InvalidWindow));
        assert_eq!(clone.set_window_style(0), Err(WmError::InvalidWindow));
        assert_eq!(clone.dispatch(|| 1), Err(WmError::InvalidWindow));
        assert_eq!(clone.close(), Err(WmError::InvalidWindow));
    }

    #[test]
    fn racing_closes_succeed_exactly_once() {
        let (_manager, platform, handle) = open();
        let results: Vec<_> = (0..6)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.close())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().expect("join"))
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .all(|r| matches!(r, Ok(()) | Err(WmError::InvalidWindow))));
        assert_eq!(platform.window_count(), 0);
    }

    #[test]
    fn natively_destroyed_window_reports_invalid() {
        let (manager, platform, handle) = open();
        let native = handle.native();
        let p = Arc::clone(&platform);
        // Destroy behind the manager's back, as a window procedure might.
        manager
            .dispatch(move || p.destroy_window(native))
            .expect("dispatch")
            .expect("destroy");
        assert!(handle.is_closed());
        assert_eq!(manager.window_count(), 0);
        assert_eq!(handle.move_to(0, 0, 1, 1, true), Err(WmError::InvalidWindow));
        assert_eq!(handle.close(), Err(WmError::InvalidWindow));
    }

    #[test]
    fn show_command_constants_match_native_codes() {
        assert_eq!(ShowCommand::HIDE, ShowCommand::from(0));
        assert_eq!(ShowCommand::SHOW_NORMAL.0, 1);
        assert_eq!(ShowCommand::RESTORE.0, 9);
    }
}
