// ── Platform abstraction layer ────────────────────────────────────────────────
//
// This module defines the native capabilities the UI thread drives: window
// creation and mutation, the message wait, and one step of the message pump.
// No `unsafe` lives here; all Win32 FFI is confined to the `win32` sub-module
// and never leaks outward.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use crate::error::{panic_message, Result};

pub mod headless;
#[cfg(windows)]
pub mod win32;

// ── Native identity ───────────────────────────────────────────────────────────

/// Opaque native window identity (an `HWND` value on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeWindow(isize);

impl NativeWindow {
    /// Wrap a raw native handle value.
    pub const fn from_raw(raw: isize) -> Self {
        Self(raw)
    }

    /// The raw native handle value.
    pub const fn raw(self) -> isize {
        self.0
    }
}

/// Position sentinel meaning "let the platform choose" (`CW_USEDEFAULT`).
pub const USE_DEFAULT: i32 = i32::MIN;

/// A window rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A native message as seen by a window procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    pub window: NativeWindow,
    pub id: u32,
    pub wparam: usize,
    pub lparam: isize,
}

/// Per-window message callback.  Returning `None` defers to the platform's
/// default processing.  Runs on the UI thread and may dispatch re-entrantly.
pub type MessageHandler = Arc<dyn Fn(&WindowMessage) -> Option<isize> + Send + Sync>;

/// Invoke `handler` for `message`, containing any panic so one misbehaving
/// handler cannot take the pump down with it.
pub(crate) fn route_message(handler: &MessageHandler, message: &WindowMessage) -> Option<isize> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
        Ok(result) => result,
        Err(payload) => {
            log::error!(
                "window procedure panicked on message {:#06x} for window {:#x}: {}",
                message.id,
                message.window.raw(),
                panic_message(payload.as_ref()),
            );
            None
        }
    }
}

/// Told about every native window that goes away, whoever destroyed it.
/// Runs on the UI thread.
pub type DestroyHook = Arc<dyn Fn(NativeWindow) + Send + Sync>;

/// Invoke `hook` for `window`, containing any panic: on Win32 this runs
/// inside the window procedure, where unwinding must not escape.
pub(crate) fn report_destroyed(hook: &DestroyHook, window: NativeWindow) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(window))) {
        log::error!(
            "destroy hook panicked for window {:#x}: {}",
            window.raw(),
            panic_message(payload.as_ref()),
        );
    }
}

// ── Window options ────────────────────────────────────────────────────────────

/// Parameters for `WindowManager::create_window`.
#[derive(Clone, Default)]
pub struct WindowOptions {
    /// Title bar text; empty means the configured default.
    pub title: String,
    /// Initial rectangle; `None` means default position and configured size.
    pub rect: Option<Rect>,
    /// Native style bits (`WS_*`); zero means an overlapped window.
    pub style: u32,
    /// Show the window immediately after creation.
    pub visible: bool,
    /// Optional window procedure hook.
    pub handler: Option<MessageHandler>,
}

impl WindowOptions {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn with_style(mut self, style: u32) -> Self {
        self.style = style;
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&WindowMessage) -> Option<isize> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for WindowOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowOptions")
            .field("title", &self.title)
            .field("rect", &self.rect)
            .field("style", &format_args!("{:#010x}", self.style))
            .field("visible", &self.visible)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

// ── Pump results ──────────────────────────────────────────────────────────────

/// Why `Platform::wait` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A native message is ready to be pumped.
    Message,
    /// `Platform::wake` was called (new work was queued or a stop requested).
    Signaled,
    TimedOut,
}

/// Outcome of one `Platform::pump_message` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pumped {
    Dispatched,
    Empty,
    /// The quit message was retrieved; the runner treats it as a stop request.
    Quit,
}

// ── Platform ──────────────────────────────────────────────────────────────────

/// Native windowing capabilities driven by the UI thread.
///
/// Every method except `wake` is only ever called on the UI thread, after
/// `init_thread`.  Methods take `&self` because the window procedure can
/// re-enter the platform while a `pump_message` call is still on the stack.
pub trait Platform: Send + Sync + 'static {
    /// One-time setup on the freshly spawned UI thread.
    fn init_thread(&self) -> Result<()>;

    /// Install the callback for native destruction.  Called once, by the
    /// owning manager, before the UI thread starts.  The hook must fire for
    /// `destroy_window` and for windows destroyed from inside their own
    /// window procedure alike.
    fn set_destroy_hook(&self, hook: DestroyHook);

    /// Register the window class used for every managed window.
    fn register_class(&self, class_name: &str) -> Result<()>;

    fn create_window(
        &self,
        class_name: &str,
        options: &WindowOptions,
        rect: Rect,
    ) -> Result<NativeWindow>;

    fn destroy_window(&self, window: NativeWindow) -> Result<()>;

    fn move_window(&self, window: NativeWindow, rect: Rect, repaint: bool) -> Result<()>;

    /// Apply a show command; returns whether the window was previously visible.
    fn show_window(&self, window: NativeWindow, command: i32) -> Result<bool>;

    /// Replace the window's style bits; returns whether the native call succeeded.
    fn set_window_style(&self, window: NativeWindow, style: u32) -> Result<bool>;

    /// Block until a native message is available, `wake` is called, or the
    /// timeout (if any) elapses.
    fn wait(&self, timeout: Option<Duration>) -> Result<Wake>;

    /// Retrieve, translate and dispatch at most one native message.
    fn pump_message(&self) -> Result<Pumped>;

    /// Interrupt a pending `wait`.  Callable from any thread.
    fn wake(&self);
}

/// The platform for the current target: Win32 on Windows, headless elsewhere.
#[cfg(windows)]
pub fn native() -> Result<Arc<dyn Platform>> {
    Ok(Arc::new(win32::Win32Platform::new()?))
}

/// The platform for the current target: Win32 on Windows, headless elsewhere.
#[cfg(not(windows))]
pub fn native() -> Result<Arc<dyn Platform>> {
    Ok(Arc::new(headless::HeadlessPlatform::new()))
}
