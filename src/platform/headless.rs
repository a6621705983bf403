// ── Headless platform ─────────────────────────────────────────────────────────
//
// An in-process stand-in for the native window system.  Windows are records
// in a table, the message queue is a `VecDeque`, and the wake primitive is a
// condvar shared with that queue.  Used on targets without Win32 and by the
// test suite, which inspects the window table and the executed-operation log.
//
// Like a real window system, every call except `wake` and `post_message` is
// bound to the thread that called `init_thread`; calls from anywhere else fail.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError},
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use super::{
    report_destroyed, route_message, DestroyHook, MessageHandler, NativeWindow, Platform, Pumped,
    Rect, Wake, WindowMessage, WindowOptions, USE_DEFAULT,
};
use crate::error::{Result, WmError};

/// `ERROR_WINDOW_OF_OTHER_THREAD`: a native call was made off the UI thread.
pub const ERROR_WRONG_THREAD: u32 = 1408;

/// `ERROR_CANNOT_FIND_WND_CLASS`: create was attempted before registration.
pub const ERROR_NO_CLASS: u32 = 1407;

/// Show command that hides the window (`SW_HIDE`).
const SHOW_HIDE: i32 = 0;

// ── Observable state ──────────────────────────────────────────────────────────

/// The native-side state of one simulated window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub title: String,
    pub rect: Rect,
    pub style: u32,
    /// Last show command applied, if any.
    pub show: Option<i32>,
    pub visible: bool,
}

impl WindowSnapshot {
    /// Apply one mutating operation.  Shared by the live table and `replay`.
    fn apply(&mut self, op: &NativeOp) {
        match *op {
            NativeOp::Move { rect, .. } => self.rect = rect,
            NativeOp::Show { command, .. } => {
                self.show = Some(command);
                self.visible = command != SHOW_HIDE;
            }
            NativeOp::SetStyle { style, .. } => self.style = style,
            NativeOp::Create { .. } | NativeOp::Destroy { .. } => {}
        }
    }
}

/// One native operation, recorded in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeOp {
    Create {
        window: NativeWindow,
        title: String,
        rect: Rect,
        style: u32,
        visible: bool,
    },
    Move {
        window: NativeWindow,
        rect: Rect,
        repaint: bool,
    },
    Show {
        window: NativeWindow,
        command: i32,
    },
    SetStyle {
        window: NativeWindow,
        style: u32,
    },
    Destroy {
        window: NativeWindow,
    },
}

/// Rebuild the window table from an operation log.
pub fn replay(ops: &[NativeOp]) -> HashMap<NativeWindow, WindowSnapshot> {
    let mut windows = HashMap::new();
    for op in ops {
        match op {
            NativeOp::Create {
                window,
                title,
                rect,
                style,
                visible,
            } => {
                windows.insert(
                    *window,
                    WindowSnapshot {
                        title: title.clone(),
                        rect: *rect,
                        style: *style,
                        show: None,
                        visible: *visible,
                    },
                );
            }
            NativeOp::Destroy { window } => {
                windows.remove(window);
            }
            NativeOp::Move { window, .. }
            | NativeOp::Show { window, .. }
            | NativeOp::SetStyle { window, .. } => {
                if let Some(snapshot) = windows.get_mut(window) {
                    snapshot.apply(op);
                }
            }
        }
    }
    windows
}

// ── Internal state ────────────────────────────────────────────────────────────

struct HeadlessWindow {
    snapshot: WindowSnapshot,
    handler: Option<MessageHandler>,
}

enum Queued {
    Message(WindowMessage),
    Quit,
}

#[derive(Default)]
struct State {
    next_id: isize,
    classes: HashSet<String>,
    windows: HashMap<NativeWindow, HeadlessWindow>,
    queue: VecDeque<Queued>,
    woken: bool,
    history: Vec<NativeOp>,
    fail_next_create: Option<u32>,
    fail_next_destroy: Option<u32>,
}

impl State {
    fn record(&mut self, op: NativeOp) -> Result<()> {
        let window = match op {
            NativeOp::Move { window, .. }
            | NativeOp::Show { window, .. }
            | NativeOp::SetStyle { window, .. } => window,
            NativeOp::Create { .. } | NativeOp::Destroy { .. } => {
                self.history.push(op);
                return Ok(());
            }
        };
        let entry = self
            .windows
            .get_mut(&window)
            .ok_or(WmError::InvalidWindow)?;
        entry.snapshot.apply(&op);
        self.history.push(op);
        Ok(())
    }
}

// ── HeadlessPlatform ──────────────────────────────────────────────────────────

/// Simulated window system; see the module comment.
#[derive(Default)]
pub struct HeadlessPlatform {
    state: Mutex<State>,
    ready: Condvar,
    ui_thread: OnceLock<ThreadId>,
    destroy_hook: OnceLock<DestroyHook>,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_thread(&self, function: &'static str) -> Result<()> {
        match self.ui_thread.get() {
            Some(id) if *id == thread::current().id() => Ok(()),
            _ => Err(WmError::Native {
                function,
                code: ERROR_WRONG_THREAD,
            }),
        }
    }

    // ── Inspection (any thread) ───────────────────────────────────────────────

    /// Current native state of `window`, or `None` once it is destroyed.
    pub fn snapshot(&self, window: NativeWindow) -> Option<WindowSnapshot> {
        self.lock().windows.get(&window).map(|w| w.snapshot.clone())
    }

    /// Every live window with its native state.
    pub fn snapshots(&self) -> HashMap<NativeWindow, WindowSnapshot> {
        self.lock()
            .windows
            .iter()
            .map(|(id, w)| (*id, w.snapshot.clone()))
            .collect()
    }

    /// Executed native operations, oldest first.
    pub fn history(&self) -> Vec<NativeOp> {
        self.lock().history.clone()
    }

    pub fn window_count(&self) -> usize {
        self.lock().windows.len()
    }

    /// The thread that owns the simulated windows, once initialised.
    pub fn ui_thread(&self) -> Option<ThreadId> {
        self.ui_thread.get().copied()
    }

    // ── Injection (any thread) ────────────────────────────────────────────────

    /// Queue a message for `window`, as if the user or another process sent it.
    pub fn post_message(&self, window: NativeWindow, id: u32, wparam: usize, lparam: isize) {
        let mut state = self.lock();
        state.queue.push_back(Queued::Message(WindowMessage {
            window,
            id,
            wparam,
            lparam,
        }));
        self.ready.notify_all();
    }

    /// Queue a quit message (`PostQuitMessage` equivalent).
    pub fn post_quit(&self) {
        let mut state = self.lock();
        state.queue.push_back(Queued::Quit);
        self.ready.notify_all();
    }

    /// Make the next `create_window` fail with `code`.
    pub fn fail_next_create(&self, code: u32) {
        self.lock().fail_next_create = Some(code);
    }

    /// Make the next `destroy_window` fail with `code`, leaving the window alive.
    pub fn fail_next_destroy(&self, code: u32) {
        self.lock().fail_next_destroy = Some(code);
    }
}

impl Platform for HeadlessPlatform {
    fn init_thread(&self) -> Result<()> {
        let current = thread::current().id();
        let owner = *self.ui_thread.get_or_init(|| current);
        if owner != current {
            return Err(WmError::Native {
                function: "init_thread",
                code: ERROR_WRONG_THREAD,
            });
        }
        Ok(())
    }

    fn set_destroy_hook(&self, hook: DestroyHook) {
        if self.destroy_hook.set(hook).is_err() {
            log::warn!("destroy hook already installed; is this platform shared between managers?");
        }
    }

    fn register_class(&self, class_name: &str) -> Result<()> {
        self.check_thread("RegisterClassExW")?;
        self.lock().classes.insert(class_name.to_owned());
        Ok(())
    }

    fn create_window(
        &self,
        class_name: &str,
        options: &WindowOptions,
        rect: Rect,
    ) -> Result<NativeWindow> {
        self.check_thread("CreateWindowExW")?;
        let mut state = self.lock();
        if let Some(code) = state.fail_next_create.take() {
            return Err(WmError::Creation {
                function: "CreateWindowExW",
                code,
            });
        }
        if !state.classes.contains(class_name) {
            return Err(WmError::Creation {
                function: "CreateWindowExW",
                code: ERROR_NO_CLASS,
            });
        }

        state.next_id += 1;
        let window = NativeWindow::from_raw(state.next_id);
        let rect = Rect {
            x: if rect.x == USE_DEFAULT { 0 } else { rect.x },
            y: if rect.y == USE_DEFAULT { 0 } else { rect.y },
            ..rect
        };
        let snapshot = WindowSnapshot {
            title: options.title.clone(),
            rect,
            style: options.style,
            show: None,
            visible: options.visible,
        };
        state.windows.insert(
            window,
            HeadlessWindow {
                snapshot,
                handler: options.handler.clone(),
            },
        );
        state.record(NativeOp::Create {
            window,
            title: options.title.clone(),
            rect,
            style: options.style,
            visible: options.visible,
        })?;
        Ok(window)
    }

    fn destroy_window(&self, window: NativeWindow) -> Result<()> {
        self.check_thread("DestroyWindow")?;
        {
            let mut state = self.lock();
            if let Some(code) = state.fail_next_destroy.take() {
                return Err(WmError::Native {
                    function: "DestroyWindow",
                    code,
                });
            }
            if state.windows.remove(&window).is_none() {
                return Err(WmError::InvalidWindow);
            }
            state.record(NativeOp::Destroy { window })?;
        }
        // Outside the lock, like WM_NCDESTROY arriving after the window is gone.
        if let Some(hook) = self.destroy_hook.get() {
            report_destroyed(hook, window);
        }
        Ok(())
    }

    fn move_window(&self, window: NativeWindow, rect: Rect, repaint: bool) -> Result<()> {
        self.check_thread("MoveWindow")?;
        self.lock().record(NativeOp::Move {
            window,
            rect,
            repaint,
        })
    }

    fn show_window(&self, window: NativeWindow, command: i32) -> Result<bool> {
        self.check_thread("ShowWindow")?;
        let mut state = self.lock();
        let was_visible = state
            .windows
            .get(&window)
            .map(|w| w.snapshot.visible)
            .ok_or(WmError::InvalidWindow)?;
        state.record(NativeOp::Show { window, command })?;
        Ok(was_visible)
    }

    fn set_window_style(&self, window: NativeWindow, style: u32) -> Result<bool> {
        self.check_thread("SetWindowLongPtrW")?;
        self.lock().record(NativeOp::SetStyle { window, style })?;
        Ok(true)
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Wake> {
        self.check_thread("MsgWaitForMultipleObjectsEx")?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            // The wake signal wins over pending input, as a signalled handle
            // does over queued messages natively.
            if state.woken {
                state.woken = false;
                return Ok(Wake::Signaled);
            }
            if !state.queue.is_empty() {
                return Ok(Wake::Message);
            }
            state = match deadline {
                None => self.ready.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Wake::TimedOut);
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn pump_message(&self) -> Result<Pumped> {
        self.check_thread("PeekMessageW")?;
        // The lock is released before the handler runs: handlers may call back
        // into the platform through re-entrant dispatch.
        let (message, handler) = {
            let mut state = self.lock();
            match state.queue.pop_front() {
                None => return Ok(Pumped::Empty),
                Some(Queued::Quit) => return Ok(Pumped::Quit),
                Some(Queued::Message(message)) => {
                    let handler = state
                        .windows
                        .get(&message.window)
                        .and_then(|w| w.handler.clone());
                    (message, handler)
                }
            }
        };
        match handler {
            Some(handler) => {
                let _ = route_message(&handler, &message);
            }
            None => log::debug!(
                "dropping message {:#06x} for window {:#x} without a handler",
                message.id,
                message.window.raw()
            ),
        }
        Ok(Pumped::Dispatched)
    }

    fn wake(&self) {
        let mut state = self.lock();
        state.woken = true;
        self.ready.notify_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
