// ── Win32 platform implementation ─────────────────────────────────────────────
//
// This is the only module in the codebase where `unsafe` code is permitted.
// Every `unsafe` block MUST carry a `// SAFETY:` comment that states:
//   • which invariant makes the operation sound, and
//   • what the caller is responsible for maintaining.
//
// The wake primitive is an auto-reset event.  The pump waits on it together
// with the thread's message queue (`MsgWaitForMultipleObjectsEx`), so queuing
// work interrupts the wait even when no window message is pending.

#![allow(unsafe_code)]

mod dpi;
mod window;

use std::{sync::OnceLock, time::Duration};

use windows::{
    core::PCWSTR,
    Win32::{
        Foundation::{
            CloseHandle, GetLastError, SetLastError, BOOL, HANDLE, HWND, WAIT_OBJECT_0,
            WAIT_TIMEOUT, WIN32_ERROR,
        },
        System::Threading::{CreateEventW, SetEvent, INFINITE},
        UI::WindowsAndMessaging::{
            DestroyWindow, DispatchMessageW, MoveWindow, MsgWaitForMultipleObjectsEx,
            PeekMessageW, SetWindowPos, ShowWindow, TranslateMessage, GWL_STYLE, MSG,
            MWMO_INPUTAVAILABLE, PM_NOREMOVE, PM_REMOVE, QS_ALLINPUT, SHOW_WINDOW_CMD,
            SWP_FRAMECHANGED, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER, WM_QUIT,
            WM_USER,
        },
    },
};

use super::{DestroyHook, NativeWindow, Platform, Pumped, Rect, Wake, WindowOptions};
use crate::error::{Result, WmError};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn native_error(function: &'static str, e: &windows::core::Error) -> WmError {
    // HRESULT.0 is i32; reinterpret bits as u32 for display purposes.
    WmError::Native {
        function,
        code: e.code().0 as u32,
    }
}

/// Capture the current Win32 last-error code and wrap it in a `WmError`.
///
/// Call immediately after a Win32 function that signals failure; `GetLastError`
/// reads thread-local state that can be overwritten by any subsequent API call.
fn last_error(function: &'static str) -> WmError {
    // SAFETY: GetLastError reads thread-local state set by the last Win32 call.
    let code = unsafe { GetLastError() };
    WmError::Native {
        function,
        code: code.0,
    }
}

// ── Wake event ────────────────────────────────────────────────────────────────

struct WakeEvent(HANDLE);

// SAFETY: an event handle is a process-wide kernel object reference.
// SetEvent and waits on it are thread-safe; the handle is closed only in Drop.
unsafe impl Send for WakeEvent {}
// SAFETY: see above; `&WakeEvent` only ever reaches SetEvent and waits.
unsafe impl Sync for WakeEvent {}

impl Drop for WakeEvent {
    fn drop(&mut self) {
        // SAFETY: self.0 came from a successful CreateEventW and is closed once.
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

// ── Win32Platform ─────────────────────────────────────────────────────────────

/// Real Win32 windows, driven from the manager's UI thread.
pub struct Win32Platform {
    wake_event: WakeEvent,
    destroy_hook: OnceLock<DestroyHook>,
}

impl Win32Platform {
    pub fn new() -> Result<Self> {
        // SAFETY: default security, auto-reset, initially non-signalled,
        // unnamed.  The handle is owned by `WakeEvent`.
        let event = unsafe { CreateEventW(None, BOOL::from(false), BOOL::from(false), PCWSTR::null()) }
            .map_err(|e| native_error("CreateEventW", &e))?;
        Ok(Self {
            wake_event: WakeEvent(event),
            destroy_hook: OnceLock::new(),
        })
    }
}

impl Platform for Win32Platform {
    fn init_thread(&self) -> Result<()> {
        dpi::init_thread();
        // Peeking forces the system to create this thread's message queue, so
        // messages posted before the first wait are not lost.
        let mut msg = MSG::default();
        // SAFETY: &mut msg is a valid MSG pointer; PM_NOREMOVE leaves the
        // queue untouched.
        unsafe {
            let _ = PeekMessageW(&mut msg, HWND::default(), WM_USER, WM_USER, PM_NOREMOVE);
        }
        Ok(())
    }

    fn set_destroy_hook(&self, hook: DestroyHook) {
        if self.destroy_hook.set(hook).is_err() {
            log::warn!("destroy hook already installed; is this platform shared between managers?");
        }
    }

    fn register_class(&self, class_name: &str) -> Result<()> {
        window::register_class(class_name)
    }

    fn create_window(
        &self,
        class_name: &str,
        options: &WindowOptions,
        rect: Rect,
    ) -> Result<NativeWindow> {
        window::create(class_name, options, rect, self.destroy_hook.get())
    }

    fn destroy_window(&self, target: NativeWindow) -> Result<()> {
        let hwnd = window::live(target)?;
        // SAFETY: hwnd is a live window owned by this (the creating) thread.
        unsafe { DestroyWindow(hwnd) }.map_err(|e| native_error("DestroyWindow", &e))
    }

    fn move_window(&self, target: NativeWindow, rect: Rect, repaint: bool) -> Result<()> {
        let hwnd = window::live(target)?;
        // SAFETY: hwnd is a live window owned by this thread.
        unsafe {
            MoveWindow(
                hwnd,
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                BOOL::from(repaint),
            )
        }
        .map_err(|e| native_error("MoveWindow", &e))
    }

    fn show_window(&self, target: NativeWindow, command: i32) -> Result<bool> {
        let hwnd = window::live(target)?;
        // SAFETY: hwnd is a live window; ShowWindow validates the command.
        let was_visible = unsafe { ShowWindow(hwnd, SHOW_WINDOW_CMD(command)) };
        Ok(was_visible.as_bool())
    }

    fn set_window_style(&self, target: NativeWindow, style: u32) -> Result<bool> {
        let hwnd = window::live(target)?;
        // SAFETY: hwnd is a live window owned by this thread.  The last error
        // is cleared first because a previous style of 0 is a valid result.
        let ok = unsafe {
            SetLastError(WIN32_ERROR(0));
            #[cfg(target_pointer_width = "64")]
            let previous = windows::Win32::UI::WindowsAndMessaging::SetWindowLongPtrW(
                hwnd,
                GWL_STYLE,
                style as isize,
            ) as i64;
            #[cfg(not(target_pointer_width = "64"))]
            let previous = windows::Win32::UI::WindowsAndMessaging::SetWindowLongW(
                hwnd,
                GWL_STYLE,
                style as i32,
            ) as i64;
            previous != 0 || GetLastError() == WIN32_ERROR(0)
        };
        if ok {
            // Style changes only take effect on the frame after SWP_FRAMECHANGED.
            // SAFETY: hwnd is live; the flags leave position, size and z-order alone.
            unsafe {
                let _ = SetWindowPos(
                    hwnd,
                    HWND::default(),
                    0,
                    0,
                    0,
                    0,
                    SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE | SWP_FRAMECHANGED,
                );
            }
        }
        Ok(ok)
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Wake> {
        let millis = timeout.map_or(INFINITE, |t| {
            u32::try_from(t.as_millis()).unwrap_or(INFINITE - 1)
        });
        let handles = [self.wake_event.0];
        // SAFETY: `handles` holds one valid event handle for the duration of
        // the call.  MWMO_INPUTAVAILABLE returns immediately if input is
        // already queued, even if it was seen by an earlier peek.
        let result = unsafe {
            MsgWaitForMultipleObjectsEx(Some(&handles), millis, QS_ALLINPUT, MWMO_INPUTAVAILABLE)
        };
        // WAIT_OBJECT_0 + n means handle n; n == handles.len() means input.
        if result == WAIT_OBJECT_0 {
            Ok(Wake::Signaled)
        } else if result.0 == WAIT_OBJECT_0.0 + 1 {
            Ok(Wake::Message)
        } else if result == WAIT_TIMEOUT {
            Ok(Wake::TimedOut)
        } else {
            Err(last_error("MsgWaitForMultipleObjectsEx"))
        }
    }

    fn pump_message(&self) -> Result<Pumped> {
        let mut msg = MSG::default();
        // SAFETY: &mut msg is a valid MSG pointer; HWND::default() retrieves
        // messages for all windows on this thread; 0,0 filter accepts all.
        let got = unsafe { PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE) };
        if !got.as_bool() {
            return Ok(Pumped::Empty);
        }
        if msg.message == WM_QUIT {
            return Ok(Pumped::Quit);
        }
        // SAFETY: msg was populated by a successful PeekMessageW call.
        // TranslateMessage return value (whether it generated WM_CHAR)
        // and DispatchMessageW's LRESULT are intentionally unused.
        unsafe {
            let _ = TranslateMessage(&msg);
            let _ = DispatchMessageW(&msg);
        }
        Ok(Pumped::Dispatched)
    }

    fn wake(&self) {
        // SAFETY: the event handle is valid for the lifetime of `self`.
        if let Err(e) = unsafe { SetEvent(self.wake_event.0) } {
            log::error!("SetEvent failed; the UI thread may not notice new work: {e}");
        }
    }
}
