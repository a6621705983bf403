// ── Win32 window class and window procedure ───────────────────────────────────
//
// Responsibilities in this file (unsafe confined here):
//   • Register the shared window class.
//   • Create top-level windows of that class.
//   • Route every message to the window's `MessageHandler`, containing panics.
//   • Report `WM_NCDESTROY` to the manager, however the window was destroyed.
//
// Handlers and destroy hooks live in a thread-local table keyed by HWND.  Windows only ever
// call a window procedure on the thread that created the window, which is
// the UI thread, so the table needs no locking.

#![allow(unsafe_code)]

use std::{cell::RefCell, collections::HashMap, ffi::c_void, sync::Arc};

use windows::{
    core::PCWSTR,
    Win32::{
        Foundation::{
            GetLastError, ERROR_CLASS_ALREADY_EXISTS, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM,
        },
        Graphics::Gdi::{GetStockObject, HBRUSH, WHITE_BRUSH},
        System::LibraryLoader::GetModuleHandleW,
        UI::WindowsAndMessaging::{
            CreateWindowExW, DefWindowProcW, IsWindow, LoadCursorW, RegisterClassExW, ShowWindow,
            CS_HREDRAW, CS_VREDRAW, HMENU, IDC_ARROW, SW_SHOW, WINDOW_EX_STYLE, WINDOW_STYLE,
            WM_NCDESTROY, WNDCLASSEXW, WS_OVERLAPPEDWINDOW,
        },
    },
};

use super::{native_error, wide};
use crate::{
    error::{Result, WmError},
    platform::{
        report_destroyed, route_message, DestroyHook, MessageHandler, NativeWindow, Rect,
        WindowMessage, WindowOptions,
    },
};

#[derive(Clone)]
struct Entry {
    handler: Option<MessageHandler>,
    on_destroyed: Option<DestroyHook>,
}

thread_local! {
    static WINDOWS: RefCell<HashMap<isize, Entry>> = RefCell::new(HashMap::new());
}

pub(super) fn hwnd(window: NativeWindow) -> HWND {
    HWND(window.raw() as *mut c_void)
}

fn module_instance() -> Result<HINSTANCE> {
    // SAFETY: GetModuleHandleW(None) returns the .exe's own HMODULE, which is
    // always valid for the process lifetime.
    let hmodule = unsafe { GetModuleHandleW(None) }
        .map_err(|e| native_error("GetModuleHandleW", &e))?;
    // HINSTANCE and HMODULE carry the same value on Windows.
    Ok(HINSTANCE(hmodule.0))
}

// ── Window class registration ─────────────────────────────────────────────────

pub(super) fn register_class(class_name: &str) -> Result<()> {
    let hinstance = module_instance()?;
    let class = wide(class_name);

    // SAFETY: LoadCursorW with IDC_ARROW loads a built-in system resource.
    let cursor = unsafe { LoadCursorW(None, IDC_ARROW) }
        .map_err(|e| native_error("LoadCursorW", &e))?;

    // SAFETY: GetStockObject with WHITE_BRUSH always returns a valid HGDIOBJ.
    // Casting to HBRUSH is correct: stock brush objects are compatible types.
    let bg_brush = unsafe { HBRUSH(GetStockObject(WHITE_BRUSH).0) };

    let wndclass = WNDCLASSEXW {
        // WNDCLASSEXW is ~72 bytes; the cast to u32 is always lossless.
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wnd_proc),
        hInstance: hinstance,
        hCursor: cursor,
        hbrBackground: bg_brush,
        lpszClassName: PCWSTR(class.as_ptr()),
        ..Default::default()
    };

    // SAFETY: wndclass is fully initialised; `class` is a null-terminated
    // UTF-16 string that outlives the call (the system copies it).
    let atom = unsafe { RegisterClassExW(&wndclass) };
    if atom == 0 {
        // SAFETY: reads the thread-local error set by RegisterClassExW.
        let code = unsafe { GetLastError() };
        // Another manager in this process registered it first; same procedure.
        if code == ERROR_CLASS_ALREADY_EXISTS {
            return Ok(());
        }
        return Err(WmError::Creation {
            function: "RegisterClassExW",
            code: code.0,
        });
    }
    Ok(())
}

// ── Window creation ───────────────────────────────────────────────────────────

pub(super) fn create(
    class_name: &str,
    options: &WindowOptions,
    rect: Rect,
    on_destroyed: Option<&DestroyHook>,
) -> Result<NativeWindow> {
    let hinstance = module_instance()?;
    let class = wide(class_name);
    let title = wide(&options.title);
    let style = if options.style == 0 {
        WS_OVERLAPPEDWINDOW
    } else {
        WINDOW_STYLE(options.style)
    };

    // SAFETY: the class was registered on this thread's module; both strings
    // are null-terminated UTF-16 buffers alive for the duration of the call.
    // Null parent and menu create an unowned top-level window.
    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE(0),
            PCWSTR(class.as_ptr()),
            PCWSTR(title.as_ptr()),
            style,
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            HWND::default(),
            HMENU::default(),
            hinstance,
            None,
        )
    }
    .map_err(|e| WmError::Creation {
        function: "CreateWindowExW",
        code: e.code().0 as u32,
    })?;

    let window = NativeWindow::from_raw(hwnd.0 as isize);
    let entry = Entry {
        handler: options.handler.clone(),
        on_destroyed: on_destroyed.map(Arc::clone),
    };
    WINDOWS.with(|map| map.borrow_mut().insert(window.raw(), entry));
    if options.visible {
        // SAFETY: hwnd was just returned by CreateWindowExW and is valid.
        // The previous-visibility BOOL is meaningless for a new window.
        unsafe {
            let _ = ShowWindow(hwnd, SW_SHOW);
        }
    }
    Ok(window)
}

/// The HWND for `window`, or `InvalidWindow` if it no longer names a window.
pub(super) fn live(window: NativeWindow) -> Result<HWND> {
    let handle = hwnd(window);
    // SAFETY: IsWindow accepts any value, including stale handles.
    if unsafe { IsWindow(handle) }.as_bool() {
        Ok(handle)
    } else {
        Err(WmError::InvalidWindow)
    }
}

// ── Window procedure ──────────────────────────────────────────────────────────

// SAFETY: wnd_proc is registered as lpfnWndProc in WNDCLASSEXW.
// Windows guarantees that hwnd, msg, wparam, and lparam are valid for the
// lifetime of this call; we must not store hwnd beyond the message handler.
unsafe extern "system" fn wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let key = hwnd.0 as isize;

    // Clone the entry out of the table before calling into it: the handler
    // may create or destroy windows, re-entering this procedure.
    let entry = WINDOWS.with(|map| {
        let mut map = map.borrow_mut();
        if msg == WM_NCDESTROY {
            map.remove(&key)
        } else {
            map.get(&key).cloned()
        }
    });
    let Some(entry) = entry else {
        // SAFETY: hwnd and message parameters come from Windows and are valid.
        return DefWindowProcW(hwnd, msg, wparam, lparam);
    };

    let window = NativeWindow::from_raw(key);
    let handled = entry.handler.as_ref().and_then(|handler| {
        let message = WindowMessage {
            window,
            id: msg,
            wparam: wparam.0,
            lparam: lparam.0,
        };
        route_message(handler, &message)
    });

    // Last message the window receives; the handle must not be used again.
    if msg == WM_NCDESTROY {
        if let Some(hook) = &entry.on_destroyed {
            report_destroyed(hook, window);
        }
    }

    if let Some(result) = handled {
        return LRESULT(result);
    }

    // Default processing for all unhandled messages.
    // SAFETY: hwnd and message parameters are provided by Windows and valid for this call.
    DefWindowProcW(hwnd, msg, wparam, lparam)
}
