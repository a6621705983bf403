#![allow(unsafe_code)]

use windows::Win32::UI::HiDpi::{
    SetThreadDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
};

/// Opt the calling thread into Per-Monitor v2 DPI awareness.
/// MUST be called before any window is created on the calling thread.
pub(crate) fn init_thread() {
    // SAFETY: Takes a predefined context constant and only affects the calling
    // thread.  A null return (unsupported OS) leaves the thread DPI-unaware,
    // which is harmless for the manager's purposes.
    let previous = unsafe { SetThreadDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) };
    if previous.0.is_null() {
        log::debug!("per-monitor DPI awareness unavailable on this thread");
    }
}
