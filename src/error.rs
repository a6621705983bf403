// ── Central error type ────────────────────────────────────────────────────────
//
// All fallible operations in winpump return `error::Result<T>`.  A panic
// inside a dispatched computation is not an error value: it is resumed on the
// calling thread with its original payload (see `dispatch`).

use std::any::Any;

use thiserror::Error;

/// Every error that the window manager can produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WmError {
    /// Native window-class registration or window creation failed.
    #[error("{function} failed (error {code:#010x})")]
    Creation {
        /// The name of the failing function, for display purposes.
        function: &'static str,
        /// The raw native error code (`GetLastError()` value) or HRESULT.
        code: u32,
    },

    /// Any other native call reported a failure.
    #[error("{function} failed (error {code:#010x})")]
    Native {
        /// The name of the failing function, for display purposes.
        function: &'static str,
        /// The raw native error code.
        code: u32,
    },

    /// The window was closed (or destroyed natively); the handle is stale.
    #[error("invalid window: the handle has been closed")]
    InvalidWindow,

    /// The UI thread has been asked to stop or has already stopped.
    #[error("window manager stopped")]
    Stopped,

    /// `start` was called more than once on the same manager.
    #[error("window manager already started")]
    AlreadyStarted,

    /// The manager has not been started yet.
    #[error("window manager is not running")]
    NotRunning,

    /// A panic escaped the pump loop itself (not a dispatched computation).
    #[error("UI thread panicked: {0}")]
    PumpPanicked(String),

    /// The configuration file could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for WmError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

// Convert a windows-crate error (HRESULT) directly into a WmError so that
// `?` can be used on `windows::core::Result<T>` throughout the Win32 platform.
#[cfg(windows)]
impl From<windows::core::Error> for WmError {
    fn from(e: windows::core::Error) -> Self {
        // HRESULT.0 is i32; reinterpret bits as u32 for display purposes.
        Self::Native {
            function: "windows",
            code: e.code().0 as u32,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WmError>;

/// Best-effort text of a panic payload, for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_error_display() {
        let e = WmError::Creation {
            function: "CreateWindowExW",
            code: 0x57,
        };
        assert_eq!(e.to_string(), "CreateWindowExW failed (error 0x00000057)");
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let a: Box<dyn Any + Send> = Box::new("boom");
        let b: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let c: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(a.as_ref()), "boom");
        assert_eq!(panic_message(b.as_ref()), "bang");
        assert_eq!(panic_message(c.as_ref()), "non-string panic payload");
    }

    #[test]
    fn json_error_maps_to_config() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        assert!(matches!(WmError::from(err), WmError::Config(_)));
    }
}
