// ── Safety policy ────────────────────────────────────────────────────────────
// Unsafe code is forbidden everywhere except `platform::win32` (Win32 FFI).
// Each unsafe block in that module MUST carry a `// SAFETY:` comment.
#![deny(unsafe_code)]

//! A window manager that owns one dedicated UI thread.
//!
//! Any thread may hand a computation to the UI thread and block for its
//! result; a call made *on* the UI thread (for example from inside a window
//! procedure) runs inline instead of deadlocking on itself.
//!
//! ```no_run
//! use winpump::{ManagerConfig, WindowManager, WindowOptions};
//!
//! let manager = WindowManager::with_native_platform(ManagerConfig::default())?;
//! let run = manager.start()?;
//! let window = manager.create_window(WindowOptions::new("hello").visible(true))?;
//! window.move_to(0, 0, 640, 480, true)?;
//! assert_eq!(window.dispatch(|| 999)?, 999);
//! window.close()?;
//! manager.shutdown_token().cancel();
//! run.wait()?;
//! # Ok::<(), winpump::WmError>(())
//! ```

pub mod config;
mod dispatch;
pub mod error;
pub mod manager;
pub mod platform;
mod runner;
pub mod window;

pub use config::ManagerConfig;
pub use dispatch::RunnerState;
pub use error::{Result, WmError};
pub use manager::{RunHandle, ShutdownToken, WindowManager};
pub use platform::{MessageHandler, NativeWindow, Platform, Rect, WindowMessage, WindowOptions};
pub use window::{ShowCommand, WindowHandle};
