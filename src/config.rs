// ── Manager configuration ─────────────────────────────────────────────────────
//
// Optional JSON file read at startup.  Every field has a default, so an empty
// object (or a file written by an older version) parses cleanly.
// No `unsafe`; pure safe Rust plus serde_json.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WmError};

/// Settings for one `WindowManager` instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Name given to the dedicated UI thread (shows up in debuggers and panics).
    pub thread_name: String,
    /// Native window-class name registered on first window creation.
    pub class_name: String,
    /// Title used when `WindowOptions` leaves it empty.
    pub default_title: String,
    /// Width used when `WindowOptions` carries no rectangle.
    pub default_width: i32,
    /// Height used when `WindowOptions` carries no rectangle.
    pub default_height: i32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            thread_name: "winpump-ui".to_owned(),
            class_name: "WinpumpWindow".to_owned(),
            default_title: "winpump".to_owned(),
            default_width: 960,
            default_height: 640,
        }
    }
}

impl ManagerConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| WmError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.class_name.is_empty() {
            return Err(WmError::Config("class_name must not be empty".to_owned()));
        }
        if self.default_width <= 0 || self.default_height <= 0 {
            return Err(WmError::Config(format!(
                "default size must be positive, got {}x{}",
                self.default_width, self.default_height
            )));
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
