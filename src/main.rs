// Release builds run as a GUI application (no console window).
// Debug builds keep the console so that log output is visible.
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::time::Duration;

use winpump::{ManagerConfig, Result, ShowCommand, WindowManager, WindowOptions};

/// Message posted by the demo handler to itself once it is done.
const WM_CLOSE: u32 = 0x0010;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("winpump failed: {e}");
        std::process::exit(1);
    }
}

/// Open one window, walk it through its lifecycle, and shut down cleanly.
///
/// Usage: `winpump [config.json]`
fn run() -> Result<()> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => ManagerConfig::from_file(path)?,
        None => ManagerConfig::default(),
    };

    let manager = WindowManager::with_native_platform(config)?;
    let run = manager.start()?;

    let window = manager.create_window(
        WindowOptions::new("winpump demo")
            .visible(true)
            .with_handler(|message| {
                if message.id == WM_CLOSE {
                    log::info!("close requested for window {:#x}", message.window.raw());
                }
                None
            }),
    )?;

    window.move_to(0, 0, 100, 100, true)?;
    window.show(ShowCommand::SHOW_NORMAL)?;
    window.move_to(100, 100, 100, 100, true)?;
    window.show(ShowCommand::HIDE)?;
    let styled = window.set_window_style(0)?;
    log::info!("set_window_style reported {styled}");

    let answer = window.dispatch(|| 999)?;
    let nested = {
        let inner = window.clone();
        window.dispatch(move || inner.dispatch(|| 888))??
    };
    log::info!("dispatch returned {answer}, nested dispatch returned {nested}");

    window.close()?;
    match window.show(ShowCommand::SHOW_NORMAL) {
        Err(e) => log::info!("show after close failed as expected: {e}"),
        Ok(_) => log::warn!("show after close unexpectedly succeeded"),
    }

    manager.shutdown_token().cancel();
    match run.wait_timeout(Duration::from_secs(5)) {
        Some(result) => result,
        None => {
            log::warn!("UI thread did not stop within 5 s");
            Ok(())
        }
    }
}
