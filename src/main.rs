//! Pushtalk entry point: wires config, hotkey, capture, transcription,
//! tray, and the session controller together.

#![allow(clippy::print_stdout, clippy::print_stderr)] // Startup messages before logging is up

use anyhow::Result;
use global_hotkey::GlobalHotKeyEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tray_icon::menu::MenuEvent;

use pushtalk::audio::MicCapture;
use pushtalk::config::Config;
use pushtalk::input::HotkeyManager;
use pushtalk::instance::InstanceGuard;
use pushtalk::output::{ChannelSink, SinkEvent, TextInjector};
use pushtalk::session::{ControlEvent, SessionController, StatusEvent};
use pushtalk::telemetry;
use pushtalk::transcription::{ensure_model_downloaded, WhisperTranscriber};
use pushtalk::tray::StatusTray;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    telemetry::init(config.telemetry.enabled, &config.telemetry.log_path)?;

    let Some(_instance) = InstanceGuard::acquire()? else {
        eprintln!("Pushtalk is already running. Exiting.");
        return Ok(());
    };

    tracing::info!(
        hotkey = %config.hotkey.key,
        model = %config.model.name,
        "pushtalk starting"
    );

    // Fetch the model before the engine ever needs it.
    let model_path = config.model.model_path()?;
    ensure_model_downloaded(&config.model.name, &model_path)?;

    let engine = Arc::new(WhisperTranscriber::new(
        &model_path,
        config.model.threads,
        config.model.beam_size,
        config.model.language.clone(),
    )?);

    if config.model.preload {
        // Warm the model off the startup path so the hotkey is live at once.
        let warm = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = warm.preload() {
                tracing::error!("model preload failed: {}", e);
            } else {
                tracing::info!("model ready");
            }
        });
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ControlEvent>();
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<SinkEvent>();

    let capture = MicCapture::new(&config.audio, events_tx.clone());
    let mut controller = SessionController::new(
        Box::new(capture),
        engine,
        Arc::new(ChannelSink::new(sink_tx)),
        events_tx.clone(),
        &config.session,
    );

    let hotkeys = HotkeyManager::new(&config.hotkey, events_tx.clone())?;
    let mut tray = StatusTray::new(&config.hotkey.key)?;
    let mut injector = TextInjector::new()?;

    tracing::info!("event loop starting (press Ctrl+C to exit)");
    println!("Pushtalk is running. Hold {} to dictate.", config.hotkey.key);

    let hotkey_receiver = GlobalHotKeyEvent::receiver();
    let menu_receiver = MenuEvent::receiver();

    // The controller loop runs here on the main thread: it owns the
    // capture handle, and only its transcription tasks are spawned.
    'main: loop {
        while let Ok(event) = hotkey_receiver.try_recv() {
            hotkeys.handle_event(&event);
        }

        while let Ok(event) = menu_receiver.try_recv() {
            if event.id() == tray.quit_id() {
                tracing::info!("quit requested from tray");
                break 'main;
            }
            if event.id() == tray.open_config_id() {
                open_config_file();
            }
        }

        while let Ok(event) = events_rx.try_recv() {
            controller.handle_event(event);
        }

        while let Ok(event) = sink_rx.try_recv() {
            match event {
                SinkEvent::Text(text) => {
                    if let Err(e) = injector.inject(&text) {
                        tracing::error!("text injection failed: {}", e);
                    }
                }
                SinkEvent::Status(status) => {
                    if let StatusEvent::Error(reason) = &status {
                        tracing::warn!("status error: {}", reason);
                    }
                    if let Err(e) = tray.set_status(&status) {
                        tracing::error!("tray update failed: {}", e);
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break 'main;
            }
            () = tokio::time::sleep(tokio::time::Duration::from_millis(10)) => {
                // Poll interval (10ms to avoid busy-waiting)
            }
        }
    }

    controller.handle_event(ControlEvent::Shutdown);
    tracing::info!("pushtalk stopped");
    Ok(())
}

/// Open the config file with the platform default handler.
fn open_config_file() {
    let Ok(path) = Config::config_path() else {
        return;
    };
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };

    if let Err(e) = std::process::Command::new(opener).arg(&path).spawn() {
        tracing::error!("failed to open config file: {}", e);
    }
}
