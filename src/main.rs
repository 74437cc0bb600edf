//! rodder: background daemon for a two-key rod macro
//!
//! This daemon runs as a LaunchAgent and provides:
//! - A global keyboard hook via CGEventTap
//! - An explicit Disabled / Armed / Active state machine
//! - Synthetic key and mouse input when the trigger key is pressed
//! - A control socket for enabling, rebinding and saving settings
//!
//! While enabled, pressing the trigger key taps the rod key and clicks the
//! right mouse button; releasing it optionally taps the sword key again.

mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod settings;
mod state;
mod synth;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::StateEvent;
use crate::hotkey::HookListener;
use crate::ipc::{Control, Server};
use crate::lifecycle::ShutdownSignal;
use crate::settings::SettingsStore;
use crate::state::{Bindings, MacroConfig, MacroEngine};
use crate::synth::InputSynthesizer;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging must never block the hook thread
    let (log_writer, _log_guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(log_writer)
        .with_thread_names(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "rodder starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.settings_path, ?config.socket_path, "configuration loaded");

    let store = SettingsStore::new(&config.settings_path);
    let bindings = store
        .load()
        .map(|settings| Bindings::from_settings(&settings))
        .unwrap_or_default();

    let mut shutdown = ShutdownSignal::new()?;

    // Engine -> control runtime (UI-side notifications)
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(64);

    let engine = Arc::new(MacroEngine::new(
        Arc::new(MacroConfig::new(bindings)),
        InputSynthesizer::new(synth::platform_backend()),
        event_tx.clone(),
    ));

    // Start the hook (runs on a dedicated thread)
    let hook = Arc::new(HookListener::new(engine.clone()));
    let hook_error = match hook.start() {
        Ok(()) => {
            info!("hook listener started");
            None
        }
        Err(e) => {
            error!(error = %e, "failed to start hook listener");
            warn!("continuing without hook - macro stays disabled until start_hook succeeds");
            Some(e.to_string())
        }
    };

    let control = Arc::new(Control::new(
        engine,
        hook,
        store,
        event_tx.clone(),
        hook_error,
    ));
    let server = Server::new(&config.socket_path, control.clone())?;

    let ui_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the control server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "control server error");
            }
        }

        // Drain engine notifications and ring the toggle chime on this runtime
        _ = events::drain(ui_rx, events::platform_chime()) => {
            info!("state event handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    control.shutdown().await;
    server.shutdown().await;

    info!("rodder stopped");

    Ok(())
}
