//! Unix domain socket server for the control channel
//!
//! Stands in for the operator's editing surface: clients switch the macro
//! on and off, replace bindings, persist settings and retry the hook. All
//! of it runs on the control runtime, never on the hook thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::StateEvent;
use crate::hotkey::keys::names_for;
use crate::hotkey::{HookError, HookListener};
use crate::settings::SettingsStore;
use crate::state::{Bindings, MacroEngine};

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Largest accepted message body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Everything the control channel acts on
pub struct Control {
    engine: Arc<MacroEngine>,
    hook: Arc<HookListener>,
    store: SettingsStore,
    event_tx: broadcast::Sender<StateEvent>,
    /// Why the last hook registration failed
    hook_error: RwLock<Option<String>>,
    start_time: Instant,
}

impl Control {
    pub fn new(
        engine: Arc<MacroEngine>,
        hook: Arc<HookListener>,
        store: SettingsStore,
        event_tx: broadcast::Sender<StateEvent>,
        hook_error: Option<String>,
    ) -> Self {
        Self {
            engine,
            hook,
            store,
            event_tx,
            hook_error: RwLock::new(hook_error),
            start_time: Instant::now(),
        }
    }

    async fn status(&self) -> DaemonStatus {
        DaemonStatus {
            mode: self.engine.state().into(),
            hook_registered: self.hook.is_running(),
            hook_error: self.hook_error.read().await.clone(),
            settings: self.engine.bindings().to_settings(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            ..DaemonStatus::default()
        }
    }

    async fn start_hook(&self) -> Response {
        let hook = Arc::clone(&self.hook);
        let outcome = match tokio::task::spawn_blocking(move || hook.start()).await {
            Ok(outcome) => outcome,
            Err(e) => Err(HookError::ThreadSpawn(e.to_string())),
        };

        match outcome {
            Ok(()) => {
                info!("hook registered via control channel");
                *self.hook_error.write().await = None;
                Response::HookStarted
            }
            Err(HookError::AlreadyRunning) => Response::HookStarted,
            Err(e) => {
                warn!(error = %e, "hook registration retry failed");
                *self.hook_error.write().await = Some(e.to_string());
                Response::error("hook_unavailable", e.to_string())
            }
        }
    }

    /// Stop the hook and persist the bindings in effect
    pub async fn shutdown(&self) {
        // Joining the hook thread can take up to one run-loop slice
        let hook = Arc::clone(&self.hook);
        if let Err(e) = tokio::task::spawn_blocking(move || hook.stop()).await {
            error!(error = %e, "hook listener stop task failed");
        }

        if let Err(e) = self.save_current() {
            error!(error = %e, "failed to save settings on shutdown");
        }
    }

    fn save_current(&self) -> Result<(), crate::settings::SettingsSaveError> {
        self.store.save(&self.engine.bindings().to_settings())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(&self, request: Request) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => (Response::Status(self.status().await), false),

            Request::SetEnabled { enabled } => {
                if enabled && !self.hook.is_running() {
                    let message = "keyboard hook is not registered; send start_hook first";
                    return (Response::error("hook_unavailable", message), false);
                }
                self.engine.set_enabled(enabled);
                let enabled = self.engine.is_enabled();
                (Response::Enabled { enabled }, false)
            }

            Request::Rebind { settings } => {
                let bindings = Bindings::from_settings(&settings.normalized());
                self.engine.rebind(bindings);

                match self.save_current() {
                    Ok(()) => (
                        Response::Rebound {
                            settings: bindings.to_settings(),
                        },
                        false,
                    ),
                    Err(e) => {
                        error!(error = %e, "bindings applied but not saved");
                        (Response::error("save_failed", e.to_string()), false)
                    }
                }
            }

            Request::SaveSettings => match self.save_current() {
                Ok(()) => (Response::Saved, false),
                Err(e) => {
                    error!(error = %e, "failed to save settings");
                    (Response::error("save_failed", e.to_string()), false)
                }
            },

            Request::StartHook => (self.start_hook().await, false),

            Request::ListKeys { role } => {
                let names = names_for(role).into_iter().map(str::to_owned).collect();
                (Response::Keys { role, names }, false)
            }

            Request::Subscribe => (Response::Subscribed, true),
        }
    }
}

/// Control channel server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    control: Arc<Control>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the control socket
    pub fn new(socket_path: &Path, control: Arc<Control>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "control socket listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            control,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let control = Arc::clone(&self.control);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, control) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(mut stream: UnixStream, control: Arc<Control>) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            let mut msg_buf = vec![0u8; len];
            stream.read_exact(&mut msg_buf).await?;

            let request: Request = match serde_json::from_slice(&msg_buf) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "malformed request");
                    let response = Response::error("bad_request", e.to_string());
                    Self::send_message(&mut stream, &response).await?;
                    continue;
                }
            };

            debug!(?request, "received request");

            let (response, subscribe) = control.process_request(request).await;
            // Attached before the reply so every later event reaches the client
            let events = subscribe.then(|| control.event_tx.subscribe());
            Self::send_message(&mut stream, &response).await?;

            if let Some(events) = events {
                debug!("client subscribed to notifications");
                // The connection is push-only from here on
                return Self::push_events(stream, events).await;
            }
        }
    }

    /// Forward state events to a subscribed client until either side closes
    async fn push_events(
        mut stream: UnixStream,
        mut events: broadcast::Receiver<StateEvent>,
    ) -> Result<()> {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let notification = Notification::StateEvent { event };
                    Self::send_message(&mut stream, &notification).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        stream.write_all(&msg_len).await?;
        stream.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("control socket shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::KeyRole;
    use crate::ipc::protocol::Mode;
    use crate::settings::Settings;
    use crate::state::{MacroConfig, State};
    use crate::synth::testing::RecordingBackend;
    use crate::synth::InputSynthesizer;

    fn control(dir: &Path) -> Arc<Control> {
        let (event_tx, _) = broadcast::channel(16);
        let engine = Arc::new(MacroEngine::new(
            Arc::new(MacroConfig::default()),
            InputSynthesizer::new(Arc::new(RecordingBackend::default())),
            event_tx.clone(),
        ));
        let hook = Arc::new(HookListener::new(engine.clone()));
        let store = SettingsStore::new(dir.join("settings.json"));
        Arc::new(Control::new(engine, hook, store, event_tx, None))
    }

    fn settings() -> Settings {
        Settings {
            primary_key: Some("S".into()),
            secondary_key: Some("None".into()),
            trigger_key: Some("LShift".into()),
            toggle_key: Some("LCtrl".into()),
            return_to_primary: true,
        }
    }

    async fn roundtrip(stream: &mut UnixStream, request: &Request) -> Response {
        tokio_test::assert_ok!(Server::send_message(stream, request).await);
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let control = control(dir.path());

        let (response, subscribe) = control.process_request(Request::Ping).await;
        assert!(matches!(response, Response::Pong));
        assert!(!subscribe);

        match control.process_request(Request::GetStatus).await.0 {
            Response::Status(status) => {
                assert_eq!(status.mode, Mode::Disabled);
                assert!(!status.hook_registered);
                assert_eq!(status.settings, Settings::default());
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_keys_for_role() {
        let dir = tempfile::tempdir().unwrap();
        let control = control(dir.path());

        let (response, _) = control
            .process_request(Request::ListKeys {
                role: KeyRole::Toggle,
            })
            .await;

        match response {
            Response::Keys { role, names } => {
                assert_eq!(role, KeyRole::Toggle);
                assert_eq!(names.first().map(String::as_str), Some("None"));
                assert!(names.iter().any(|name| name == "`(GRAVE)"));
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rebind_applies_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let control = control(dir.path());

        let (response, _) = control
            .process_request(Request::Rebind {
                settings: settings(),
            })
            .await;

        match response {
            Response::Rebound { settings } => {
                assert_eq!(settings.secondary_key, None);
                assert_eq!(settings.trigger_key.as_deref(), Some("LShift"));
            }
            other => panic!("unexpected response {:?}", other),
        }

        assert_eq!(control.engine.bindings().trigger.symbolic_name(), "LShift");
        let saved = control.store.load().unwrap();
        assert_eq!(saved, settings().normalized());
    }

    #[tokio::test]
    async fn test_enable_refused_without_hook() {
        let dir = tempfile::tempdir().unwrap();
        let control = control(dir.path());

        let (response, _) = control
            .process_request(Request::SetEnabled { enabled: true })
            .await;

        assert!(matches!(response, Response::Error { ref code, .. } if code == "hook_unavailable"));
        assert_eq!(control.engine.state(), State::Disabled);

        // Disabling is always allowed
        let (response, _) = control
            .process_request(Request::SetEnabled { enabled: false })
            .await;
        assert!(matches!(response, Response::Enabled { enabled: false }));
    }

    #[cfg(not(target_os = "macos"))]
    #[tokio::test]
    async fn test_start_hook_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let control = control(dir.path());

        let (response, _) = control.process_request(Request::StartHook).await;
        assert!(matches!(response, Response::Error { ref code, .. } if code == "hook_unavailable"));

        let status = control.status().await;
        assert!(status.hook_error.is_some());
    }

    #[tokio::test]
    async fn test_save_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let (event_tx, _) = broadcast::channel(16);
        let engine = Arc::new(MacroEngine::new(
            Arc::new(MacroConfig::default()),
            InputSynthesizer::new(Arc::new(RecordingBackend::default())),
            event_tx.clone(),
        ));
        let hook = Arc::new(HookListener::new(engine.clone()));
        // A directory in place of the file makes every write fail
        let control = Control::new(engine, hook, SettingsStore::new(dir.path()), event_tx, None);

        let (response, _) = control.process_request(Request::SaveSettings).await;
        assert!(matches!(response, Response::Error { ref code, .. } if code == "save_failed"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_shutdown_stops_hook_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let control = control(dir.path());
        control.engine.rebind(Bindings::from_settings(&settings()));

        // Runs on the only runtime thread; the join happens on the blocking pool
        control.shutdown().await;

        assert!(!control.hook.is_running());
        assert_eq!(control.store.load(), Some(settings().normalized()));
    }

    #[tokio::test]
    async fn test_socket_session_with_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let control = control(dir.path());
        let engine = Arc::clone(&control.engine);
        let socket_path = dir.path().join("rodder.sock");
        let server = Arc::new(Server::new(&socket_path, control).unwrap());

        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.run().await });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        assert!(matches!(roundtrip(&mut client, &Request::Ping).await, Response::Pong));
        assert!(matches!(
            roundtrip(&mut client, &Request::Subscribe).await,
            Response::Subscribed
        ));

        // The receiver is attached before the confirmation is sent
        engine.rebind(Bindings::default());

        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        client.read_exact(&mut body).await.unwrap();
        let notification: Notification = serde_json::from_slice(&body).unwrap();
        assert!(matches!(
            notification,
            Notification::StateEvent {
                event: StateEvent::BindingsChanged
            }
        ));

        server.shutdown().await;
        task.abort();
        assert!(!socket_path.exists());
    }
}
