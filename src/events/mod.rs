//! Events emitted by the macro engine
//!
//! The engine runs on the hook thread and must never touch UI state there.
//! Instead it posts [`StateEvent`]s onto a broadcast queue that the control
//! runtime drains with [`drain`], which also rings the [`Chime`] when the
//! macro is toggled.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// What switched the macro on or off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleSource {
    /// The toggle key, acknowledged with the chime
    Key,
    /// A control-socket request
    Control,
}

/// Events emitted by the engine during transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// The macro was switched on or off
    MacroToggled { enabled: bool, source: ToggleSource },

    /// Secondary key tapped and action button clicked (trigger pressed)
    ActionFired,

    /// Primary key tapped again (trigger released)
    ReturnedToPrimary,

    /// The platform refused a synthetic event
    SynthesisFailed { message: String },

    /// Key bindings were replaced from the control side
    BindingsChanged,
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::MacroToggled { enabled: true, .. } => write!(f, "MACRO_ON"),
            StateEvent::MacroToggled { enabled: false, .. } => write!(f, "MACRO_OFF"),
            StateEvent::ActionFired => write!(f, "ACTION_FIRED"),
            StateEvent::ReturnedToPrimary => write!(f, "RETURNED_TO_PRIMARY"),
            StateEvent::SynthesisFailed { message } => write!(f, "SYNTHESIS_FAILED ({})", message),
            StateEvent::BindingsChanged => write!(f, "BINDINGS_CHANGED"),
        }
    }
}

/// Audible acknowledgment of a toggle. Best effort: callers ignore failures.
pub trait Chime: Send + Sync {
    fn ring(&self) -> io::Result<()>;
}

/// Rings the terminal bell when stderr is attached to a terminal
#[derive(Debug, Default)]
#[cfg_attr(target_os = "macos", allow(dead_code))]
pub struct TerminalBell;

impl Chime for TerminalBell {
    fn ring(&self) -> io::Result<()> {
        let mut stderr = io::stderr();
        if !stderr.is_terminal() {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "stderr is not a terminal"));
        }
        stderr.write_all(b"\x07")?;
        stderr.flush()
    }
}

/// Plays the system "Tink" sound; works without a terminal
#[cfg(target_os = "macos")]
#[derive(Debug, Default)]
pub struct SystemSound;

#[cfg(target_os = "macos")]
impl Chime for SystemSound {
    fn ring(&self) -> io::Result<()> {
        let status = std::process::Command::new("afplay")
            .arg("/System/Library/Sounds/Tink.aiff")
            .status()?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("afplay exited with {}", status),
            ));
        }
        Ok(())
    }
}

/// The chime for this platform
pub fn platform_chime() -> Arc<dyn Chime> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(SystemSound)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(TerminalBell)
    }
}

/// Drain engine notifications on the control runtime until the queue closes.
///
/// Toggle-key presses ring `chime` on the blocking pool, so neither the hook
/// thread nor the runtime waits on audio output.
pub async fn drain(mut rx: broadcast::Receiver<StateEvent>, chime: Arc<dyn Chime>) {
    loop {
        match rx.recv().await {
            Ok(StateEvent::MacroToggled { enabled, source }) => {
                info!(enabled, ?source, "macro {}", if enabled { "ON" } else { "OFF" });
                if source != ToggleSource::Key {
                    continue;
                }
                let chime = chime.clone();
                match tokio::task::spawn_blocking(move || chime.ring()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(error = %e, "toggle chime unavailable"),
                    Err(e) => warn!(error = %e, "toggle chime task failed"),
                }
            }
            Ok(StateEvent::SynthesisFailed { message }) => {
                warn!(%message, "synthetic input was refused");
            }
            Ok(event) => {
                info!(%event, "state event");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "state event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::CountingChime;
    use super::*;

    fn toggled(enabled: bool, source: ToggleSource) -> StateEvent {
        StateEvent::MacroToggled { enabled, source }
    }

    async fn drain_all(events: &[StateEvent], chime: Arc<CountingChime>) {
        let (tx, rx) = broadcast::channel(16);
        for event in events {
            tx.send(event.clone()).unwrap();
        }
        drop(tx);
        drain(rx, chime).await;
    }

    #[tokio::test]
    async fn test_drain_rings_once_per_toggle() {
        let chime = Arc::new(CountingChime::default());

        drain_all(
            &[
                toggled(true, ToggleSource::Key),
                StateEvent::ActionFired,
                StateEvent::ReturnedToPrimary,
                toggled(false, ToggleSource::Key),
                toggled(true, ToggleSource::Control),
                StateEvent::BindingsChanged,
            ],
            chime.clone(),
        )
        .await;

        assert_eq!(chime.rings(), 2);
    }

    #[tokio::test]
    async fn test_drain_survives_broken_chime() {
        let chime = Arc::new(CountingChime::broken());

        drain_all(
            &[
                toggled(true, ToggleSource::Key),
                toggled(false, ToggleSource::Key),
                toggled(true, ToggleSource::Key),
            ],
            chime.clone(),
        )
        .await;

        assert_eq!(chime.rings(), 3);
    }

    #[test]
    fn test_event_serialization() {
        let event = StateEvent::MacroToggled {
            enabled: true,
            source: ToggleSource::Key,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("macro_toggled"));
        assert!(json.contains("true"));
        assert!(json.contains(r#""source":"key""#));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"action_fired"}"#;
        let event: StateEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, StateEvent::ActionFired);
    }

    #[test]
    fn test_event_display() {
        let off = StateEvent::MacroToggled {
            enabled: false,
            source: ToggleSource::Control,
        };
        assert_eq!(off.to_string(), "MACRO_OFF");
        assert_eq!(
            StateEvent::SynthesisFailed { message: "denied".into() }.to_string(),
            "SYNTHESIS_FAILED (denied)"
        );
    }
}
