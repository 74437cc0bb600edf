//! Control channel message definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::StateEvent;
use crate::hotkey::KeyRole;
use crate::settings::Settings;
use crate::state::State;

/// Macro state as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Macro switched off
    #[default]
    Disabled,
    /// Waiting for the trigger key
    Armed,
    /// Trigger key held after the action fired
    Active,
}

/// Requests from a control client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Switch the macro on or off
    SetEnabled { enabled: bool },

    /// Replace all key bindings; persisted on success
    Rebind { settings: Settings },

    /// Write the current bindings to the settings file
    SaveSettings,

    /// Retry registering the keyboard hook
    StartHook,

    /// Key names selectable for a role
    ListKeys { role: KeyRole },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to state change notifications
    Subscribe,
}

/// Responses from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Enabled flag after a set_enabled request
    Enabled { enabled: bool },

    /// Bindings now in effect, as persisted
    Rebound { settings: Settings },

    /// Settings written
    Saved,

    /// Keyboard hook registered
    HookStarted,

    /// Selectable key names, `"None"` first
    Keys { role: KeyRole, names: Vec<String> },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// State event occurred
    StateEvent { event: StateEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current macro state
    pub mode: Mode,

    /// Whether the keyboard hook is registered
    pub hook_registered: bool,

    /// Why the last hook registration failed, if it did
    pub hook_error: Option<String>,

    /// Bindings in effect
    pub settings: Settings,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: Mode::default(),
            hook_registered: false,
            hook_error: None,
            settings: Settings::default(),
            uptime_secs: 0,
        }
    }
}

/// Convert internal State to client Mode
impl From<State> for Mode {
    fn from(state: State) -> Self {
        match state {
            State::Disabled => Mode::Disabled,
            State::Armed => Mode::Armed,
            State::Active => Mode::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ToggleSource;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetEnabled { enabled: true };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("set_enabled"));
        assert!(json.contains("true"));
    }

    #[test]
    fn test_rebind_request_uses_file_field_names() {
        let json = r#"{"type":"rebind","settings":{"swordKey":"S","rodKey":null,"macKey":"LShift","toggleKey":"LCtrl","backToSwordSelected":true}}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        match req {
            Request::Rebind { settings } => {
                assert_eq!(settings.primary_key.as_deref(), Some("S"));
                assert_eq!(settings.secondary_key, None);
                assert!(settings.return_to_primary);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_list_keys_request_parses_role() {
        let req: Request = serde_json::from_str(r#"{"type":"list_keys","role":"trigger"}"#).unwrap();
        assert!(matches!(req, Request::ListKeys { role: KeyRole::Trigger }));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("status"));
        assert!(json.contains("disabled"));
    }

    #[test]
    fn test_notification_serialization() {
        let note = Notification::StateEvent {
            event: StateEvent::MacroToggled {
                enabled: true,
                source: ToggleSource::Key,
            },
        };
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains("state_event"));
        assert!(json.contains("macro_toggled"));
    }
}
