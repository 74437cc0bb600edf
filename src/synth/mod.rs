//! Input synthesis
//!
//! Turns the engine's two fixed sequences into discrete synthetic events and
//! posts them through a platform [`InputBackend`]. On macOS events are
//! created with CoreGraphics and posted at the HID level, so the focused
//! application cannot tell them apart from real input.

#[cfg(target_os = "macos")]
mod quartz;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::hotkey::KeyBinding;

/// Source user-data value stamped on every event this process posts, so the
/// hook can recognise and skip them.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub const SYNTHETIC_EVENT_TAG: i64 = 0x524F_4444;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// A single discrete input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticEvent {
    KeyDown(u16),
    KeyUp(u16),
    MouseDown(MouseButton),
    MouseUp(MouseButton),
}

impl fmt::Display for SyntheticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntheticEvent::KeyDown(code) => write!(f, "key-down({:#04x})", code),
            SyntheticEvent::KeyUp(code) => write!(f, "key-up({:#04x})", code),
            SyntheticEvent::MouseDown(button) => write!(f, "{:?}-button-down", button),
            SyntheticEvent::MouseUp(button) => write!(f, "{:?}-button-up", button),
        }
    }
}

/// Errors raised when the platform refuses synthetic input
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("failed to create event source")]
    EventSource,

    #[error("platform rejected synthetic {0}")]
    Rejected(SyntheticEvent),

    #[error("input synthesis is not supported on this platform")]
    Unsupported,
}

/// Posts individual synthetic events to the OS
pub trait InputBackend: Send + Sync {
    fn post(&self, event: SyntheticEvent) -> Result<(), SynthesisError>;
}

/// Backend for platforms without a synthesis implementation
#[derive(Debug, Default)]
#[cfg_attr(target_os = "macos", allow(dead_code))]
pub struct UnsupportedBackend;

impl InputBackend for UnsupportedBackend {
    fn post(&self, _event: SyntheticEvent) -> Result<(), SynthesisError> {
        Err(SynthesisError::Unsupported)
    }
}

/// The backend for the current platform
pub fn platform_backend() -> Arc<dyn InputBackend> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(quartz::QuartzBackend)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(UnsupportedBackend)
    }
}

/// Issues the macro's key and mouse sequences
#[derive(Clone)]
pub struct InputSynthesizer {
    backend: Arc<dyn InputBackend>,
}

impl InputSynthesizer {
    /// Button clicked after the secondary key
    pub const ACTION_BUTTON: MouseButton = MouseButton::Right;

    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self { backend }
    }

    /// Tap the secondary key, then click [`Self::ACTION_BUTTON`].
    ///
    /// An unbound secondary key skips the key tap; the click still happens.
    pub fn perform_action_sequence(&self, secondary: KeyBinding) -> Result<(), SynthesisError> {
        match synthesis_code(secondary) {
            Some(code) => self.tap_key(code)?,
            None => debug!(%secondary, "secondary key unbound, clicking only"),
        }
        self.click(Self::ACTION_BUTTON)
    }

    /// Tap the primary key; nothing happens when it is unbound
    pub fn perform_return_sequence(&self, primary: KeyBinding) -> Result<(), SynthesisError> {
        match synthesis_code(primary) {
            Some(code) => self.tap_key(code),
            None => Ok(()),
        }
    }

    fn tap_key(&self, code: u16) -> Result<(), SynthesisError> {
        self.backend.post(SyntheticEvent::KeyDown(code))?;
        self.backend.post(SyntheticEvent::KeyUp(code))
    }

    fn click(&self, button: MouseButton) -> Result<(), SynthesisError> {
        self.backend.post(SyntheticEvent::MouseDown(button))?;
        self.backend.post(SyntheticEvent::MouseUp(button))
    }
}

fn synthesis_code(binding: KeyBinding) -> Option<u16> {
    u16::try_from(binding.synthesis_code()).ok()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Backend that records events instead of posting them
    #[derive(Default)]
    pub struct RecordingBackend {
        events: Mutex<Vec<SyntheticEvent>>,
        fail_on: Option<SyntheticEvent>,
    }

    impl RecordingBackend {
        pub fn failing_on(event: SyntheticEvent) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail_on: Some(event),
            }
        }

        pub fn events(&self) -> Vec<SyntheticEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.events.lock().unwrap().clear();
        }
    }

    impl InputBackend for RecordingBackend {
        fn post(&self, event: SyntheticEvent) -> Result<(), SynthesisError> {
            self.events.lock().unwrap().push(event);
            if self.fail_on == Some(event) {
                return Err(SynthesisError::Rejected(event));
            }
            Ok(())
        }
    }
}
