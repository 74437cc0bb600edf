//! Hotkey module for global keyboard event listening
//!
//! Uses macOS CGEventTap to observe key press/release events and a static
//! key table to translate the symbolic names operators bind into codes.

pub mod keys;
mod listener;

pub use keys::{KeyBinding, KeyRole};
pub use listener::{HookError, HookListener, KeySink};
