//! State machine module for the macro
//!
//! Provides an explicit state machine with three states:
//! - Disabled: default state, trigger key ignored
//! - Armed: enabled, waiting for the trigger key
//! - Active: action fired, trigger key still held

mod bindings;
mod machine;

pub use bindings::{Bindings, MacroConfig};
pub use machine::{MacroEngine, State};
