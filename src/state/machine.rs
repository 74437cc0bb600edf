//! Core macro state machine
//!
//! Handles transitions between Disabled, Armed and Active based on key
//! events delivered by the hook. Runs on the hook thread: every path is
//! lock-free and never waits on the control side.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::{StateEvent, ToggleSource};
use crate::hotkey::KeySink;
use crate::synth::InputSynthesizer;

use super::bindings::{Bindings, MacroConfig};

/// The three states of the macro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum State {
    /// Macro switched off; trigger events are ignored
    #[default]
    Disabled = 0,
    /// Switched on, waiting for the trigger key
    Armed = 1,
    /// Action fired, trigger key still held
    Active = 2,
}

impl State {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => State::Armed,
            2 => State::Active,
            _ => State::Disabled,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != State::Disabled
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Disabled => write!(f, "Disabled"),
            State::Armed => write!(f, "Armed"),
            State::Active => write!(f, "Active"),
        }
    }
}

/// The macro engine: shared bindings, state, and the synthesis boundary
pub struct MacroEngine {
    /// Bindings, replaced wholesale by the control side
    config: Arc<MacroConfig>,
    /// Current [`State`], encoded as its discriminant
    state: AtomicU8,
    synthesizer: InputSynthesizer,
    /// Queue drained by the control runtime
    event_tx: broadcast::Sender<StateEvent>,
}

impl MacroEngine {
    /// Create an engine in the Disabled state
    pub fn new(
        config: Arc<MacroConfig>,
        synthesizer: InputSynthesizer,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        Self {
            config,
            state: AtomicU8::new(State::Disabled as u8),
            synthesizer,
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> State {
        State::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_enabled(&self) -> bool {
        self.state().is_enabled()
    }

    pub fn is_trigger_active(&self) -> bool {
        self.state() == State::Active
    }

    /// Current bindings
    pub fn bindings(&self) -> Bindings {
        self.config.snapshot()
    }

    /// Replace the bindings. Enabled/active state is left as it is.
    pub fn rebind(&self, bindings: Bindings) {
        self.config.replace(bindings);
        info!(
            primary = %bindings.primary,
            secondary = %bindings.secondary,
            trigger = %bindings.trigger,
            toggle = %bindings.toggle,
            return_to_primary = bindings.return_to_primary_on_release,
            "bindings replaced"
        );
        self.emit(StateEvent::BindingsChanged);
    }

    /// Switch the macro on or off from the control side.
    ///
    /// Returns whether the state changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let (old_state, new_state) = self.update(|state| match (state, enabled) {
            (State::Disabled, true) => State::Armed,
            (_, false) => State::Disabled,
            (state, true) => state,
        });

        let changed = old_state.is_enabled() != new_state.is_enabled();
        if changed {
            info!(from = %old_state, to = %new_state, "macro switched from control");
            self.emit(StateEvent::MacroToggled {
                enabled,
                source: ToggleSource::Control,
            });
        }
        changed
    }

    /// Handle a key press reported by the hook
    pub fn handle_key_down(&self, code: i32) {
        let bindings = self.config.snapshot();

        // Toggle wins even when it shares a key with the trigger. Every
        // key-down flips, including auto-repeats of a held toggle key.
        if bindings.toggle.matches(code) {
            self.toggle();
            return;
        }

        if !bindings.trigger.matches(code) {
            return;
        }

        // Only Armed -> Active fires; repeats while Active and presses while
        // Disabled fall through untouched
        if !self.transition(State::Armed, State::Active) {
            return;
        }

        match self.synthesizer.perform_action_sequence(bindings.secondary) {
            Ok(()) => self.emit(StateEvent::ActionFired),
            Err(e) => self.synthesis_failed(e),
        }
    }

    /// Handle a key release reported by the hook
    pub fn handle_key_up(&self, code: i32) {
        let bindings = self.config.snapshot();

        if !bindings.trigger.matches(code) {
            return;
        }

        if !self.transition(State::Active, State::Armed) {
            return;
        }

        if !bindings.return_to_primary_on_release {
            return;
        }

        match self.synthesizer.perform_return_sequence(bindings.primary) {
            Ok(()) => self.emit(StateEvent::ReturnedToPrimary),
            Err(e) => self.synthesis_failed(e),
        }
    }

    /// Flip enabled: Armed/Active collapse to Disabled, Disabled resumes Armed
    fn toggle(&self) {
        let (old_state, new_state) = self.update(|state| match state {
            State::Disabled => State::Armed,
            State::Armed | State::Active => State::Disabled,
        });

        let enabled = new_state.is_enabled();
        info!(from = %old_state, to = %new_state, "macro toggled");
        self.emit(StateEvent::MacroToggled {
            enabled,
            source: ToggleSource::Key,
        });
    }

    /// Compare-and-swap a single transition
    fn transition(&self, from: State, to: State) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if swapped {
            debug!(from = %from, to = %to, "state transition");
        }
        swapped
    }

    /// Apply `next` atomically, returning the old and new state
    fn update(&self, next: impl Fn(State) -> State) -> (State, State) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let old_state = State::from_raw(current);
            let new_state = next(old_state);
            match self.state.compare_exchange_weak(
                current,
                new_state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (old_state, new_state),
                Err(actual) => current = actual,
            }
        }
    }

    fn synthesis_failed(&self, error: crate::synth::SynthesisError) {
        warn!(error = %error, state = %self.state(), "input synthesis failed");
        self.emit(StateEvent::SynthesisFailed {
            message: error.to_string(),
        });
    }

    /// Post an event for the control runtime; never blocks
    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting state event");
        // No receivers just means nobody is listening yet
        let _ = self.event_tx.send(event);
    }
}

impl KeySink for MacroEngine {
    fn on_key_down(&self, code: i32) {
        self.handle_key_down(code);
    }

    fn on_key_up(&self, code: i32) {
        self.handle_key_up(code);
    }
}
