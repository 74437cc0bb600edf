//! Global keyboard hook using macOS CGEventTap
//!
//! Observes key presses and releases system-wide, whichever application
//! has focus. The tap is listen-only, so events still reach the focused
//! application. Runs on a dedicated thread with its own CFRunLoop and
//! hands every event straight to a single [`KeySink`] on that thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

/// Receiver of hook notifications.
///
/// Called on the hook thread. Implementations must return quickly and must
/// never block: a stalled callback delays keyboard input for every
/// application on the system.
pub trait KeySink: Send + Sync {
    fn on_key_down(&self, code: i32);
    fn on_key_up(&self, code: i32);
}

/// System-wide keyboard hook delivering to one sink
pub struct HookListener {
    sink: Arc<dyn KeySink>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HookListener {
    /// Create a listener; nothing is registered until [`start`](Self::start)
    pub fn new(sink: Arc<dyn KeySink>) -> Self {
        Self {
            sink,
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Register the hook.
    ///
    /// Spawns the listener thread and waits until the tap is either
    /// installed or has failed. A failure leaves the listener stopped, so
    /// the call can simply be retried (for example after the user grants
    /// Accessibility permission).
    pub fn start(&self) -> Result<(), HookError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HookError::AlreadyRunning);
        }

        // A previous thread may still be winding down after stop()
        self.reap();

        let sink = Arc::clone(&self.sink);
        let running = Arc::clone(&self.running);
        let (ready_tx, ready_rx) = sync_channel(1);

        let spawned = thread::Builder::new()
            .name("hook-listener".to_string())
            .spawn(move || {
                info!("hook listener thread started");
                platform::run_event_loop(sink, Arc::clone(&running), ready_tx);
                running.store(false, Ordering::SeqCst);
                info!("hook listener thread stopped");
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(HookError::ThreadSpawn(e.to_string()));
            }
        };

        let outcome = ready_rx.recv().unwrap_or(Err(HookError::ListenerExited));
        match outcome {
            Ok(()) => {
                *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                Ok(())
            }
            Err(e) => {
                if handle.join().is_err() {
                    warn!("hook listener thread panicked during startup");
                }
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Unregister the hook.
    ///
    /// Safe to call repeatedly, before any successful start, and from any
    /// thread including the hook thread itself.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.reap();
        if was_running {
            info!("hook listener stopped");
        }
    }

    /// Check if the hook is currently registered
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn reap(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(handle) = handle else {
            return;
        };

        // Joining ourselves would deadlock; the loop exits on its own
        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            warn!("hook listener thread panicked");
        }
    }
}

impl Drop for HookListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Errors that can occur while registering the hook
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to attach event tap to the run loop")]
    RunLoopSource,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("listener thread exited before reporting status")]
    ListenerExited,

    #[error("global keyboard hooks are not supported on this platform")]
    Unsupported,
}

#[cfg(target_os = "macos")]
mod platform {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::SyncSender;
    use std::sync::Arc;
    use std::time::Duration;

    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions,
        CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
    };
    use tracing::{debug, error, info, warn};

    use super::{HookError, KeySink};
    use crate::hotkey::keys::modifier_pressed;
    use crate::synth::SYNTHETIC_EVENT_TAG;

    /// Translate one tap event into a sink call
    fn dispatch(sink: &dyn KeySink, event_type: CGEventType, event: &CGEvent) {
        // Our own synthesized input must not re-enter the engine
        if event.get_integer_value_field(EventField::EVENT_SOURCE_USER_DATA) == SYNTHETIC_EVENT_TAG {
            return;
        }

        let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as i32;
        let pressed = match event_type {
            CGEventType::KeyDown => true,
            CGEventType::KeyUp => false,
            CGEventType::FlagsChanged => match modifier_pressed(code, event.get_flags().bits()) {
                Some(pressed) => pressed,
                None => return,
            },
            _ => return,
        };

        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            if pressed {
                sink.on_key_down(code);
            } else {
                sink.on_key_up(code);
            }
        }));

        if delivered.is_err() {
            error!(code, pressed, "key sink panicked, event dropped");
        }
    }

    /// Install the tap and pump the run loop until `running` is cleared
    pub(super) fn run_event_loop(
        sink: Arc<dyn KeySink>,
        running: Arc<AtomicBool>,
        ready: SyncSender<Result<(), HookError>>,
    ) {
        let tap_disabled = Arc::new(AtomicBool::new(false));
        let tap_disabled_cb = Arc::clone(&tap_disabled);

        // CGEventTap callback - must be fast and non-blocking
        let callback = move |_proxy: CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
                             -> Option<CGEvent> {
            match event_type {
                CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                    warn!("event tap disabled by the system");
                    tap_disabled_cb.store(true, Ordering::SeqCst);
                }
                _ => dispatch(sink.as_ref(), event_type, event),
            }
            Some(event.clone())
        };

        let tap = match CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            vec![
                CGEventType::KeyDown,
                CGEventType::KeyUp,
                CGEventType::FlagsChanged,
            ],
            callback,
        ) {
            Ok(tap) => tap,
            Err(()) => {
                error!("failed to create event tap - is Accessibility permission granted?");
                let _ = ready.send(Err(HookError::EventTapCreation));
                return;
            }
        };

        let Ok(run_loop_source) = tap.mach_port.create_runloop_source(0) else {
            let _ = ready.send(Err(HookError::RunLoopSource));
            return;
        };

        let run_loop = CFRunLoop::get_current();
        unsafe {
            run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
        }

        tap.enable();
        info!("event tap created and enabled");
        let _ = ready.send(Ok(()));

        while running.load(Ordering::SeqCst) {
            unsafe {
                CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
            }

            if tap_disabled.swap(false, Ordering::SeqCst) {
                tap.enable();
                debug!("event tap re-enabled");
            }
        }

        unsafe {
            run_loop.remove_source(&run_loop_source, kCFRunLoopCommonModes);
        }
    }
}

#[cfg(not(target_os = "macos"))]
mod platform {
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::SyncSender;
    use std::sync::Arc;

    use super::{HookError, KeySink};

    pub(super) fn run_event_loop(
        _sink: Arc<dyn KeySink>,
        _running: Arc<AtomicBool>,
        ready: SyncSender<Result<(), HookError>>,
    ) {
        let _ = ready.send(Err(HookError::Unsupported));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;

    impl KeySink for NullSink {
        fn on_key_down(&self, _code: i32) {}
        fn on_key_up(&self, _code: i32) {}
    }

    #[test]
    fn test_listener_creation() {
        let listener = HookListener::new(Arc::new(NullSink));
        assert!(!listener.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_without_start() {
        let listener = HookListener::new(Arc::new(NullSink));
        listener.stop();
        listener.stop();
        assert!(!listener.is_running());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_start_reports_unsupported_and_allows_retry() {
        let listener = HookListener::new(Arc::new(NullSink));

        assert!(matches!(listener.start(), Err(HookError::Unsupported)));
        assert!(!listener.is_running());

        // A failed start must not wedge the listener in a running state
        assert!(matches!(listener.start(), Err(HookError::Unsupported)));
        listener.stop();
        assert!(!listener.is_running());
    }
}
