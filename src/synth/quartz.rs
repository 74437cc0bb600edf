//! CoreGraphics synthesis backend

use core_graphics::event::{CGEvent, CGEventTapLocation, CGEventType, CGMouseButton, EventField};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

use super::{InputBackend, MouseButton, SynthesisError, SyntheticEvent, SYNTHETIC_EVENT_TAG};

/// Posts events at the HID level from a fresh HID-state source
#[derive(Debug, Default)]
pub struct QuartzBackend;

fn mouse_event_type(event: SyntheticEvent) -> CGEventType {
    match event {
        SyntheticEvent::MouseDown(MouseButton::Left) => CGEventType::LeftMouseDown,
        SyntheticEvent::MouseUp(MouseButton::Left) => CGEventType::LeftMouseUp,
        SyntheticEvent::MouseDown(MouseButton::Right) => CGEventType::RightMouseDown,
        _ => CGEventType::RightMouseUp,
    }
}

fn cg_button(button: MouseButton) -> CGMouseButton {
    match button {
        MouseButton::Left => CGMouseButton::Left,
        MouseButton::Right => CGMouseButton::Right,
    }
}

impl InputBackend for QuartzBackend {
    fn post(&self, event: SyntheticEvent) -> Result<(), SynthesisError> {
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| SynthesisError::EventSource)?;

        let cg_event = match event {
            SyntheticEvent::KeyDown(code) => CGEvent::new_keyboard_event(source, code, true),
            SyntheticEvent::KeyUp(code) => CGEvent::new_keyboard_event(source, code, false),
            SyntheticEvent::MouseDown(button) | SyntheticEvent::MouseUp(button) => {
                // Click wherever the cursor currently is
                let location = CGEvent::new(source.clone())
                    .map_err(|_| SynthesisError::Rejected(event))?
                    .location();
                CGEvent::new_mouse_event(source, mouse_event_type(event), location, cg_button(button))
            }
        }
        .map_err(|_| SynthesisError::Rejected(event))?;

        cg_event.set_integer_value_field(EventField::EVENT_SOURCE_USER_DATA, SYNTHETIC_EVENT_TAG);
        cg_event.post(CGEventTapLocation::HID);

        Ok(())
    }
}
