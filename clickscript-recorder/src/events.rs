use rdev::{Button, EventType};
use std::collections::HashSet;
use std::time::Instant;

use clickscript::platforms::key_name;
use clickscript::{ClickButton, ClickTarget, RawEvent};

/// One recorded input together with the pointer position when it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub raw: RawEvent,
    pub position: (i32, i32),
    pub time: Instant,
}

impl InputEvent {
    pub fn new(raw: RawEvent, position: (i32, i32)) -> Self {
        Self {
            raw,
            position,
            time: Instant::now(),
        }
    }
}

/// Turns listener events into [`InputEvent`]s.
///
/// Mouse moves only update the tracked pointer position. Key presses that
/// arrive while the key is already down are auto-repeat and are dropped, as
/// are middle clicks, button releases and wheel events.
#[derive(Debug, Default)]
pub struct EventTranslator {
    position: (f64, f64),
    held: HashSet<String>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> (i32, i32) {
        (self.position.0.round() as i32, self.position.1.round() as i32)
    }

    pub fn translate(&mut self, event: &EventType, time: Instant) -> Option<InputEvent> {
        let raw = match event {
            EventType::MouseMove { x, y } => {
                self.position = (*x, *y);
                return None;
            }
            EventType::KeyPress(key) => {
                let name = key_name(*key);
                if !self.held.insert(name.clone()) {
                    return None;
                }
                RawEvent::KeyDown(name)
            }
            EventType::KeyRelease(key) => {
                let name = key_name(*key);
                self.held.remove(&name);
                RawEvent::KeyUp(name)
            }
            EventType::ButtonPress(button) => {
                let button = match button {
                    Button::Left => ClickButton::Left,
                    Button::Right => ClickButton::Right,
                    _ => return None,
                };
                let (x, y) = self.position();
                RawEvent::Click(button, ClickTarget::at(x, y))
            }
            EventType::ButtonRelease(_) | EventType::Wheel { .. } => return None,
        };
        Some(InputEvent {
            raw,
            position: self.position(),
            time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdev::Key;

    #[test]
    fn test_click_uses_last_pointer_position() {
        let mut translator = EventTranslator::new();
        let now = Instant::now();
        assert!(translator
            .translate(&EventType::MouseMove { x: 10.4, y: 20.6 }, now)
            .is_none());
        let event = translator
            .translate(&EventType::ButtonPress(Button::Left), now)
            .unwrap();
        assert_eq!(
            event.raw,
            RawEvent::Click(ClickButton::Left, ClickTarget::at(10, 21))
        );
        assert_eq!(event.position, (10, 21));
        assert!(translator
            .translate(&EventType::ButtonRelease(Button::Left), now)
            .is_none());
        assert!(translator
            .translate(&EventType::ButtonPress(Button::Middle), now)
            .is_none());
    }

    #[test]
    fn test_auto_repeat_is_dropped() {
        let mut translator = EventTranslator::new();
        let now = Instant::now();
        let press = EventType::KeyPress(Key::KeyA);
        assert_eq!(
            translator.translate(&press, now).map(|e| e.raw),
            Some(RawEvent::KeyDown("a".into()))
        );
        assert!(translator.translate(&press, now).is_none());
        assert_eq!(
            translator
                .translate(&EventType::KeyRelease(Key::KeyA), now)
                .map(|e| e.raw),
            Some(RawEvent::KeyUp("a".into()))
        );
        assert!(translator.translate(&press, now).is_some());
    }
}
