use arboard::Clipboard;
use rdev::{Button, EventType, Key};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::command::ClickButton;
use crate::errors::SinkError;
use crate::platforms::keys::key_from_name;
use crate::sink::{EventSink, InputAction};

/// Gap after every synthesized event so the OS registers it.
const EVENT_GAP: Duration = Duration::from_millis(20);

/// Drives the real mouse and keyboard through `rdev::simulate`.
///
/// Text is entered by placing it on the clipboard and pasting, which works
/// for any keyboard layout. The previous clipboard text is put back after.
#[derive(Debug, Clone)]
pub struct RdevSink {
    event_gap: Duration,
}

impl Default for RdevSink {
    fn default() -> Self {
        Self {
            event_gap: EVENT_GAP,
        }
    }
}

impl RdevSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, event: EventType) -> Result<(), SinkError> {
        rdev::simulate(&event)
            .map_err(|_| SinkError::Simulate(format!("could not send {event:?}")))?;
        thread::sleep(self.event_gap);
        Ok(())
    }

    fn key(name: &str) -> Result<Key, SinkError> {
        key_from_name(name).ok_or_else(|| SinkError::UnknownKey(name.to_string()))
    }

    fn click(&self, button: ClickButton, (x, y): (i32, i32)) -> Result<(), SinkError> {
        self.send(EventType::MouseMove {
            x: f64::from(x),
            y: f64::from(y),
        })?;
        let (button, times) = match button {
            ClickButton::Left => (Button::Left, 1),
            ClickButton::Right => (Button::Right, 1),
            ClickButton::Double => (Button::Left, 2),
        };
        for _ in 0..times {
            self.send(EventType::ButtonPress(button))?;
            self.send(EventType::ButtonRelease(button))?;
        }
        Ok(())
    }

    /// Presses `keys` in order and releases them in reverse.
    fn chord(&self, keys: &[&str]) -> Result<(), SinkError> {
        let keys = keys
            .iter()
            .map(|name| Self::key(name))
            .collect::<Result<Vec<_>, _>>()?;
        for key in &keys {
            self.send(EventType::KeyPress(*key))?;
        }
        for key in keys.iter().rev() {
            self.send(EventType::KeyRelease(*key))?;
        }
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), SinkError> {
        if text.is_empty() {
            return Ok(());
        }
        let mut clipboard =
            Clipboard::new().map_err(|e| SinkError::Clipboard(format!("Failed to access clipboard: {e}")))?;
        let previous = clipboard.get_text().ok();
        clipboard
            .set_text(text)
            .map_err(|e| SinkError::Clipboard(format!("failed to copy text: {e}")))?;
        self.chord(&["ctrl", "v"])?;
        if let Some(previous) = previous {
            // Give the target application time to read the clipboard first.
            thread::sleep(self.event_gap * 5);
            if let Err(e) = clipboard.set_text(previous) {
                warn!("Failed to restore clipboard: {}", e);
            }
        }
        Ok(())
    }
}

impl EventSink for RdevSink {
    fn execute(&mut self, action: &InputAction) -> Result<(), SinkError> {
        debug!("Simulating {:?}", action);
        match action {
            InputAction::Click { button, at } => self.click(*button, *at),
            InputAction::KeyDown(name) => self.send(EventType::KeyPress(Self::key(name)?)),
            InputAction::KeyUp(name) => self.send(EventType::KeyRelease(Self::key(name)?)),
            InputAction::Type(text) => self.type_text(text),
            InputAction::Shortcut(kind) => self.chord(kind.keys()),
        }
    }
}
