use std::sync::{Arc, Mutex};

use crate::command::{ClickButton, ShortcutKind};
use crate::errors::SinkError;

/// A single OS-level input operation requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Click { button: ClickButton, at: (i32, i32) },
    KeyDown(String),
    KeyUp(String),
    /// Enter text into the focused control
    Type(String),
    Shortcut(ShortcutKind),
}

/// Performs input on the OS.
///
/// Implementations may also verify the target themselves and report a
/// [`SinkError::Search`] failure, which the engine treats like a failed
/// template search.
pub trait EventSink: Send {
    fn execute(&mut self, action: &InputAction) -> Result<(), SinkError>;
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn execute(&mut self, action: &InputAction) -> Result<(), SinkError> {
        (**self).execute(action)
    }
}

/// Discards every action. Used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn execute(&mut self, action: &InputAction) -> Result<(), SinkError> {
        tracing::debug!("Dry run: {:?}", action);
        Ok(())
    }
}

/// Keeps every executed action in order. Clones share the same log, so a
/// caller can keep one handle while the engine owns another.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    actions: Arc<Mutex<Vec<InputAction>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<InputAction> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Text of every `Type` action, in order.
    pub fn typed(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                InputAction::Type(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn execute(&mut self, action: &InputAction) -> Result<(), SinkError> {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action.clone());
        }
        Ok(())
    }
}
