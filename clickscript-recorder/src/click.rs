use std::time::{Duration, Instant};

/// Pairs left clicks into double clicks.
///
/// A left click that follows the previous one within the window completes a
/// double click; the pair is consumed so a third click starts over.
#[derive(Debug, Clone)]
pub struct ClickTracker {
    window: Duration,
    last_left: Option<Instant>,
}

impl ClickTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_left: None,
        }
    }

    /// Registers a left click; true when it completes a double click.
    pub fn left_click(&mut self, at: Instant) -> bool {
        match self.last_left.take() {
            Some(previous) if at.saturating_duration_since(previous) <= self.window => true,
            _ => {
                self.last_left = Some(at);
                false
            }
        }
    }

    /// Any other input breaks a pending pair.
    pub fn interrupt(&mut self) {
        self.last_left = None;
    }
}
