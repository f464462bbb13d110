//! Incremental recognition of multi-event chords in a live input stream.
//!
//! Events are held while they may still be the start of a chord. A chord
//! completes only when it is the single remaining candidate and every one of
//! its events has been seen; any event that disqualifies all candidates
//! releases the held events unchanged and in order.

use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::command::{Action, ClickButton, ClickTarget, Command, ShortcutKind};
use crate::errors::ChordError;

/// One raw input event as seen by the recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    KeyDown(String),
    KeyUp(String),
    Click(ClickButton, ClickTarget),
}

impl RawEvent {
    /// Positional signature compared against chord definitions,
    /// e.g. `KeyDown:ctrl`.
    pub fn signature(&self) -> String {
        match self {
            RawEvent::KeyDown(key) => format!("KeyDown:{key}"),
            RawEvent::KeyUp(key) => format!("KeyUp:{key}"),
            RawEvent::Click(button, _) => format!("Click:{button:?}"),
        }
    }

    pub fn into_command(self) -> Command {
        match self {
            RawEvent::KeyDown(key) => Command::new(Action::KeyDown(key)),
            RawEvent::KeyUp(key) => Command::new(Action::KeyUp(key)),
            RawEvent::Click(button, target) => Command::new(Action::Click(button, target)),
        }
    }
}

/// What a completed chord stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordAction {
    /// End the recording session
    StopRecording,
    /// Save a template around the current mouse position
    CaptureTemplate,
    /// Record a single shortcut command
    Shortcut(ShortcutKind),
}

impl ChordAction {
    /// The command recorded in place of the chord's raw events.
    pub fn command(self) -> Option<Command> {
        match self {
            ChordAction::Shortcut(kind) => Some(Command::new(Action::ClipboardShortcut(kind))),
            ChordAction::StopRecording | ChordAction::CaptureTemplate => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordDefinition {
    pub name: String,
    pub events: Vec<String>,
    pub action: ChordAction,
}

impl ChordDefinition {
    pub fn new<I, S>(name: impl Into<String>, events: I, action: ChordAction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            events: events.into_iter().map(Into::into).collect(),
            action,
        }
    }

    /// Press the keys in order, then release them in reverse.
    pub fn press(name: impl Into<String>, keys: &[&str], action: ChordAction) -> Self {
        let downs = keys.iter().map(|k| format!("KeyDown:{k}"));
        let ups = keys.iter().rev().map(|k| format!("KeyUp:{k}"));
        Self::new(name, downs.chain(ups), action)
    }

    /// Tap one key `times` times.
    pub fn tap(name: impl Into<String>, key: &str, times: usize, action: ChordAction) -> Self {
        let events = (0..times).flat_map(|_| [format!("KeyDown:{key}"), format!("KeyUp:{key}")]);
        Self::new(name, events, action)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl fmt::Display for ChordDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.events.join(", "))
    }
}

/// Validated set of chords.
#[derive(Debug, Clone)]
pub struct ChordTable {
    chords: Vec<ChordDefinition>,
}

impl ChordTable {
    /// Rejects empty chords, duplicate names and chords that start another
    /// chord, since those could never be the only remaining candidate.
    pub fn new(chords: Vec<ChordDefinition>) -> Result<Self, ChordError> {
        let mut names = HashSet::new();
        for chord in &chords {
            if chord.is_empty() {
                return Err(ChordError::Empty(chord.name.clone()));
            }
            if !names.insert(chord.name.as_str()) {
                return Err(ChordError::DuplicateName(chord.name.clone()));
            }
        }
        for (i, shorter) in chords.iter().enumerate() {
            for (j, longer) in chords.iter().enumerate() {
                if i != j
                    && shorter.len() <= longer.len()
                    && longer.events.starts_with(&shorter.events)
                {
                    return Err(ChordError::Prefix {
                        shorter: shorter.name.clone(),
                        longer: longer.name.clone(),
                    });
                }
            }
        }
        Ok(Self { chords })
    }

    /// Chords recognized while recording.
    pub fn builtin() -> Self {
        let mut chords = vec![
            ChordDefinition::tap("stop", "ctrl", 2, ChordAction::StopRecording),
            ChordDefinition::tap("capture", "ctrl_r", 2, ChordAction::CaptureTemplate),
        ];
        chords.extend(
            ShortcutKind::ALL
                .into_iter()
                .map(|kind| ChordDefinition::press(kind.name(), kind.keys(), ChordAction::Shortcut(kind))),
        );
        Self { chords }
    }

    pub fn chords(&self) -> &[ChordDefinition] {
        &self.chords
    }

    pub fn len(&self) -> usize {
        self.chords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chords.is_empty()
    }
}

impl Default for ChordTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Result of feeding one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// The event may be part of a chord and is held.
    Pending,
    /// No chord matches; these events are recorded as they are.
    Flush(Vec<RawEvent>),
    /// A chord completed; its held events are dropped.
    Matched(ChordDefinition),
}

#[derive(Debug, Clone)]
pub struct ChordRecognizer {
    table: ChordTable,
    queue: Vec<RawEvent>,
    candidates: Vec<usize>,
}

impl ChordRecognizer {
    pub fn new(table: ChordTable) -> Self {
        Self {
            table,
            queue: Vec::new(),
            candidates: Vec::new(),
        }
    }

    pub fn table(&self) -> &ChordTable {
        &self.table
    }

    /// Events currently held back.
    pub fn pending(&self) -> &[RawEvent] {
        &self.queue
    }

    pub fn feed(&mut self, event: RawEvent) -> Recognition {
        if self.queue.is_empty() {
            self.candidates = (0..self.table.chords.len()).collect();
        }
        let position = self.queue.len();
        let signature = event.signature();
        self.queue.push(event);

        let chords = &self.table.chords;
        self.candidates
            .retain(|&c| chords[c].events.get(position) == Some(&signature));

        match self.candidates.as_slice() {
            [] => {
                self.candidates.clear();
                Recognition::Flush(std::mem::take(&mut self.queue))
            }
            [only] if chords[*only].len() == self.queue.len() => {
                let chord = chords[*only].clone();
                debug!("Chord '{}' recognized", chord.name);
                self.queue.clear();
                self.candidates.clear();
                Recognition::Matched(chord)
            }
            _ => Recognition::Pending,
        }
    }

    /// Releases held events, e.g. when recording ends mid-chord.
    pub fn flush(&mut self) -> Vec<RawEvent> {
        self.candidates.clear();
        std::mem::take(&mut self.queue)
    }
}

impl Default for ChordRecognizer {
    fn default() -> Self {
        Self::new(ChordTable::builtin())
    }
}
