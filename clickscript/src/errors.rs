use thiserror::Error;

use crate::session::Mode;

/// Label and block-name bookkeeping errors. Always surfaced to the editor,
/// never resolved by an error policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("Label already exists: {0}")]
    AlreadyExists(String),

    #[error("Unknown label: {0}")]
    Unknown(String),
}

/// Data source errors (the "no data" category during playback).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("No data source is loaded")]
    NoSource,

    #[error("No field \"{0}\" in the data source")]
    UnknownField(String),

    #[error("No more data in field \"{0}\"")]
    Exhausted(String),

    #[error("Failed to read data source: {0}")]
    Read(String),
}

/// Screen verification errors (the "no element" category during playback).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("Template not found: {0}")]
    TemplateMissing(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element is present: {0}")]
    ElementPresent(String),

    #[error("Search cancelled")]
    Cancelled,

    #[error("Screen capture failed: {0}")]
    Capture(String),
}

/// Errors raised while turning persisted records into commands.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Unknown command kind: {0}")]
    UnknownCommand(String),

    #[error("Invalid parameter {index} for {kind}: {message}")]
    InvalidParameter {
        kind: &'static str,
        index: usize,
        message: String,
    },

    #[error("Duplicate label in script: {0}")]
    DuplicateLabel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed script: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by an input sink while driving the OS.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Input simulation failed: {0}")]
    Simulate(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    /// The sink itself verified the target and failed; handled like a search error.
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Fatal playback errors. These end the run; no error policy applies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Nested blocks are not allowed: block \"{inner}\" (command {index}) starts inside block \"{outer}\"")]
    NestedBlocks {
        outer: String,
        inner: String,
        index: usize,
    },

    #[error("Block \"{0}\" has no matching block end")]
    UnterminatedBlock(String),

    #[error("Jump target does not exist: {0}")]
    UnknownLabel(String),

    #[error("Screen capture failed at command {index}: {message}")]
    Capture { index: usize, message: String },

    #[error("Input device failure at command {index}: {source}")]
    Sink { index: usize, source: SinkError },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Playback worker failed: {0}")]
    Worker(String),
}

/// Returned when recording and playback would overlap.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Cannot start {requested:?} while {active:?} is in progress")]
    Busy { active: Mode, requested: Mode },
}

/// Errors returned by chord table construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChordError {
    #[error("Chord \"{0}\" has no events")]
    Empty(String),

    #[error("Duplicate chord name: {0}")]
    DuplicateName(String),

    #[error("Chord \"{shorter}\" is a prefix of \"{longer}\" and could never complete")]
    Prefix { shorter: String, longer: String },
}

/// Umbrella error for callers that do not care which layer failed.
#[derive(Error, Debug)]
pub enum ClickScriptError {
    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Chord(#[from] ChordError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

pub type Result<T, E = ClickScriptError> = std::result::Result<T, E>;
