use clickscript::{LabelError, LoadError, SearchError, SessionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Recording is already in progress")]
    AlreadyRecording,

    #[error("Recording has not been started")]
    NotRecording,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Input listener failed: {0}")]
    Listener(String),

    #[error("Template capture failed: {0}")]
    Capture(#[from] SearchError),

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error("Failed to save recording: {0}")]
    Save(#[from] LoadError),

    #[error("Recorder state is poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, RecorderError>;
