//! Live recording for clickscript
//!
//! Listens to the mouse and keyboard, folds key sequences that form known
//! chords into single commands, saves element templates under clicks and
//! writes the result into a [`clickscript::Program`].

pub mod capture;
pub mod click;
pub mod error;
pub mod events;
pub mod recorder;

pub use capture::TemplateCapture;
pub use click::ClickTracker;
pub use error::*;
pub use events::{EventTranslator, InputEvent};
pub use recorder::{InputFeed, PipelineFlow, RecordedCommand, RecordingPipeline, ScriptRecorder};
