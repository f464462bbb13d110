//! Record and replay desktop GUI scripts
//!
//! A script is a flat list of commands (clicks, key presses, text, pauses)
//! with labels, named blocks, counted and data-driven loops, and per-category
//! error policies. Clicks can be verified against saved template images
//! before they fire, and text can be pulled from a tabular data source.

pub mod chord;
pub mod command;
pub mod config;
pub mod data;
pub mod engine;
pub mod errors;
pub mod journal;
pub mod labels;
pub mod matching;
pub mod operator;
pub mod platforms;
pub mod player;
pub mod policy;
pub mod program;
pub mod search;
pub mod session;
pub mod signal;
pub mod sink;
pub mod storage;

pub use chord::{ChordAction, ChordDefinition, ChordRecognizer, ChordTable, RawEvent, Recognition};
pub use command::{Action, ClickButton, ClickTarget, Command, CommandId, CommandKind, CommandRecord, ShortcutKind};
pub use config::{CaptureConfig, Configuration, SearchOverrides, SearchPolicy};
pub use data::DataSource;
pub use engine::{Engine, Frame, RunReport, Script, StepOutcome, TerminateReason};
pub use errors::{
    ChordError, ClickScriptError, DataError, EngineError, LabelError, LoadError, Result, SearchError,
    SessionError, SinkError,
};
pub use journal::ErrorJournal;
pub use labels::LabelRegistry;
pub use operator::{ChannelOperator, DialogChoice, DialogRequest, Operator, OperatorHandle, PendingDialog};
pub use player::PlaybackHandle;
pub use policy::{ErrorCategory, ErrorPolicies, ErrorPolicy, PlaybackFault};
pub use program::Program;
pub use search::{Inverted, Locate, Region, Screen, TemplateDir, TemplateSearch, TemplateSource, Unverified};
pub use session::{Mode, ModeGuard, Session};
pub use signal::StopSignal;
pub use sink::{EventSink, InputAction};
pub use storage::{load_script, save_script};
