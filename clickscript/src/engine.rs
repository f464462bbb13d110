//! Script interpreter.
//!
//! The engine walks the flat command list with a program counter and a
//! stack of frames. A frame is either a loop header with its remaining
//! iteration count or the call site of a block invoked through `RunTo`.
//!
//! `step()` runs exactly one command. Recoverable errors (missing data,
//! missing elements) are resolved through the active [`ErrorPolicy`] of their
//! category; anything else ends the run with an [`EngineError`]. Whatever the
//! reason a run ends, keys left pressed by the script are released.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::command::{Action, ClickButton, ClickTarget, Command};
use crate::config::{seconds, Configuration};
use crate::data::DataSource;
use crate::errors::{EngineError, LabelError, SearchError, SinkError};
use crate::journal::ErrorJournal;
use crate::operator::{DialogChoice, DialogRequest, Operator, StopOperator};
use crate::policy::{ErrorCategory, ErrorPolicies, ErrorPolicy, PlaybackFault};
use crate::program::Program;
use crate::search::{Inverted, Locate, Unverified};
use crate::signal::StopSignal;
use crate::sink::{EventSink, InputAction, NullSink};

/// Immutable commands plus the index of every label and block name.
#[derive(Debug, Clone, Default)]
pub struct Script {
    name: String,
    commands: Vec<Command>,
    labels: HashMap<String, usize>,
}

impl Script {
    pub fn new(name: impl Into<String>, commands: Vec<Command>) -> Result<Self, LabelError> {
        let mut labels = HashMap::new();
        for (index, command) in commands.iter().enumerate() {
            if let Some(label) = command.label_name() {
                if labels.insert(label.to_string(), index).is_some() {
                    return Err(LabelError::AlreadyExists(label.to_string()));
                }
            }
        }
        Ok(Self {
            name: name.into(),
            commands,
            labels,
        })
    }

    pub fn from_program(name: impl Into<String>, program: &Program) -> Self {
        Self {
            name: name.into(),
            commands: program.commands(),
            labels: program.label_index(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Command> {
        self.commands.get(index)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    /// Label and block names, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.labels.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Counted or field loop. `remaining` may start at zero for an exhausted
    /// field; the body still runs once.
    Loop { start: usize, remaining: i64 },
    /// Where to resume once the invoked block reaches its end.
    Return { call_site: usize },
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateReason {
    /// The program counter ran past the last command
    Finished,
    /// A `Stop` command was executed
    StopCommand,
    /// The stop signal was raised
    Cancelled,
    /// A recoverable error hit the `Stop` policy
    PolicyStop { index: usize, message: String },
    /// The operator chose to stop at a dialog
    OperatorStop { index: usize, message: String },
    /// A fatal error ended the run
    Failed(String),
}

impl TerminateReason {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminateReason::Finished | TerminateReason::StopCommand)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// Waiting for the operator; answer with [`Engine::resume`]
    Suspend(DialogRequest),
    Terminate(TerminateReason),
}

/// A recoverable error and how it was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRecord {
    pub index: usize,
    pub fault: PlaybackFault,
    pub policy: ErrorPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub reason: TerminateReason,
    pub steps: usize,
    pub faults: Vec<FaultRecord>,
}

enum Flow {
    Next,
    Suspend(DialogRequest),
    Terminate(TerminateReason),
}

enum Failure {
    Fault(PlaybackFault),
    Cancelled,
    Fatal(EngineError),
}

impl From<PlaybackFault> for Failure {
    fn from(fault: PlaybackFault) -> Self {
        Failure::Fault(fault)
    }
}

impl From<EngineError> for Failure {
    fn from(err: EngineError) -> Self {
        Failure::Fatal(err)
    }
}

pub struct Engine {
    script: Script,
    config: Configuration,
    policies: ErrorPolicies,
    data: DataSource,
    sink: Box<dyn EventSink>,
    locator: Box<dyn Locate>,
    operator: Box<dyn Operator>,
    stop: StopSignal,
    journal: Option<ErrorJournal>,
    pc: usize,
    stack: Vec<Frame>,
    held_keys: Vec<String>,
    suspended: Option<(usize, DialogRequest)>,
    terminated: Option<TerminateReason>,
    started: bool,
    steps: usize,
    faults: Vec<FaultRecord>,
}

impl Engine {
    /// An engine that performs no real input: dry-run sink, unverified
    /// clicks and no operator. Attach collaborators with the `with_*` methods.
    pub fn new(script: Script, config: Configuration) -> Self {
        let journal = config.error_log.clone().map(ErrorJournal::new);
        Self {
            script,
            policies: config.policies.clone(),
            config,
            data: DataSource::empty(),
            sink: Box::new(NullSink),
            locator: Box::new(Unverified),
            operator: Box::new(StopOperator),
            stop: StopSignal::new(),
            journal,
            pc: 0,
            stack: Vec::new(),
            held_keys: Vec::new(),
            suspended: None,
            terminated: None,
            started: false,
            steps: 0,
            faults: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_locator(mut self, locator: impl Locate + 'static) -> Self {
        self.locator = Box::new(locator);
        self
    }

    pub fn with_operator(mut self, operator: impl Operator + 'static) -> Self {
        self.operator = Box::new(operator);
        self
    }

    pub fn with_data(mut self, data: DataSource) -> Self {
        self.data = data;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_journal(mut self, journal: ErrorJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn stack(&self) -> &[Frame] {
        &self.stack
    }

    pub fn policies(&self) -> &ErrorPolicies {
        &self.policies
    }

    pub fn data(&self) -> &DataSource {
        &self.data
    }

    pub fn held_keys(&self) -> &[String] {
        &self.held_keys
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Runs until the script ends, answering dialogs through the attached
    /// operator and pausing `command_pause` between commands.
    pub fn run(&mut self) -> Result<RunReport, EngineError> {
        info!(
            "Running script '{}' with {} command(s)",
            self.script.name(),
            self.script.len()
        );
        loop {
            match self.step()? {
                StepOutcome::Continue => {
                    // An interrupted pause is picked up by the next step.
                    self.stop.sleep(self.config.command_pause());
                }
                StepOutcome::Suspend(request) => {
                    let choice = self.operator.ask(&request);
                    info!("Operator answered {:?} at command {}", choice, request.index);
                    self.resume(choice)?;
                }
                StepOutcome::Terminate(reason) => {
                    info!("Script '{}' ended: {:?}", self.script.name(), reason);
                    return Ok(RunReport {
                        reason,
                        steps: self.steps,
                        faults: self.faults.clone(),
                    });
                }
            }
        }
    }

    /// Executes the command at the program counter.
    pub fn step(&mut self) -> Result<StepOutcome, EngineError> {
        if let Some(reason) = &self.terminated {
            return Ok(StepOutcome::Terminate(reason.clone()));
        }
        if let Some((_, request)) = &self.suspended {
            return Ok(StepOutcome::Suspend(request.clone()));
        }
        if !self.started {
            self.begin();
        }
        if self.stop.is_stopped() {
            return Ok(self.finish(TerminateReason::Cancelled));
        }
        let index = self.pc;
        let Some(command) = self.script.get(index).cloned() else {
            return Ok(self.finish(TerminateReason::Finished));
        };

        self.steps += 1;
        debug!("Step {} BEGIN {}", index, command);
        self.pc = index + 1;

        match self.execute(index, &command.action) {
            Ok(Flow::Next) => Ok(StepOutcome::Continue),
            Ok(Flow::Suspend(request)) => {
                self.suspended = Some((index, request.clone()));
                Ok(StepOutcome::Suspend(request))
            }
            Ok(Flow::Terminate(reason)) => Ok(self.finish(reason)),
            Err(Failure::Fault(fault)) => self.handle_fault(index, fault),
            Err(Failure::Cancelled) => Ok(self.finish(TerminateReason::Cancelled)),
            Err(Failure::Fatal(err)) => Err(self.fail(err)),
        }
    }

    /// Answers the pending dialog.
    pub fn resume(&mut self, choice: DialogChoice) -> Result<StepOutcome, EngineError> {
        let Some((index, request)) = self.suspended.take() else {
            return Ok(StepOutcome::Continue);
        };
        match choice {
            DialogChoice::Continue => {
                self.pc = index + 1;
                Ok(StepOutcome::Continue)
            }
            DialogChoice::JumpTo(label) => match self.jump(&label, index) {
                Ok(()) => Ok(StepOutcome::Continue),
                Err(err) => Err(self.fail(err)),
            },
            DialogChoice::Restart => {
                info!("Restarting script '{}'", self.script.name());
                self.release_held_keys();
                self.started = false;
                Ok(StepOutcome::Continue)
            }
            DialogChoice::Stop => Ok(self.finish(TerminateReason::OperatorStop {
                index,
                message: request.message,
            })),
        }
    }

    fn begin(&mut self) {
        self.started = true;
        self.pc = 0;
        self.stack.clear();
        self.policies = self.config.policies.clone();
        if self.config.reset_data_cursors {
            self.data.reset_cursors();
        }
    }

    fn finish(&mut self, reason: TerminateReason) -> StepOutcome {
        self.release_held_keys();
        if !self.stack.is_empty() {
            debug!("Run ended with {} open frame(s)", self.stack.len());
        }
        self.terminated = Some(reason.clone());
        StepOutcome::Terminate(reason)
    }

    fn fail(&mut self, err: EngineError) -> EngineError {
        error!("Script '{}' failed: {}", self.script.name(), err);
        self.finish(TerminateReason::Failed(err.to_string()));
        err
    }

    fn release_held_keys(&mut self) {
        while let Some(key) = self.held_keys.pop() {
            debug!("Releasing held key {}", key);
            if let Err(e) = self.sink.execute(&InputAction::KeyUp(key.clone())) {
                warn!("Failed to release key {}: {}", key, e);
            }
        }
    }

    fn execute(&mut self, index: usize, action: &Action) -> Result<Flow, Failure> {
        match action {
            Action::Click(button, target) => self.click(index, *button, target)?,
            Action::KeyDown(key) => {
                self.send(index, InputAction::KeyDown(key.clone()))?;
                if !self.held_keys.contains(key) {
                    self.held_keys.push(key.clone());
                }
            }
            Action::KeyUp(key) => {
                self.send(index, InputAction::KeyUp(key.clone()))?;
                self.held_keys.retain(|held| held != key);
                self.pause(self.config.key_pause())?;
            }
            Action::Pause(duration) => self.pause(seconds(*duration))?,
            Action::WriteText(text) => self.send(index, InputAction::Type(text.clone()))?,
            Action::RunTo(label) => self.jump(label, index)?,
            Action::BlockStart(name) => self.pc = self.block_end(index, name)? + 1,
            Action::BlockEnd => self.return_from_block(index),
            Action::Label(_) => {}
            Action::LoopStart(count) => self.stack.push(Frame::Loop {
                start: index,
                remaining: i64::from(*count),
            }),
            Action::LoopEnd => self.loop_end(index),
            Action::FieldLoopStart(field) => {
                let remaining = self.data.remaining(field).map_err(PlaybackFault::from)?;
                debug!("Field {} has {} value(s) left", field, remaining);
                self.stack.push(Frame::Loop {
                    start: index,
                    remaining: remaining as i64,
                });
            }
            Action::FieldNext(field) => self.data.advance(field).map_err(PlaybackFault::from)?,
            Action::FieldRead(field) => {
                let value = self.data.read(field).map_err(PlaybackFault::from)?;
                self.send(index, InputAction::Type(value))?;
            }
            Action::ErrorPolicySet(category, policy) => {
                debug!("Policy for {} set to {}", category, policy);
                self.policies.set(*category, policy.clone());
            }
            Action::DialogStop(message) => {
                return Ok(Flow::Suspend(DialogRequest {
                    message: message.clone(),
                    index,
                    category: None,
                    labels: self.script.labels(),
                }));
            }
            Action::ClipboardShortcut(kind) => self.send(index, InputAction::Shortcut(*kind))?,
            Action::Stop => return Ok(Flow::Terminate(TerminateReason::StopCommand)),
        }
        Ok(Flow::Next)
    }

    fn send(&mut self, index: usize, action: InputAction) -> Result<(), Failure> {
        self.sink.execute(&action).map_err(|err| match PlaybackFault::try_from(err) {
            Ok(fault) => Failure::Fault(fault),
            Err(SinkError::Search(SearchError::Cancelled)) => Failure::Cancelled,
            Err(source) => Failure::Fatal(EngineError::Sink { index, source }),
        })
    }

    fn pause(&self, duration: Duration) -> Result<(), Failure> {
        if self.stop.sleep(duration) {
            Ok(())
        } else {
            Err(Failure::Cancelled)
        }
    }

    fn click(&mut self, index: usize, button: ClickButton, target: &ClickTarget) -> Result<(), Failure> {
        let policy = self.config.search.with_overrides(&target.overrides);
        let expected = (target.x, target.y);
        let template = target.template.as_deref();
        let located = if policy.expect_absent {
            Inverted(&self.locator).locate(template, expected, &policy, &self.stop)
        } else {
            self.locator.locate(template, expected, &policy, &self.stop)
        };
        match located {
            Ok(at) => {
                self.send(index, InputAction::Click { button, at })?;
                self.pause(self.config.click_pause())
            }
            Err(SearchError::Cancelled) => Err(Failure::Cancelled),
            Err(SearchError::Capture(message)) => Err(Failure::Fatal(EngineError::Capture { index, message })),
            Err(err) => {
                if *self.policies.get(ErrorCategory::ElementNotFound) == ErrorPolicy::Ignore {
                    debug!("Clicking ({}, {}) despite: {}", expected.0, expected.1, err);
                    self.send(index, InputAction::Click { button, at: expected })?;
                    self.pause(self.config.click_pause())?;
                }
                Err(Failure::Fault(err.into()))
            }
        }
    }

    /// Moves to the command after `label`. A block target records `from` as
    /// the call site its `BlockEnd` returns to.
    fn jump(&mut self, label: &str, from: usize) -> Result<(), EngineError> {
        let target = self
            .script
            .label_index(label)
            .ok_or_else(|| EngineError::UnknownLabel(label.to_string()))?;
        if let Some(Action::BlockStart(name)) = self.script.get(target).map(|c| &c.action) {
            self.block_end(target, name)?;
            self.stack.push(Frame::Return { call_site: from });
            debug!("Calling block {} from {}", label, from);
        } else {
            debug!("Jumping to label {} from {}", label, from);
        }
        self.pc = target + 1;
        Ok(())
    }

    /// Index of the `BlockEnd` closing the block that starts at `start`.
    fn block_end(&self, start: usize, name: &str) -> Result<usize, EngineError> {
        for (index, command) in self.script.commands().iter().enumerate().skip(start + 1) {
            match &command.action {
                Action::BlockEnd => return Ok(index),
                Action::BlockStart(inner) => {
                    return Err(EngineError::NestedBlocks {
                        outer: name.to_string(),
                        inner: inner.clone(),
                        index,
                    })
                }
                _ => {}
            }
        }
        Err(EngineError::UnterminatedBlock(name.to_string()))
    }

    fn return_from_block(&mut self, index: usize) {
        let Some(depth) = self
            .stack
            .iter()
            .rposition(|frame| matches!(frame, Frame::Return { .. }))
        else {
            debug!("Block end at {} with no caller, continuing", index);
            return;
        };
        if depth + 1 < self.stack.len() {
            warn!(
                "Block end at {} discards {} unfinished loop(s)",
                index,
                self.stack.len() - depth - 1
            );
        }
        if let Some(Frame::Return { call_site }) = self.stack.drain(depth..).next() {
            self.pc = call_site + 1;
        }
    }

    fn loop_end(&mut self, index: usize) {
        match self.stack.pop() {
            Some(Frame::Loop { start, remaining }) => {
                if remaining - 1 > 0 {
                    self.stack.push(Frame::Loop {
                        start,
                        remaining: remaining - 1,
                    });
                    self.pc = start + 1;
                }
            }
            Some(frame) => {
                warn!("Loop end at {} does not close a loop, ignoring", index);
                self.stack.push(frame);
            }
            None => debug!("Loop end at {} with no open loop, continuing", index),
        }
    }

    fn handle_fault(&mut self, index: usize, fault: PlaybackFault) -> Result<StepOutcome, EngineError> {
        let policy = self.policies.get(fault.category).clone();
        warn!(
            "Command {} failed ({}): {}; policy {}",
            index, fault.category, fault.message, policy
        );
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(self.script.name(), index, &fault.message) {
                warn!("Failed to write error journal {}: {}", journal.path().display(), e);
            }
        }
        self.faults.push(FaultRecord {
            index,
            fault: fault.clone(),
            policy: policy.clone(),
        });

        match policy {
            ErrorPolicy::Stop => Ok(self.finish(TerminateReason::PolicyStop {
                index,
                message: fault.message,
            })),
            ErrorPolicy::Ignore => Ok(StepOutcome::Continue),
            ErrorPolicy::Dialog => {
                let request = DialogRequest {
                    message: fault.message,
                    index,
                    category: Some(fault.category),
                    labels: self.script.labels(),
                };
                self.suspended = Some((index, request.clone()));
                Ok(StepOutcome::Suspend(request))
            }
            ErrorPolicy::JumpToLabel(label) => match self.jump(&label, index) {
                Ok(()) => Ok(StepOutcome::Continue),
                Err(err) => Err(self.fail(err)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;

    fn cmd(action: Action) -> Command {
        Command::new(action)
    }

    fn engine(commands: Vec<Command>) -> (Engine, RecordingSink) {
        let sink = RecordingSink::new();
        let script = Script::new("test", commands).unwrap();
        let engine = Engine::new(script, Configuration::immediate()).with_sink(sink.clone());
        (engine, sink)
    }

    #[test]
    fn test_step_advances_one_command() {
        let (mut engine, sink) = engine(vec![
            cmd(Action::WriteText("a".into())),
            cmd(Action::WriteText("b".into())),
        ]);
        assert_eq!(engine.step().unwrap(), StepOutcome::Continue);
        assert_eq!(engine.pc(), 1);
        assert_eq!(sink.typed(), vec!["a"]);
        engine.step().unwrap();
        assert_eq!(
            engine.step().unwrap(),
            StepOutcome::Terminate(TerminateReason::Finished)
        );
        assert_eq!(
            engine.step().unwrap(),
            StepOutcome::Terminate(TerminateReason::Finished)
        );
    }

    #[test]
    fn test_loop_end_with_empty_stack_is_ignored() {
        let (mut engine, sink) = engine(vec![
            cmd(Action::LoopEnd),
            cmd(Action::BlockEnd),
            cmd(Action::WriteText("after".into())),
        ]);
        let report = engine.run().unwrap();
        assert_eq!(report.reason, TerminateReason::Finished);
        assert_eq!(sink.typed(), vec!["after"]);
    }

    #[test]
    fn test_loop_end_leaves_return_frame_alone() {
        let (mut engine, _) = engine(vec![
            cmd(Action::RunTo("b".into())),
            cmd(Action::Stop),
            cmd(Action::BlockStart("b".into())),
            cmd(Action::LoopEnd),
            cmd(Action::BlockEnd),
        ]);
        engine.step().unwrap();
        engine.step().unwrap();
        assert_eq!(engine.stack(), &[Frame::Return { call_site: 0 }]);
        engine.step().unwrap();
        assert!(engine.stack().is_empty());
        assert_eq!(engine.pc(), 1);
    }

    #[test]
    fn test_stop_command_releases_held_keys() {
        let (mut engine, sink) = engine(vec![
            cmd(Action::KeyDown("shift".into())),
            cmd(Action::KeyDown("a".into())),
            cmd(Action::Stop),
        ]);
        let report = engine.run().unwrap();
        assert_eq!(report.reason, TerminateReason::StopCommand);
        assert_eq!(
            sink.actions()[2..],
            [
                InputAction::KeyUp("a".into()),
                InputAction::KeyUp("shift".into())
            ]
        );
        assert!(engine.held_keys().is_empty());
    }

    #[test]
    fn test_unknown_jump_label_is_fatal() {
        let (mut engine, _) = engine(vec![cmd(Action::RunTo("nowhere".into()))]);
        assert_eq!(
            engine.run().unwrap_err(),
            EngineError::UnknownLabel("nowhere".into())
        );
        assert!(matches!(
            engine.step().unwrap(),
            StepOutcome::Terminate(TerminateReason::Failed(_))
        ));
    }

    #[test]
    fn test_unterminated_block_is_fatal() {
        let (mut engine, _) = engine(vec![cmd(Action::BlockStart("b".into()))]);
        assert_eq!(
            engine.run().unwrap_err(),
            EngineError::UnterminatedBlock("b".into())
        );
    }

    #[test]
    fn test_duplicate_labels_rejected_by_script() {
        let err = Script::new(
            "dup",
            vec![cmd(Action::Label("a".into())), cmd(Action::BlockStart("a".into()))],
        )
        .unwrap_err();
        assert_eq!(err, LabelError::AlreadyExists("a".into()));
    }

    #[test]
    fn test_policy_set_takes_effect() {
        let (mut engine, _) = engine(vec![
            cmd(Action::ErrorPolicySet(ErrorCategory::DataExhausted, ErrorPolicy::Stop)),
            cmd(Action::FieldRead("missing".into())),
        ]);
        let report = engine.run().unwrap();
        assert!(matches!(report.reason, TerminateReason::PolicyStop { index: 1, .. }));
        assert_eq!(engine.policies().data_exhausted, ErrorPolicy::Stop);
    }
}
