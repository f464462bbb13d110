//! Hand-off between a playback worker and the person watching it.
//!
//! The worker blocks in [`Operator::ask`]; the foreground side receives the
//! request from an [`OperatorHandle`] and answers it without blocking itself.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::policy::ErrorCategory;

/// Why playback stopped to ask, and what can be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogRequest {
    pub message: String,
    /// Index of the command that raised the dialog
    pub index: usize,
    /// `None` for an explicit `DialogStop` command
    pub category: Option<ErrorCategory>,
    /// Jump targets available in the running script
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogChoice {
    /// Go on with the command after the one that raised the dialog
    Continue,
    JumpTo(String),
    /// Start the script again from the first command
    Restart,
    Stop,
}

pub trait Operator: Send {
    fn ask(&mut self, request: &DialogRequest) -> DialogChoice;
}

impl<O: Operator + ?Sized> Operator for Box<O> {
    fn ask(&mut self, request: &DialogRequest) -> DialogChoice {
        (**self).ask(request)
    }
}

/// Answers every dialog with `Stop`. Used when nobody is watching.
#[derive(Debug, Default, Clone, Copy)]
pub struct StopOperator;

impl Operator for StopOperator {
    fn ask(&mut self, request: &DialogRequest) -> DialogChoice {
        warn!("No operator attached, stopping at command {}: {}", request.index, request.message);
        DialogChoice::Stop
    }
}

/// Replies from a fixed list, then `Stop`. Requests are kept for inspection.
#[derive(Debug, Default, Clone)]
pub struct ScriptedOperator {
    choices: VecDeque<DialogChoice>,
    requests: Arc<Mutex<Vec<DialogRequest>>>,
}

impl ScriptedOperator {
    pub fn new<I: IntoIterator<Item = DialogChoice>>(choices: I) -> Self {
        Self {
            choices: choices.into_iter().collect(),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<DialogRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Operator for ScriptedOperator {
    fn ask(&mut self, request: &DialogRequest) -> DialogChoice {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.choices.pop_front().unwrap_or(DialogChoice::Stop)
    }
}

/// A dialog waiting for an answer on the foreground side.
#[derive(Debug)]
pub struct PendingDialog {
    pub request: DialogRequest,
    reply: oneshot::Sender<DialogChoice>,
}

impl PendingDialog {
    pub fn respond(self, choice: DialogChoice) {
        if self.reply.send(choice).is_err() {
            warn!("Playback worker went away before the dialog was answered");
        }
    }
}

/// Worker side of the channel pair.
#[derive(Debug, Clone)]
pub struct ChannelOperator {
    tx: mpsc::Sender<PendingDialog>,
}

/// Foreground side of the channel pair.
#[derive(Debug)]
pub struct OperatorHandle {
    rx: mpsc::Receiver<PendingDialog>,
}

impl ChannelOperator {
    pub fn channel() -> (ChannelOperator, OperatorHandle) {
        let (tx, rx) = mpsc::channel(1);
        (ChannelOperator { tx }, OperatorHandle { rx })
    }
}

impl Operator for ChannelOperator {
    /// Blocks the calling thread. Must not be called from inside an async
    /// runtime.
    fn ask(&mut self, request: &DialogRequest) -> DialogChoice {
        let (reply, answer) = oneshot::channel();
        let pending = PendingDialog {
            request: request.clone(),
            reply,
        };
        if self.tx.blocking_send(pending).is_err() {
            warn!("Operator handle dropped, stopping playback");
            return DialogChoice::Stop;
        }
        answer.blocking_recv().unwrap_or(DialogChoice::Stop)
    }
}

impl OperatorHandle {
    pub async fn next(&mut self) -> Option<PendingDialog> {
        self.rx.recv().await
    }
}
