use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::{Engine, RunReport};
use crate::errors::{ClickScriptError, EngineError};
use crate::session::{Mode, Session};
use crate::signal::StopSignal;

/// A script running on its own worker thread.
#[derive(Debug)]
pub struct PlaybackHandle {
    stop: StopSignal,
    join: JoinHandle<Result<RunReport, EngineError>>,
}

impl PlaybackHandle {
    /// Requests a cooperative stop. The worker ends after the current
    /// command or pause.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn join(self) -> Result<RunReport, EngineError> {
        self.join
            .join()
            .map_err(|_| EngineError::Worker("playback thread panicked".to_string()))?
    }
}

/// Starts `engine` on a worker thread after `start_delay`.
///
/// The session stays in [`Mode::Playing`] until the worker returns, so a
/// recording cannot start in the meantime.
pub fn spawn(
    engine: Engine,
    session: &Session,
    start_delay: Duration,
) -> Result<PlaybackHandle, ClickScriptError> {
    let guard = session.begin(Mode::Playing)?;
    let stop = engine.stop_signal();
    let worker_stop = stop.clone();
    let join = thread::Builder::new()
        .name("clickscript-player".to_string())
        .spawn(move || {
            let _guard = guard;
            let mut engine = engine;
            if !start_delay.is_zero() {
                info!("Playback starts in {:?}", start_delay);
                if !worker_stop.sleep(start_delay) {
                    warn!("Playback cancelled before it started");
                }
            }
            engine.run()
        })
        .map_err(|e| EngineError::Worker(format!("failed to start playback thread: {e}")))?;
    Ok(PlaybackHandle { stop, join })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Action, Command};
    use crate::config::Configuration;
    use crate::engine::{Script, TerminateReason};
    use crate::errors::SessionError;

    fn looping_script() -> Script {
        Script::new(
            "loop",
            vec![
                Command::new(Action::Label("A".into())),
                Command::new(Action::Pause(0.01)),
                Command::new(Action::RunTo("A".into())),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_playback_holds_session_until_joined() {
        let session = Session::new();
        let engine = Engine::new(looping_script(), Configuration::immediate());
        let handle = spawn(engine, &session, Duration::ZERO).unwrap();

        assert!(matches!(
            session.begin(Mode::Recording),
            Err(SessionError::Busy { active: Mode::Playing, .. })
        ));

        handle.stop();
        let report = handle.join().unwrap();
        assert_eq!(report.reason, TerminateReason::Cancelled);
        assert_eq!(session.mode(), Mode::Idle);
    }

    #[test]
    fn test_stop_during_start_delay() {
        let session = Session::new();
        let engine = Engine::new(looping_script(), Configuration::immediate());
        let handle = spawn(engine, &session, Duration::from_secs(60)).unwrap();
        handle.stop();
        let report = handle.join().unwrap();
        assert_eq!(report.reason, TerminateReason::Cancelled);
        assert_eq!(report.steps, 0);
    }
}
