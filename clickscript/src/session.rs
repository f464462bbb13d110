use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::errors::SessionError;

/// What the application is doing with the program right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Idle,
    Recording,
    Playing,
    /// Manual program edits. Only ever requested, never held.
    Editing,
}

/// Guard that keeps recording, playback and manual edits apart.
///
/// Clones share the same state. At most one of recording or playback is
/// active at a time; the mode returns to `Idle` when the [`ModeGuard`] drops.
#[derive(Debug, Clone)]
pub struct Session {
    mode: Arc<Mutex<Mode>>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            mode: Arc::new(Mutex::new(Mode::Idle)),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn begin(&self, requested: Mode) -> Result<ModeGuard, SessionError> {
        let mut mode = self.mode.lock().unwrap_or_else(|e| e.into_inner());
        if *mode != Mode::Idle || !matches!(requested, Mode::Recording | Mode::Playing) {
            return Err(SessionError::Busy {
                active: *mode,
                requested,
            });
        }
        *mode = requested;
        debug!("Session entered {:?}", requested);
        Ok(ModeGuard {
            mode: self.mode.clone(),
        })
    }

    /// Fails unless nothing is recording or playing.
    pub fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.mode() {
            Mode::Idle => Ok(()),
            active => Err(SessionError::Busy {
                active,
                requested: Mode::Editing,
            }),
        }
    }
}

#[derive(Debug)]
pub struct ModeGuard {
    mode: Arc<Mutex<Mode>>,
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        let mut mode = self.mode.lock().unwrap_or_else(|e| e.into_inner());
        debug!("Session left {:?}", *mode);
        *mode = Mode::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_and_playback_exclude_each_other() {
        let session = Session::new();
        let guard = session.begin(Mode::Recording).unwrap();
        assert_eq!(
            session.begin(Mode::Playing).unwrap_err(),
            SessionError::Busy {
                active: Mode::Recording,
                requested: Mode::Playing
            }
        );
        assert!(session.ensure_idle().is_err());
        drop(guard);
        assert_eq!(session.mode(), Mode::Idle);
        let _playing = session.begin(Mode::Playing).unwrap();
        assert_eq!(session.clone().mode(), Mode::Playing);
    }

    #[test]
    fn test_idle_and_editing_cannot_be_held() {
        let session = Session::new();
        assert!(session.begin(Mode::Idle).is_err());
        assert!(session.begin(Mode::Editing).is_err());
        assert!(session.ensure_idle().is_ok());
    }
}
