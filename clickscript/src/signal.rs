use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative stop flag shared between a playback worker and whoever
/// controls it.
///
/// Cloning shares the flag. Sleeping through [`StopSignal::sleep`] wakes up
/// as soon as a stop is requested instead of waiting out the full duration.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake every sleeper.
    pub fn stop(&self) {
        let (flag, condvar) = &*self.inner;
        let mut stopped = flag.lock().unwrap_or_else(|e| e.into_inner());
        *stopped = true;
        condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clears a previous stop request so the signal can be reused.
    pub fn reset(&self) {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    /// Sleeps for `duration`. Returns `false` if a stop was requested before
    /// or during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut stopped = flag.lock().unwrap_or_else(|e| e.into_inner());
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            stopped = match condvar.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        false
    }
}
