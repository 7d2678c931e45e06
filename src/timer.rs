//! Call duration tracking
//!
//! Elapsed time is computed on read from a start instant, so there is no
//! background tick task to clean up.

use std::time::Instant;

use crate::formatters::format_duration;

/// Tracks elapsed call duration from the moment the call is answered.
#[derive(Debug, Default)]
pub struct CallTimer {
    started_at: Option<Instant>,
    /// Elapsed seconds frozen by `stop()`.
    frozen_secs: Option<u64>,
}

impl CallTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer from now.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.frozen_secs = None;
    }

    /// Stop the timer, freezing the elapsed duration.
    pub fn stop(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.frozen_secs = Some(started.elapsed().as_secs());
        }
    }

    /// Reset to the initial zero state.
    pub fn reset(&mut self) {
        self.started_at = None;
        self.frozen_secs = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Elapsed whole seconds: live while running, frozen after `stop()`,
    /// zero after `reset()` or before the first `start()`.
    pub fn elapsed_secs(&self) -> u64 {
        match (self.started_at, self.frozen_secs) {
            (Some(started), _) => started.elapsed().as_secs(),
            (None, Some(frozen)) => frozen,
            (None, None) => 0,
        }
    }

    /// Elapsed duration as a display string (`MM:SS` or `HH:MM:SS`).
    pub fn display(&self) -> String {
        format_duration(self.elapsed_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let timer = CallTimer::new();
        assert!(!timer.is_running());
        assert_eq!(timer.elapsed_secs(), 0);
        assert_eq!(timer.display(), "00:00");
    }

    #[test]
    fn test_start_stop_freezes() {
        let mut timer = CallTimer::new();
        timer.start();
        assert!(timer.is_running());
        timer.stop();
        assert!(!timer.is_running());
        let frozen = timer.elapsed_secs();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(timer.elapsed_secs(), frozen);
    }

    #[test]
    fn test_reset_clears_frozen() {
        let mut timer = CallTimer::new();
        timer.start();
        timer.stop();
        timer.reset();
        assert_eq!(timer.elapsed_secs(), 0);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut timer = CallTimer::new();
        timer.stop();
        assert_eq!(timer.elapsed_secs(), 0);
    }
}
