//! Debounced preloader - delays lookahead preload after track changes.
//!
//! Rapid successive edits (dragging a clip, scrubbing a slider) should
//! not flood the decoders with preload work. The current frame renders
//! immediately; the full lookahead preload fires only once edits have
//! been quiet for the configured delay. Re-scheduling resets the timer.

use std::time::{Duration, Instant};

/// Debounce timer for lookahead preload.
#[derive(Debug, Clone)]
pub struct DebouncedPreloader {
    delay: Duration,
    trigger_at: Option<Instant>,
}

impl Default for DebouncedPreloader {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            trigger_at: None,
        }
    }
}

impl DebouncedPreloader {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            trigger_at: None,
        }
    }

    pub fn set_delay(&mut self, delay_ms: u64) {
        self.delay = Duration::from_millis(delay_ms);
    }

    /// Schedule (or re-schedule) a preload after the delay.
    pub fn schedule(&mut self) {
        self.trigger_at = Some(Instant::now() + self.delay);
        log::trace!("Preload scheduled in {}ms", self.delay.as_millis());
    }

    pub fn cancel(&mut self) {
        self.trigger_at = None;
    }

    pub fn is_pending(&self) -> bool {
        self.trigger_at.is_some()
    }

    /// True exactly once, when the delay has elapsed.
    pub fn tick(&mut self) -> bool {
        match self.trigger_at {
            Some(at) if Instant::now() >= at => {
                self.trigger_at = None;
                log::trace!("Preload triggered");
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Test: no immediate trigger
    /// Validates: tick right after schedule stays pending
    #[test]
    fn test_immediate_no_trigger() {
        let mut p = DebouncedPreloader::new(100);
        p.schedule();
        assert!(p.is_pending());
        assert!(!p.tick());
    }

    /// Test: trigger after delay
    /// Validates: tick fires once and clears pending state
    #[test]
    fn test_trigger_after_delay() {
        let mut p = DebouncedPreloader::new(10);
        p.schedule();
        thread::sleep(Duration::from_millis(15));
        assert!(p.tick());
        assert!(!p.is_pending());
        assert!(!p.tick());
    }

    /// Test: debounce resets timer
    /// Validates: re-scheduling pushes the trigger out
    #[test]
    fn test_debounce_resets_timer() {
        let mut p = DebouncedPreloader::new(50);
        p.schedule();
        thread::sleep(Duration::from_millis(30));
        p.schedule();
        assert!(!p.tick());
        assert!(p.is_pending());
    }
}
