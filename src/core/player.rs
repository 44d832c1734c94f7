//! Playback clock with frame-accurate timing.
//!
//! **Why**: Playback must advance by frame count derived from elapsed
//! wall time, not by render ticks. If a cycle runs late the clock
//! advances further; if frames are slow to decode the compositor shows
//! fallbacks but the clock does not drift.
//!
//! The player owns only timeline position and play state. It knows
//! nothing about clips or decoders; the engine feeds it the content
//! end every update.

use std::time::Instant;

use log::trace;

/// Playback state for one timeline.
#[derive(Debug, Clone)]
pub struct Player {
    current_frame: i64,
    playing: bool,
    fps: f64,
    loop_enabled: bool,
    /// 1.0 forward, -1.0 backward.
    direction: f64,
    last_frame_time: Option<Instant>,
}

impl Player {
    pub fn new(fps: f64) -> Self {
        Self {
            current_frame: 0,
            playing: false,
            fps: if fps > 0.0 { fps } else { 24.0 },
            loop_enabled: true,
            direction: 1.0,
            last_frame_time: None,
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn set_fps(&mut self, fps: f64) {
        if fps > 0.0 {
            self.fps = fps;
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current_frame(&self) -> i64 {
        self.current_frame
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn direction(&self) -> f64 {
        self.direction
    }

    pub fn set_direction(&mut self, dir: f64) {
        self.direction = if dir < 0.0 { -1.0 } else { 1.0 };
    }

    pub fn play(&mut self) {
        if !self.playing {
            self.playing = true;
            self.last_frame_time = Some(Instant::now());
            trace!("Playback started at frame {}", self.current_frame);
        }
    }

    pub fn pause(&mut self) {
        if self.playing {
            self.playing = false;
            self.last_frame_time = None;
            trace!("Playback paused at frame {}", self.current_frame);
        }
    }

    pub fn toggle(&mut self) {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Jump to `frame`, clamped into `[0, content_end]`.
    pub fn set_frame(&mut self, frame: i64, content_end: i64) {
        self.current_frame = frame.clamp(0, content_end.max(0));
        self.last_frame_time = None;
    }

    /// Advance based on elapsed time. Returns the new frame when the
    /// position changed. `content_end` is the last timeline frame with
    /// content (exclusive end of the furthest clip, minus one).
    pub fn update(&mut self, content_end: i64) -> Option<i64> {
        if !self.playing || content_end < 0 {
            return None;
        }

        let now = Instant::now();
        let Some(last) = self.last_frame_time else {
            self.last_frame_time = Some(now);
            return None;
        };

        let elapsed = now.duration_since(last).as_secs_f64();
        let frame_duration = 1.0 / self.fps;
        if elapsed < frame_duration {
            return None;
        }

        // Advance by whole frames; keep the remainder in the clock so
        // timing stays frame-accurate across slow cycles.
        let steps = (elapsed / frame_duration).floor() as i64;
        self.last_frame_time = Some(now);

        let delta = if self.direction >= 0.0 { steps } else { -steps };
        let target = self.current_frame + delta;

        let new_frame = if target > content_end {
            if self.loop_enabled {
                trace!("Frame loop: {} -> 0", self.current_frame);
                0
            } else {
                trace!("Reached content end, stopping");
                self.playing = false;
                content_end
            }
        } else if target < 0 {
            if self.loop_enabled {
                trace!("Frame loop: {} -> {}", self.current_frame, content_end);
                content_end
            } else {
                self.playing = false;
                0
            }
        } else {
            target
        };

        if new_frame != self.current_frame {
            self.current_frame = new_frame;
            Some(new_frame)
        } else {
            None
        }
    }

    /// Step by N frames while paused (scrub helper).
    pub fn step(&mut self, count: i64, content_end: i64) {
        self.set_frame(self.current_frame + count, content_end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    /// Test: paused player holds position
    /// Validates: update without play never advances
    #[test]
    fn test_paused_holds() {
        let mut p = Player::new(30.0);
        assert_eq!(p.update(100), None);
        assert_eq!(p.current_frame(), 0);
    }

    /// Test: elapsed-time advancement
    /// Validates: playback advances roughly at the configured fps
    #[test]
    fn test_advances_with_time() {
        let mut p = Player::new(100.0); // 10ms per frame
        p.play();
        let _ = p.update(1000); // arms the clock
        thread::sleep(Duration::from_millis(35));
        let advanced = p.update(1000).expect("advanced");
        assert!((2..=6).contains(&advanced), "got {}", advanced);
    }

    /// Test: loop at end
    /// Validates: looping wraps to frame 0, non-loop stops at the end
    #[test]
    fn test_loop_and_stop() {
        let mut p = Player::new(100.0);
        p.set_frame(10, 10);
        p.play();
        let _ = p.update(10);
        thread::sleep(Duration::from_millis(15));
        assert_eq!(p.update(10), Some(0));
        assert!(p.is_playing());

        let mut p = Player::new(100.0);
        p.set_loop_enabled(false);
        p.set_frame(10, 10);
        p.play();
        let _ = p.update(10);
        thread::sleep(Duration::from_millis(15));
        // Already at the end: position stays, playback stops.
        let _ = p.update(10);
        assert!(!p.is_playing());
        assert_eq!(p.current_frame(), 10);
    }

    /// Test: seek clamping
    /// Validates: set_frame clamps into the content range
    #[test]
    fn test_seek_clamp() {
        let mut p = Player::new(30.0);
        p.set_frame(500, 100);
        assert_eq!(p.current_frame(), 100);
        p.set_frame(-5, 100);
        assert_eq!(p.current_frame(), 0);
    }

    /// Test: backward playback
    /// Validates: negative direction walks toward zero
    #[test]
    fn test_backward() {
        let mut p = Player::new(100.0);
        p.set_frame(5, 100);
        p.set_direction(-1.0);
        p.play();
        let _ = p.update(100);
        thread::sleep(Duration::from_millis(15));
        let f = p.update(100).expect("moved");
        assert!(f < 5);
    }
}
