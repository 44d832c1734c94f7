//! Decoder seam - the boundary between the engine and media backends.
//!
//! **Why**: The core performs no media I/O itself. Bytes arrive through
//! opaque source URLs resolved by whatever media layer embeds the
//! engine, so decoding hides behind a trait with a poll-style API: the
//! render loop never blocks on a backend, it requests a seek, reads the
//! readiness level and takes whatever frame is available.
//!
//! **Used by**: Source Registry (one lane per source URL), Dual-Buffer
//! Continuity Unit (slot bindings over registry lanes).
//!
//! Both the registry and the continuity unit manage decoders through
//! the same `DecoderLane` wrapper. The registry applies it per source
//! URL, the continuity unit per playback slot; the lane is the single
//! decoder-management abstraction either way.

use std::fmt;

use super::frame::Frame;

/// Buffered-data level reported by a decoder, lowest to highest.
///
/// Mirrors the classic media-element ready states: `Future` means the
/// current position plus at least a little lookahead is decodable,
/// `Enough` means sustained forward playback is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Readiness {
    Idle = 0,
    Metadata = 1,
    Current = 2,
    Future = 3,
    Enough = 4,
}

impl Readiness {
    #[inline]
    pub fn at_least(self, min: Readiness) -> bool {
        self >= min
    }
}

/// Decoder backend errors
#[derive(Debug)]
pub enum DecoderError {
    Open(String),
    Seek(String),
    Backend(String),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderError::Open(e) => write!(f, "Open error: {}", e),
            DecoderError::Seek(e) => write!(f, "Seek error: {}", e),
            DecoderError::Backend(e) => write!(f, "Backend error: {}", e),
        }
    }
}

impl std::error::Error for DecoderError {}

/// A stateful decode handle bound to one media source at a time.
///
/// All methods are non-blocking. Asynchronous backends deliver decoded
/// frames on their own schedule; `pump()` gives them a hook on the
/// engine thread once per render cycle, and `sample(time)` returns a
/// frame only once the backend actually has it. Callers re-check
/// relevance of whatever arrives, so backends never need cancellation.
pub trait Decoder: Send {
    /// Bind this decoder to a source URL. Implicitly closes any
    /// previously bound source.
    fn open(&mut self, url: &str) -> Result<(), DecoderError>;

    /// Release the bound source and all decoded data.
    fn close(&mut self);

    /// Request a seek to `time` seconds. Non-blocking; completion shows
    /// up as `position()` converging and readiness recovering.
    fn seek(&mut self, time: f64);

    /// Match the decoder's play state to the timeline's.
    fn set_playing(&mut self, playing: bool);

    /// Current decode position in seconds.
    fn position(&self) -> f64;

    /// Current buffered-data level.
    fn readiness(&self) -> Readiness;

    /// Immutable snapshot of the decoded frame at `time`, if the
    /// backend has one. Never blocks.
    fn sample(&self, time: f64) -> Option<Frame>;

    /// Snapshot at the current position.
    fn snapshot(&self) -> Option<Frame> {
        self.sample(self.position())
    }

    /// Intrinsic media dimensions, once known.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Native frame rate, if the backend knows it.
    fn native_fps(&self) -> Option<f64> {
        None
    }

    /// Hint: decode these source frames in the background.
    fn prefetch(&mut self, _frames: &[i64], _fps: f64) {}

    /// Per-cycle housekeeping on the engine thread.
    fn pump(&mut self) {}
}

/// Creates decoders for source URLs. Injected into the engine at
/// session start; the registry calls it on first registration of a
/// source.
pub trait DecoderFactory: Send {
    fn create(&self, url: &str) -> Result<Box<dyn Decoder>, DecoderError>;
}

/// One decoder plus its binding state.
///
/// The registry owns one lane per normalized source URL; the continuity
/// unit references those lanes by URL. Nothing else touches a decoder
/// directly.
pub struct DecoderLane {
    decoder: Box<dyn Decoder>,
    url: Option<String>,
    playing: bool,
}

impl DecoderLane {
    pub fn new(decoder: Box<dyn Decoder>) -> Self {
        Self {
            decoder,
            url: None,
            playing: false,
        }
    }

    /// Bind to a source URL (closes the previous binding).
    pub fn bind(&mut self, url: &str) -> Result<(), DecoderError> {
        if self.url.as_deref() == Some(url) {
            return Ok(());
        }
        self.decoder.open(url)?;
        self.url = Some(url.to_string());
        self.playing = false;
        Ok(())
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Seek only when off-target by more than `tolerance` seconds.
    /// Returns true if a seek was issued.
    pub fn seek_if_needed(&mut self, target: f64, tolerance: f64) -> bool {
        if (self.decoder.position() - target).abs() > tolerance {
            self.decoder.seek(target);
            true
        } else {
            false
        }
    }

    pub fn set_playing(&mut self, playing: bool) {
        if self.playing != playing {
            self.playing = playing;
            self.decoder.set_playing(playing);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn position(&self) -> f64 {
        self.decoder.position()
    }

    pub fn readiness(&self) -> Readiness {
        self.decoder.readiness()
    }

    pub fn sample(&self, time: f64) -> Option<Frame> {
        self.decoder.sample(time)
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.decoder.dimensions()
    }

    pub fn native_fps(&self) -> Option<f64> {
        self.decoder.native_fps()
    }

    pub fn prefetch(&mut self, frames: &[i64], fps: f64) {
        self.decoder.prefetch(frames, fps);
    }

    pub fn pump(&mut self) {
        self.decoder.pump();
    }

    /// Stop the decoder and release its resources.
    pub fn shutdown(&mut self) {
        self.decoder.set_playing(false);
        self.decoder.close();
        self.url = None;
        self.playing = false;
    }
}
