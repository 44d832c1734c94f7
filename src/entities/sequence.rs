//! Built-in image-sequence/still decoder backend.
//!
//! Decodes `seq://` sources: a single still file, a `*` glob or a
//! printf-style `%04d` pattern naming a numbered frame sequence. Frames
//! decode on the shared worker pool and land in a shared map; the
//! engine thread observes them through `sample()` on later cycles.
//!
//! This backend exists so the engine is usable and testable end to end
//! without an external video stack. Streaming video decoders plug in
//! through the same `Decoder` trait.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::workers::Workers;
use super::decoder::{Decoder, DecoderError, DecoderFactory, Readiness};
use super::frame::{Frame, FrameError};

/// Frames decoded ahead of the playhead while playing.
const PREFETCH_AHEAD: usize = 24;

/// A pending decode older than this is assumed lost (stale epoch,
/// failed worker) and becomes retryable.
const PENDING_EXPIRE: Duration = Duration::from_secs(2);

/// Consecutive loaded frames required to report `Enough`.
const ENOUGH_RUN: usize = 6;

static PRINTF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%0(\d+)d").expect("printf pattern regex"));

/// Convert a printf-style pattern (`frame.%04d.png`) to a glob.
fn printf_to_glob(pattern: &str) -> Option<String> {
    if PRINTF_PATTERN.is_match(pattern) {
        Some(PRINTF_PATTERN.replace_all(pattern, "*").to_string())
    } else {
        None
    }
}

/// Expand a source path into an ordered frame list.
fn expand_frames(path: &str) -> Result<Vec<PathBuf>, DecoderError> {
    let globbed = if path.contains('*') {
        Some(path.to_string())
    } else {
        printf_to_glob(path)
    };

    let Some(pattern) = globbed else {
        // Single still file: one frame serves every time.
        return Ok(vec![PathBuf::from(path)]);
    };

    let mut frames: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| DecoderError::Open(format!("Bad pattern {}: {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .collect();
    frames.sort();

    debug!("Expanded sequence {}: {} frames", pattern, frames.len());
    Ok(frames)
}

fn decode_file(path: &Path) -> Result<Frame, FrameError> {
    let img = image::open(path).map_err(|e| FrameError::Decode(e.to_string()))?;
    let width = img.width() as usize;
    let height = img.height() as usize;

    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    // HDR stills keep float precision, everything else is RGBA8.
    match ext.as_str() {
        "exr" | "hdr" => Ok(Frame::from_f32_buffer(
            img.to_rgba32f().into_raw(),
            width,
            height,
        )),
        _ => Ok(Frame::from_u8_buffer(img.to_rgba8().into_raw(), width, height)),
    }
}

#[derive(Default)]
struct SharedState {
    loaded: HashMap<usize, Frame>,
    pending: HashMap<usize, Instant>,
    failed: HashSet<usize>,
    dims: Option<(u32, u32)>,
}

/// Image-sequence/still decoder running decode jobs on the worker pool.
pub struct SequenceDecoder {
    workers: Arc<Workers>,
    fps: f64,
    frames: Vec<PathBuf>,
    cur: usize,
    playing: bool,
    shared: Arc<Mutex<SharedState>>,
}

impl SequenceDecoder {
    pub fn new(workers: Arc<Workers>, fps: f64) -> Self {
        Self {
            workers,
            fps: if fps > 0.0 { fps } else { 24.0 },
            frames: Vec::new(),
            cur: 0,
            playing: false,
            shared: Arc::new(Mutex::new(SharedState::default())),
        }
    }

    fn time_to_index(&self, time: f64) -> usize {
        if self.frames.len() <= 1 {
            return 0;
        }
        let idx = (time * self.fps).round();
        (idx.max(0.0) as usize).min(self.frames.len() - 1)
    }

    /// Queue a background decode of `idx` unless it is already loaded,
    /// in flight or known bad. `epoch_checked` jobs are dropped when the
    /// engine has scrubbed away since they were queued.
    fn ensure_load(&self, idx: usize, epoch_checked: bool) {
        let Some(path) = self.frames.get(idx).cloned() else {
            return;
        };

        {
            let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            if shared.loaded.contains_key(&idx)
                || shared.failed.contains(&idx)
                || shared.pending.contains_key(&idx)
            {
                return;
            }
            shared.pending.insert(idx, Instant::now());
        }

        let shared = Arc::clone(&self.shared);
        let job = move || {
            let result = decode_file(&path);
            let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
            state.pending.remove(&idx);
            match result {
                Ok(frame) => {
                    if state.dims.is_none() {
                        state.dims = Some((frame.width() as u32, frame.height() as u32));
                    }
                    state.loaded.insert(idx, frame);
                }
                Err(e) => {
                    warn!("Frame {} failed to decode ({}): {}", idx, path.display(), e);
                    state.failed.insert(idx);
                }
            }
        };

        if epoch_checked {
            self.workers.execute_with_epoch(self.workers.current_epoch(), job);
        } else {
            self.workers.execute(job);
        }
    }

    fn prefetch_forward(&self) {
        let end = (self.cur + PREFETCH_AHEAD).min(self.frames.len());
        for idx in self.cur..end {
            self.ensure_load(idx, true);
        }
    }
}

impl Decoder for SequenceDecoder {
    fn open(&mut self, url: &str) -> Result<(), DecoderError> {
        let path = url.strip_prefix("seq://").unwrap_or(url);
        self.frames = expand_frames(path)?;
        self.cur = 0;
        self.playing = false;
        *self.shared.lock().unwrap_or_else(|e| e.into_inner()) = SharedState::default();

        if self.frames.is_empty() {
            return Err(DecoderError::Open(format!("No frames matched {}", path)));
        }
        self.ensure_load(0, false);
        Ok(())
    }

    fn close(&mut self) {
        self.frames.clear();
        self.cur = 0;
        self.playing = false;
        *self.shared.lock().unwrap_or_else(|e| e.into_inner()) = SharedState::default();
    }

    fn seek(&mut self, time: f64) {
        self.cur = self.time_to_index(time);
        // Foreground seek target: load unconditionally, the job is
        // idempotent and must survive epoch bumps.
        self.ensure_load(self.cur, false);
        if self.playing {
            self.prefetch_forward();
        }
    }

    fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
        if playing {
            self.prefetch_forward();
        }
    }

    fn position(&self) -> f64 {
        self.cur as f64 / self.fps
    }

    fn readiness(&self) -> Readiness {
        if self.frames.is_empty() {
            return Readiness::Idle;
        }
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if !shared.loaded.contains_key(&self.cur) {
            return Readiness::Metadata;
        }
        let run_end = (self.cur + ENOUGH_RUN).min(self.frames.len());
        if (self.cur..run_end).all(|i| shared.loaded.contains_key(&i)) {
            Readiness::Enough
        } else {
            Readiness::Future
        }
    }

    fn sample(&self, time: f64) -> Option<Frame> {
        if self.frames.is_empty() {
            return None;
        }
        let idx = self.time_to_index(time);
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .loaded
            .get(&idx)
            .cloned()
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).dims
    }

    fn native_fps(&self) -> Option<f64> {
        Some(self.fps)
    }

    fn prefetch(&mut self, frames: &[i64], fps: f64) {
        for &frame in frames {
            let idx = self.time_to_index(frame as f64 / fps.max(1.0));
            self.ensure_load(idx, true);
        }
    }

    fn pump(&mut self) {
        // Expire lost pending entries so their frames become retryable.
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        shared
            .pending
            .retain(|_, issued| now.duration_since(*issued) < PENDING_EXPIRE);
    }
}

/// Factory wiring sequence decoders to the shared worker pool.
pub struct SequenceDecoderFactory {
    workers: Arc<Workers>,
    fps: f64,
}

impl SequenceDecoderFactory {
    pub fn new(workers: Arc<Workers>, fps: f64) -> Self {
        Self { workers, fps }
    }
}

impl DecoderFactory for SequenceDecoderFactory {
    fn create(&self, _url: &str) -> Result<Box<dyn Decoder>, DecoderError> {
        Ok(Box::new(SequenceDecoder::new(Arc::clone(&self.workers), self.fps)))
    }
}
