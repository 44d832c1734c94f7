//! Clip: one media item placed on the timeline.
//!
//! The core only reads clips; they are created, moved and destroyed by
//! the (external) timeline editor and handed to the engine as a plain
//! list. All properties are typed fields with explicit defaults, the
//! canonical time mapping lives in `in_frame`/`source_frame_for`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transform::Transform;

/// Media type of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    Text,
    Subtitle,
}

impl MediaKind {
    /// Does this clip produce pixels for the compositor?
    pub fn has_video(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Image)
    }

    /// Does this clip feed the audio path?
    pub fn has_audio(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::Audio)
    }
}

/// One placed media item. Timeline range is the half-open interval
/// `[start_frame, end_frame)`; `source_in` is the offset into the
/// source media (seconds) at which the clip starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clip {
    pub id: Uuid,
    pub kind: MediaKind,
    pub source_url: String,

    pub start_frame: i64,
    pub end_frame: i64,
    #[serde(default)]
    pub source_in: f64,

    /// Intrinsic media resolution, as reported by the media layer.
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,

    #[serde(default)]
    pub transform: Transform,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default = "default_visible")]
    pub visible: bool,

    /// Vertical position on the timeline. Lower rows render first
    /// (further back), higher layers within a row render later.
    #[serde(default)]
    pub row: u32,
    #[serde(default)]
    pub layer: u32,

    /// Paired track (e.g. the audio half of an imported video).
    #[serde(default)]
    pub linked: Option<Uuid>,

    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
}

fn default_opacity() -> f32 {
    1.0
}

fn default_visible() -> bool {
    true
}

fn default_volume() -> f32 {
    1.0
}

impl Clip {
    /// New clip with defaults for everything not given.
    pub fn new(kind: MediaKind, source_url: impl Into<String>, start_frame: i64, end_frame: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source_url: source_url.into(),
            start_frame,
            end_frame,
            source_in: 0.0,
            width: 0,
            height: 0,
            transform: Transform::IDENTITY,
            opacity: 1.0,
            visible: true,
            row: 0,
            layer: 0,
            linked: None,
            volume: 1.0,
            muted: false,
        }
    }

    pub fn duration_frames(&self) -> i64 {
        (self.end_frame - self.start_frame).max(0)
    }

    /// First source frame covered by this clip.
    pub fn in_frame(&self, fps: f64) -> i64 {
        (self.source_in * fps).floor() as i64
    }

    /// One past the last source frame covered by this clip.
    pub fn out_frame(&self, fps: f64) -> i64 {
        self.in_frame(fps) + self.duration_frames()
    }
}
