//! CUTLINE - timeline playback and compositing engine
//!
//! The frame-driven core of a timeline video editor: given a track
//! list and a playhead position it resolves which clips are visible,
//! obtains correctly-seeked decoded frames for each, composites them
//! in z-order onto a single surface, and keeps doing so through
//! scrubbing and playback without black frames or stalls.
//!
//! The editing UI, import/export and undo live elsewhere; they hand
//! this crate a clip list plus frame/fps/playing state and consume the
//! composite surface and per-cycle audio commands.
//!
//! ```no_run
//! use cutline::{Clip, Engine, EngineConfig, MediaKind};
//!
//! let mut engine = Engine::with_sequence_backend(EngineConfig::default());
//! engine.set_tracks(vec![Clip::new(
//!     MediaKind::Image,
//!     "seq://shots/sh010/frame.*.png",
//!     0,
//!     120,
//! )]);
//! engine.seek(30);
//! let surface = engine.tick();
//! let _rgba = surface.pixels();
//! ```

// Engine (registry, resolver, timeline analysis, compositor, playback)
pub mod core;

// Data model and decoder seam
pub mod entities;

// Re-export commonly used types from core
pub use self::core::audio::{AudioCommand, AudioPlan};
pub use self::core::compositor::RenderStats;
pub use self::core::engine::{Engine, EngineConfig};
pub use self::core::registry::{FrameResult, SourceRegistry};

// Re-export entities
pub use entities::{Clip, Decoder, DecoderFactory, Frame, MediaKind, Surface, Transform};
