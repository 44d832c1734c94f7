//! Frame-Driven Compositor - the per-cycle render orchestrator.
//!
//! One render cycle walks Idle -> Resolving -> Syncing -> Drawing ->
//! Idle: resolve the visible layers, bring decoders onto target,
//! composite back to front, then arm the fallbacks for the next cycle.
//!
//! Fallback discipline, innermost to outermost:
//! - a failed decode returns the source's last valid frame (registry)
//! - a layer with no frame at all substitutes its private snapshot
//! - a cycle where nothing drew substitutes the previous composite
//! Black is shown only for a genuinely empty timeline, which is an
//! explicit state, not an error.
//!
//! Seek tolerance is wider during playback than while scrubbing:
//! playback tolerates small desync for smoothness, a paused scrub
//! demands precision. An explicit seek bypasses the band entirely.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::debug;
use uuid::Uuid;

use crate::core::dual_buffer::ContinuityLane;
use crate::core::registry::{SourceRegistry, DEFAULT_READINESS_BUDGET};
use crate::core::resolver;
use crate::entities::clip::Clip;
use crate::entities::frame::Frame;
use crate::entities::surface::Surface;

/// Seek tolerance while playing (seconds).
pub const PLAYBACK_SEEK_TOLERANCE: f64 = 0.25;

/// Seek tolerance while scrubbing paused (seconds).
pub const SCRUB_SEEK_TOLERANCE: f64 = 0.05;

/// Readiness wait granted to paused-scrub frame requests.
pub const SCRUB_DECODE_BUDGET: Duration = DEFAULT_READINESS_BUDGET;

/// Render cycle phase, for the diagnostics surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    Resolving,
    Syncing,
    Drawing,
}

/// Per-cycle render statistics.
#[derive(Debug, Clone, Default)]
pub struct RenderStats {
    pub frames_rendered: u64,
    pub fallback_count: u64,
    pub last_render: Duration,
    pub last_layers: usize,
    pub last_fallback_layers: usize,
}

/// Draws resolved layers onto the composite surface with per-layer and
/// whole-composite fallback.
pub struct Compositor {
    surface: Surface,
    phase: CyclePhase,
    layer_fallbacks: HashMap<Uuid, Frame>,
    global_fallback: Option<Frame>,
    stats: RenderStats,
}

impl Compositor {
    pub fn new(width: usize, height: usize) -> Self {
        let mut surface = Surface::new(width, height);
        surface.clear_black();
        Self {
            surface,
            phase: CyclePhase::Idle,
            layer_fallbacks: HashMap::new(),
            global_fallback: None,
            stats: RenderStats::default(),
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    /// Drop fallback snapshots for clips that left the track list.
    pub fn retain_layers(&mut self, live: &[Uuid]) {
        self.layer_fallbacks.retain(|id, _| live.contains(id));
    }

    /// Run one render cycle.
    ///
    /// No failure of an individual layer aborts the others; every
    /// per-request operation degrades only its own layer.
    pub fn render(
        &mut self,
        registry: &mut SourceRegistry,
        lane: &mut ContinuityLane,
        clips: &[Clip],
        frame: i64,
        fps: f64,
        playing: bool,
        force_sync: bool,
    ) {
        let started = Instant::now();

        self.phase = CyclePhase::Resolving;
        let requests = resolver::resolve_frame_requests(frame, clips, fps);

        if requests.is_empty() {
            // Explicit empty-timeline state, distinct from failure.
            self.surface.clear_black();
            self.global_fallback = None;
            self.layer_fallbacks.clear();
            self.finish_cycle(started, 0, 0);
            return;
        }

        self.phase = CyclePhase::Syncing;
        let tolerance = if force_sync {
            0.0
        } else if playing {
            PLAYBACK_SEEK_TOLERANCE
        } else {
            SCRUB_SEEK_TOLERANCE
        };

        // The continuity lane follows the program layer (back-most).
        if let Some(primary) = requests.first() {
            lane.resolve(registry, &primary.source_url, fps);
        }

        for req in &requests {
            if let Some(decoder_lane) = registry.lane_mut(&req.source_url) {
                decoder_lane.seek_if_needed(req.source_time, tolerance);
            }
            // A source missing from the registry (registration race) is
            // simply not renderable this cycle; it retries next cycle.
        }
        registry.sync_play_state(requests.iter().map(|r| r.source_url.as_str()), playing);

        self.phase = CyclePhase::Drawing;
        let budget = if playing {
            Duration::ZERO
        } else {
            SCRUB_DECODE_BUDGET
        };

        self.surface.clear_black();
        let mut drew_any = false;
        let mut fallback_layers = 0usize;

        for req in &requests {
            let result = registry.get_frame(&req.source_url, req.source_frame, fps, budget);
            let fresh = result.frame.clone().filter(|_| !result.fallback);

            let (layer_frame, is_fallback) = match result.frame {
                Some(f) => (Some(f), result.fallback),
                None => (self.layer_fallbacks.get(&req.clip_id).cloned(), true),
            };

            match layer_frame {
                Some(f) => {
                    // Transform was sanitized by the resolver; a bad
                    // layer can degrade only itself from here on.
                    self.surface.draw_frame(&f, &req.transform, req.opacity);
                    drew_any = true;
                    if is_fallback {
                        fallback_layers += 1;
                        self.stats.fallback_count += 1;
                    }
                }
                None => {
                    debug!(
                        "Layer {} has no frame and no fallback yet (frame {})",
                        req.clip_id, req.source_frame
                    );
                }
            }

            // Arm this layer's private fallback with the fresh frame.
            // Frames are Arc-shared, so this is a pointer copy, not a
            // pixel copy, and costs the current cycle nothing.
            if let Some(f) = fresh {
                self.layer_fallbacks.insert(req.clip_id, f);
            }
        }

        if drew_any {
            self.global_fallback = Some(self.surface.snapshot());
        } else {
            // Last line of defense: show the previous composite rather
            // than flashing black under a total stall.
            if let Some(snapshot) = &self.global_fallback {
                self.surface.restore(snapshot);
                self.stats.fallback_count += 1;
                fallback_layers = requests.len();
            }
        }

        self.finish_cycle(started, requests.len(), fallback_layers);
    }

    fn finish_cycle(&mut self, started: Instant, layers: usize, fallback_layers: usize) {
        self.stats.frames_rendered += 1;
        self.stats.last_render = started.elapsed();
        self.stats.last_layers = layers;
        self.stats.last_fallback_layers = fallback_layers;
        self.phase = CyclePhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::clip::MediaKind;
    use crate::entities::decoder::fake::FakeFactory;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    const FPS: f64 = 30.0;

    struct Rig {
        registry: SourceRegistry,
        lane: ContinuityLane,
        compositor: Compositor,
        factory_states: Arc<std::sync::Mutex<Vec<Arc<std::sync::Mutex<crate::entities::decoder::fake::FakeState>>>>>,
    }

    fn rig() -> Rig {
        rig_with(FakeFactory::new(FPS))
    }

    fn rig_with(factory: FakeFactory) -> Rig {
        let states = factory.created.clone();
        Rig {
            registry: SourceRegistry::new(Box::new(factory), Arc::new(AtomicU64::new(0))),
            lane: ContinuityLane::new(),
            compositor: Compositor::new(32, 24),
            factory_states: states,
        }
    }

    fn center_pixel(surface: &Surface) -> [u8; 4] {
        let (w, h) = surface.resolution();
        let i = ((h / 2) * w + w / 2) * 4;
        let p = surface.pixels();
        [p[i], p[i + 1], p[i + 2], p[i + 3]]
    }

    /// Test: empty timeline
    /// Validates: output is the designated black surface with zero
    /// fallback invocations
    #[test]
    fn test_empty_timeline() {
        let mut r = rig();
        r.compositor
            .render(&mut r.registry, &mut r.lane, &[], 0, FPS, false, false);

        assert_eq!(center_pixel(r.compositor.surface()), [0, 0, 0, 255]);
        assert_eq!(r.compositor.stats().fallback_count, 0);
        assert_eq!(r.compositor.stats().frames_rendered, 1);
        assert_eq!(r.compositor.phase(), CyclePhase::Idle);
    }

    /// Test: scrub precision
    /// Validates: a paused seek to frame 30 of a clip with 10s in-time
    /// targets source time 11.0s within the scrub tolerance band
    #[test]
    fn test_scrub_precision() {
        let mut r = rig();
        let mut clip = Clip::new(MediaKind::Video, "a.mp4", 0, 300);
        clip.source_in = 10.0;
        let clips = vec![clip];
        r.registry.register_source("a.mp4", FPS).unwrap();

        r.compositor
            .render(&mut r.registry, &mut r.lane, &clips, 30, FPS, false, true);

        let state = r.factory_states.lock().unwrap()[0].clone();
        let last_seek = *state.lock().unwrap().seeks.last().expect("seeked");
        assert!(
            (last_seek - 11.0).abs() <= SCRUB_SEEK_TOLERANCE,
            "seek target {} not within tolerance of 11.0",
            last_seek
        );
        // The decoded frame landed on the surface.
        assert_ne!(center_pixel(r.compositor.surface()), [0, 0, 0, 255]);
    }

    /// Test: per-layer fallback
    /// Validates: a layer whose decode fails substitutes its private
    /// snapshot instead of leaving a gap
    #[test]
    fn test_layer_fallback() {
        let mut r = rig();
        let clip = Clip::new(MediaKind::Video, "a.mp4", 0, 300);
        let clips = vec![clip];
        r.registry.register_source("a.mp4", FPS).unwrap();

        r.compositor
            .render(&mut r.registry, &mut r.lane, &clips, 5, FPS, false, false);
        assert_eq!(r.compositor.stats().last_fallback_layers, 0);

        // Frame 6 fails to decode; the source's last valid frame steps in.
        let state = r.factory_states.lock().unwrap()[0].clone();
        state.lock().unwrap().failing.insert(6);
        r.compositor
            .render(&mut r.registry, &mut r.lane, &clips, 6, FPS, false, false);

        assert_eq!(r.compositor.stats().last_fallback_layers, 1);
        assert!(r.compositor.stats().fallback_count >= 1);
        assert_ne!(center_pixel(r.compositor.surface()), [0, 0, 0, 255]);
    }

    /// Test: whole-composite fallback
    /// Validates: when no layer can draw despite visible clips, the
    /// previous composite is shown instead of black
    #[test]
    fn test_global_fallback() {
        let mut factory = FakeFactory::new(FPS);
        factory.fail_urls.insert("missing.mp4".to_string());
        let mut r = rig_with(factory);

        let clip = Clip::new(MediaKind::Video, "a.mp4", 0, 300);
        r.registry.register_source("a.mp4", FPS).unwrap();
        r.compositor
            .render(&mut r.registry, &mut r.lane, &vec![clip], 5, FPS, false, false);
        let before = center_pixel(r.compositor.surface());
        assert_ne!(before, [0, 0, 0, 255]);

        // A brand new clip whose media cannot be opened: no frame, no
        // private fallback, nothing can draw.
        let orphan = Clip::new(MediaKind::Video, "missing.mp4", 0, 300);
        r.compositor
            .render(&mut r.registry, &mut r.lane, &vec![orphan], 6, FPS, false, false);

        assert_eq!(center_pixel(r.compositor.surface()), before);
        assert!(r.compositor.stats().fallback_count >= 1);
    }

    /// Test: malformed transform isolation
    /// Validates: a NaN transform on one layer does not abort the other
    #[test]
    fn test_bad_transform_isolated() {
        let mut r = rig();
        let good = Clip::new(MediaKind::Video, "a.mp4", 0, 300);
        let mut bad = Clip::new(MediaKind::Video, "b.mp4", 0, 300);
        bad.row = 1;
        bad.transform.x = f32::NAN;
        r.registry.register_source("a.mp4", FPS).unwrap();
        r.registry.register_source("b.mp4", FPS).unwrap();

        r.compositor.render(
            &mut r.registry,
            &mut r.lane,
            &vec![good, bad],
            5,
            FPS,
            false,
            false,
        );
        assert_eq!(r.compositor.stats().last_layers, 2);
        assert_ne!(center_pixel(r.compositor.surface()), [0, 0, 0, 255]);
    }

    /// Test: play state propagation
    /// Validates: decoders in the request set play, absent ones pause
    #[test]
    fn test_play_state_sync() {
        let mut r = rig();
        let a = Clip::new(MediaKind::Video, "a.mp4", 0, 100);
        let b = Clip::new(MediaKind::Video, "b.mp4", 200, 300);
        r.registry.register_source("a.mp4", FPS).unwrap();
        r.registry.register_source("b.mp4", FPS).unwrap();

        r.compositor.render(
            &mut r.registry,
            &mut r.lane,
            &vec![a, b],
            50,
            FPS,
            true,
            false,
        );

        let states = r.factory_states.lock().unwrap();
        assert!(states[0].lock().unwrap().playing);
        assert!(!states[1].lock().unwrap().playing);
    }
}
