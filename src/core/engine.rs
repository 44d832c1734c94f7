//! Engine - the owned session context.
//!
//! One `Engine` per editor session: it owns the source registry, the
//! virtual timeline, the continuity lane, the compositor and the
//! playback clock, and is torn down with the session. Nothing in the
//! crate is a global.
//!
//! Re-rendering is explicit: track-list or transform mutations call
//! `set_tracks`/`mark_dirty`, seeks call `seek`, and the next `tick`
//! consumes the dirty flag. While playing, `tick` renders every call
//! (drive it from a display-synchronized callback); while paused it
//! renders only when something changed.
//!
//! All decoder/cache mutation happens inside these methods on the
//! caller's thread. Decoder backends may run worker threads internally,
//! but the engine only observes them through the `Decoder` trait, and
//! stale async results are rejected by epoch checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::core::audio::{AudioDirector, AudioPlan};
use crate::core::compositor::{Compositor, RenderStats};
use crate::core::dual_buffer::ContinuityLane;
use crate::core::player::Player;
use crate::core::preloader::DebouncedPreloader;
use crate::core::registry::{CacheStats, SourceRegistry, DEFAULT_CACHE_CAPACITY};
use crate::core::resolver;
use crate::core::vtimeline::VirtualTimeline;
use crate::core::workers::Workers;
use crate::entities::clip::Clip;
use crate::entities::decoder::DecoderFactory;
use crate::entities::sequence::SequenceDecoderFactory;
use crate::entities::surface::Surface;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub width: usize,
    pub height: usize,
    pub fps: f64,
    /// Per-source frame cache capacity.
    pub cache_capacity: usize,
    /// Timeline frames preloaded ahead of the playhead.
    pub lookahead_frames: i64,
    /// Quiet period after an edit before lookahead preload fires.
    pub preload_debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            lookahead_frames: 30,
            preload_debounce_ms: 500,
        }
    }
}

/// The playback/compositing engine for one editor session.
pub struct Engine {
    config: EngineConfig,
    clips: Vec<Clip>,

    epoch: Arc<AtomicU64>,
    registry: SourceRegistry,
    vtl: VirtualTimeline,
    lane: ContinuityLane,
    compositor: Compositor,
    player: Player,
    preloader: DebouncedPreloader,
    audio: AudioDirector,

    dirty: bool,
    force_sync: bool,
    last_audio_plan: AudioPlan,

    // Keeps the built-in backend's pool alive for the session.
    _workers: Option<Arc<Workers>>,
}

impl Engine {
    /// Engine with an injected decoder backend.
    pub fn new(config: EngineConfig, factory: Box<dyn DecoderFactory>) -> Self {
        let epoch = Arc::new(AtomicU64::new(0));
        Self::build(config, factory, epoch, None)
    }

    /// Engine wired to the built-in image-sequence/still backend.
    pub fn with_sequence_backend(config: EngineConfig) -> Self {
        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Arc::new(Workers::with_default_size(Arc::clone(&epoch)));
        let factory = Box::new(SequenceDecoderFactory::new(Arc::clone(&workers), config.fps));
        Self::build(config, factory, epoch, Some(workers))
    }

    fn build(
        config: EngineConfig,
        factory: Box<dyn DecoderFactory>,
        epoch: Arc<AtomicU64>,
        workers: Option<Arc<Workers>>,
    ) -> Self {
        info!(
            "Engine session start: {}x{} @ {} fps",
            config.width, config.height, config.fps
        );
        Self {
            registry: SourceRegistry::with_capacity(
                factory,
                Arc::clone(&epoch),
                config.cache_capacity,
            ),
            vtl: VirtualTimeline::default(),
            lane: ContinuityLane::new(),
            compositor: Compositor::new(config.width, config.height),
            player: Player::new(config.fps),
            preloader: DebouncedPreloader::new(config.preload_debounce_ms),
            audio: AudioDirector::new(),
            clips: Vec::new(),
            epoch,
            dirty: true,
            force_sync: false,
            last_audio_plan: AudioPlan::default(),
            _workers: workers,
            config,
        }
    }

    /// Replace the track list (structural change). Source refcounts
    /// follow clip references; the virtual timeline rebuilds wholesale.
    pub fn set_tracks(&mut self, clips: Vec<Clip>) {
        let fps = self.config.fps;

        // Register new references before releasing old ones, so a
        // source present in both lists never tears down in between.
        for clip in &clips {
            if let Err(e) = self.registry.register_source(&clip.source_url, fps) {
                // Not fatal: the clip stays unrenderable until the
                // media layer can open it, and is retried per cycle.
                warn!("Source {} failed to open: {}", clip.source_url, e);
            }
        }
        for clip in &self.clips {
            self.registry.release_source(&clip.source_url);
        }

        self.clips = clips;
        self.vtl = VirtualTimeline::build(&self.clips, fps);
        let live: Vec<_> = self.clips.iter().map(|c| c.id).collect();
        self.compositor.retain_layers(&live);
        self.audio.reset();

        self.bump_epoch();
        self.dirty = true;
        self.preloader.schedule();
    }

    /// Mark the current frame stale (transform/opacity edits). The next
    /// tick re-resolves and re-renders.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Jump the playhead. While paused this renders exactly once on the
    /// next tick, with the seek-tolerance band bypassed.
    pub fn seek(&mut self, frame: i64) {
        self.player.set_frame(frame, self.content_end());
        self.bump_epoch();
        self.dirty = true;
        self.force_sync = true;
        self.preloader.schedule();
    }

    pub fn set_playing(&mut self, playing: bool) {
        if playing {
            self.player.play();
        } else {
            self.player.pause();
        }
        self.dirty = true;
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }

    pub fn current_frame(&self) -> i64 {
        self.player.current_frame()
    }

    pub fn fps(&self) -> f64 {
        self.config.fps
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.player.set_loop_enabled(enabled);
    }

    /// Run one engine cycle. Call from a display-synchronized callback
    /// while playing; call after edits/seeks while paused.
    pub fn tick(&mut self) -> &Surface {
        let fps = self.config.fps;
        self.registry.pump();

        let content_end = self.content_end();
        if self.player.is_playing() {
            if self.player.update(content_end).is_some() {
                self.dirty = true;
            }
            self.lane.maintain(
                &mut self.registry,
                &self.vtl,
                self.player.current_frame(),
                fps,
            );
        }

        if self.player.is_playing() || self.dirty || self.force_sync {
            let frame = self.player.current_frame();
            let playing = self.player.is_playing();
            self.compositor.render(
                &mut self.registry,
                &mut self.lane,
                &self.clips,
                frame,
                fps,
                playing,
                self.force_sync,
            );

            let audio_requests = resolver::resolve_audio_requests(frame, &self.clips, fps);
            self.last_audio_plan =
                self.audio
                    .plan(&audio_requests, frame, fps, playing, self.force_sync);

            self.dirty = false;
            self.force_sync = false;
        }

        if self.preloader.tick() || self.player.is_playing() {
            let frame = self.player.current_frame();
            let plan = resolver::preload_plan(frame, &self.clips, fps, self.config.lookahead_frames);
            for (_, (url, frames)) in plan {
                self.registry.preload_frames(&url, &frames, fps);
            }
        }

        self.compositor.surface()
    }

    /// The composite output of the last rendered cycle.
    pub fn surface(&self) -> &Surface {
        self.compositor.surface()
    }

    /// Audio commands from the last rendered cycle.
    pub fn audio_plan(&self) -> &AudioPlan {
        &self.last_audio_plan
    }

    pub fn render_stats(&self) -> &RenderStats {
        self.compositor.stats()
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.registry.stats()
    }

    pub fn cache_mem_usage(&self) -> usize {
        self.registry.mem_usage()
    }

    pub fn tracks(&self) -> &[Clip] {
        &self.clips
    }

    fn content_end(&self) -> i64 {
        self.clips
            .iter()
            .map(|c| c.end_frame)
            .max()
            .map(|end| (end - 1).max(0))
            .unwrap_or(0)
    }

    fn bump_epoch(&mut self) {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        log::trace!("Epoch -> {}", epoch);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.lane.release_all(&mut self.registry);
        for clip in &self.clips {
            self.registry.release_source(&clip.source_url);
        }
        info!("Engine session end");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::clip::MediaKind;
    use crate::entities::decoder::fake::FakeFactory;

    const FPS: f64 = 30.0;

    fn engine() -> Engine {
        let config = EngineConfig {
            width: 32,
            height: 24,
            fps: FPS,
            ..EngineConfig::default()
        };
        Engine::new(config, Box::new(FakeFactory::new(FPS)))
    }

    fn center_pixel(surface: &Surface) -> [u8; 4] {
        let (w, h) = surface.resolution();
        let i = ((h / 2) * w + w / 2) * 4;
        let p = surface.pixels();
        [p[i], p[i + 1], p[i + 2], p[i + 3]]
    }

    /// Test: end-to-end paused render
    /// Validates: set_tracks + tick produces a composite of the clip
    #[test]
    fn test_tick_renders_clip() {
        let mut eng = engine();
        eng.set_tracks(vec![Clip::new(MediaKind::Video, "a.mp4", 0, 100)]);

        let surface = eng.tick();
        assert_ne!(center_pixel(surface), [0, 0, 0, 255]);
        assert_eq!(eng.render_stats().frames_rendered, 1);
    }

    /// Test: dirty-flag signaling
    /// Validates: paused ticks without changes do not re-render; an
    /// explicit seek renders exactly once
    #[test]
    fn test_dirty_flag() {
        let mut eng = engine();
        eng.set_tracks(vec![Clip::new(MediaKind::Video, "a.mp4", 0, 100)]);

        eng.tick();
        assert_eq!(eng.render_stats().frames_rendered, 1);
        eng.tick();
        eng.tick();
        assert_eq!(eng.render_stats().frames_rendered, 1);

        eng.seek(30);
        eng.tick();
        assert_eq!(eng.render_stats().frames_rendered, 2);
        assert_eq!(eng.current_frame(), 30);
    }

    /// Test: track replacement lifecycle
    /// Validates: removed clips release their sources, an empty
    /// timeline renders the explicit black state
    #[test]
    fn test_track_replacement() {
        let mut eng = engine();
        eng.set_tracks(vec![
            Clip::new(MediaKind::Video, "a.mp4", 0, 100),
            Clip::new(MediaKind::Video, "a.mp4", 100, 200),
        ]);
        eng.tick();
        assert_eq!(eng.registry.refcount("a.mp4"), 3); // 2 clips + lane slot

        eng.set_tracks(Vec::new());
        let surface = eng.tick();
        assert_eq!(center_pixel(surface), [0, 0, 0, 255]);
    }

    /// Test: playback advances
    /// Validates: playing ticks move the playhead and render
    #[test]
    fn test_playback_advances() {
        let mut eng = engine();
        eng.set_tracks(vec![Clip::new(MediaKind::Video, "a.mp4", 0, 1000)]);
        eng.set_playing(true);
        eng.tick();

        std::thread::sleep(std::time::Duration::from_millis(60));
        eng.tick();
        assert!(eng.current_frame() > 0);
        assert!(eng.render_stats().frames_rendered >= 2);
    }

    /// Test: audio plan follows video
    /// Validates: an audible clip yields a command at the mapped time
    #[test]
    fn test_audio_plan() {
        let mut eng = engine();
        let mut clip = Clip::new(MediaKind::Video, "a.mp4", 0, 300);
        clip.source_in = 2.0;
        eng.set_tracks(vec![clip]);

        eng.seek(30);
        eng.tick();

        let plan = eng.audio_plan();
        assert_eq!(plan.commands.len(), 1);
        let cmd = &plan.commands[0];
        assert!((cmd.target_time - 3.0).abs() < 1e-6);
        assert!(cmd.hard_sync);
        assert!(!cmd.playing);
    }
}
