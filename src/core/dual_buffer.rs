//! Dual-Buffer Continuity Unit - zero-reload clip transitions.
//!
//! Two slots per playback lane: active and preload. Ahead of a
//! cross-source transition the preload slot binds the next source and
//! seeks it; when the transition lands, `resolve` flips the slots
//! instead of reloading. Slots are bindings onto registry-owned decoder
//! lanes (the registry stays the single decoder owner, this unit is a
//! scheduling policy over it). Each bound slot holds one registry
//! reference.
//!
//! The one path that may visibly reload is a missed prediction or a
//! user seek to an unrelated source: it loads straight into the active
//! slot, which is accepted degraded behavior, not a defect.

use log::{debug, info};

use crate::core::registry::{normalize_source_id, SourceRegistry};
use crate::core::vtimeline::VirtualTimeline;
use crate::entities::decoder::{DecoderError, Readiness};

/// Preload begins when the active segment has less than this much
/// playtime remaining.
pub const PRELOAD_THRESHOLD_SECONDS: f64 = 1.0;

/// Readiness a preload slot must reach before it can swap in: enough
/// buffered data to play forward smoothly.
const SWAP_READINESS: Readiness = Readiness::Future;

/// One of the two decoder holders.
#[derive(Debug, Clone, Default)]
pub struct BufferSlot {
    pub url: Option<String>,
    pub source_id: Option<String>,
    pub ready: bool,
}

impl BufferSlot {
    fn bind(&mut self, url: &str) {
        self.url = Some(url.to_string());
        self.source_id = Some(normalize_source_id(url));
        self.ready = false;
    }

    fn clear(&mut self) {
        *self = BufferSlot::default();
    }
}

/// How a frame request was satisfied by the lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneDecision {
    /// Desired source already active.
    Hold,
    /// Preload slot was ready; slots flipped with zero reload.
    Swapped,
    /// Prediction missed; source loaded directly into the active slot.
    DirectLoad,
}

/// Active/preload slot pair for one playback lane.
#[derive(Debug, Default)]
pub struct ContinuityLane {
    slots: [BufferSlot; 2],
    active: usize,
    swapping: bool,
}

impl ContinuityLane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_slot(&self) -> &BufferSlot {
        &self.slots[self.active]
    }

    pub fn preload_slot(&self) -> &BufferSlot {
        &self.slots[1 - self.active]
    }

    /// Bind the preload slot to `url` and seek it to `start_time`.
    /// No-op when the slot already targets that source.
    pub fn preload_source(
        &mut self,
        registry: &mut SourceRegistry,
        url: &str,
        start_time: f64,
        fps: f64,
    ) -> Result<(), DecoderError> {
        let id = normalize_source_id(url);
        if self.preload_slot().source_id.as_deref() == Some(id.as_str()) {
            return Ok(());
        }

        if let Some(old) = self.preload_slot().url.clone() {
            registry.release_source(&old);
        }

        registry.register_source(url, fps)?;
        if let Some(lane) = registry.lane_mut(url) {
            lane.seek_if_needed(start_time, 1.0 / fps.max(1.0));
        }

        let slot = &mut self.slots[1 - self.active];
        slot.bind(url);
        debug!("Preload slot bound to {} at {:.3}s", id, start_time);
        Ok(())
    }

    /// Poll preload readiness and drive automatic preload: once the
    /// active segment has under `PRELOAD_THRESHOLD_SECONDS` left and
    /// the next segment is cross-source, start preloading it.
    pub fn maintain(
        &mut self,
        registry: &mut SourceRegistry,
        vtl: &VirtualTimeline,
        frame: i64,
        fps: f64,
    ) {
        // Readiness poll for whatever is already preloading.
        if let Some(url) = self.preload_slot().url.clone() {
            if !self.preload_slot().ready {
                let ready = registry.readiness(&url).at_least(SWAP_READINESS);
                self.slots[1 - self.active].ready = ready;
            }
        }

        let Some(current) = vtl.segment_at(frame) else {
            return;
        };
        let threshold_frames = (PRELOAD_THRESHOLD_SECONDS * fps.max(1.0)).ceil() as i64;
        let remaining = current.end_frame - frame;
        if remaining > threshold_frames {
            return;
        }

        let upcoming = vtl.upcoming_segments(frame, threshold_frames + 1);
        for up in upcoming {
            let seg = &vtl.segments()[up.segment];
            if !up.needs_source_change {
                continue;
            }
            if self.preload_slot().source_id.as_deref() == Some(seg.source_id.as_str()) {
                continue;
            }
            let url = seg.source_url.clone();
            let start = seg.source_start;
            if let Err(e) = self.preload_source(registry, &url, start, fps) {
                log::warn!("Preload of {} failed: {}", url, e);
            }
            break;
        }
    }

    /// Route a resolved frame request through the slot pair.
    pub fn resolve(
        &mut self,
        registry: &mut SourceRegistry,
        url: &str,
        fps: f64,
    ) -> LaneDecision {
        let id = normalize_source_id(url);

        if self.active_slot().source_id.as_deref() == Some(id.as_str()) {
            return LaneDecision::Hold;
        }

        if self.preload_slot().source_id.as_deref() == Some(id.as_str())
            && self.preload_slot().ready
        {
            self.swap();
            return LaneDecision::Swapped;
        }

        // Prediction missed or user seeked elsewhere: load directly.
        if let Some(old) = self.active_slot().url.clone() {
            registry.release_source(&old);
        }
        match registry.register_source(url, fps) {
            Ok(()) => {
                self.slots[self.active].bind(url);
                self.slots[self.active].ready = true;
                info!("Direct load into active slot: {}", id);
                LaneDecision::DirectLoad
            }
            Err(e) => {
                log::warn!("Direct load of {} failed: {}", url, e);
                self.slots[self.active].clear();
                LaneDecision::DirectLoad
            }
        }
    }

    /// Flip active/preload without touching decoder state. Guarded
    /// against duplicate swaps from re-entrant calls.
    pub fn swap(&mut self) -> bool {
        if self.swapping {
            return false;
        }
        self.swapping = true;
        self.active = 1 - self.active;
        debug!(
            "Buffer swap: active slot now {:?}",
            self.active_slot().source_id
        );
        self.swapping = false;
        true
    }

    /// Release both slot bindings (engine teardown / track clear).
    pub fn release_all(&mut self, registry: &mut SourceRegistry) {
        for slot in &mut self.slots {
            if let Some(url) = slot.url.take() {
                registry.release_source(&url);
            }
            slot.clear();
        }
        self.active = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::decoder::fake::FakeFactory;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    const FPS: f64 = 30.0;

    fn registry() -> SourceRegistry {
        SourceRegistry::new(Box::new(FakeFactory::new(FPS)), Arc::new(AtomicU64::new(0)))
    }

    /// Test: preload no-op on repeat
    /// Validates: re-preloading the current target does not rebind or
    /// leak references
    #[test]
    fn test_preload_idempotent() {
        let mut reg = registry();
        let mut lane = ContinuityLane::new();

        lane.preload_source(&mut reg, "b.mp4", 2.0, FPS).unwrap();
        lane.preload_source(&mut reg, "b.mp4", 2.0, FPS).unwrap();
        assert_eq!(reg.refcount("b.mp4"), 1);
    }

    /// Test: swap on ready preload
    /// Validates: resolve to the preloaded source flips slots without a
    /// new registration; resolve again holds
    #[test]
    fn test_swap_on_ready_preload() {
        let mut reg = registry();
        let mut lane = ContinuityLane::new();

        assert_eq!(lane.resolve(&mut reg, "a.mp4", FPS), LaneDecision::DirectLoad);
        lane.preload_source(&mut reg, "b.mp4", 0.0, FPS).unwrap();

        // Fake decoder is instantly ready; poll marks the slot.
        let vtl = VirtualTimeline::default();
        lane.maintain(&mut reg, &vtl, 0, FPS);
        assert!(lane.preload_slot().ready);

        assert_eq!(lane.resolve(&mut reg, "b.mp4", FPS), LaneDecision::Swapped);
        assert_eq!(lane.active_slot().source_id.as_deref(), Some("b.mp4"));
        assert_eq!(lane.resolve(&mut reg, "b.mp4", FPS), LaneDecision::Hold);

        // Swap moved bindings, not references: both sources still alive.
        assert_eq!(reg.refcount("a.mp4"), 1);
        assert_eq!(reg.refcount("b.mp4"), 1);
    }

    /// Test: missed prediction
    /// Validates: resolving an unpredicted source direct-loads into the
    /// active slot and releases the previous binding
    #[test]
    fn test_direct_load_on_miss() {
        let mut reg = registry();
        let mut lane = ContinuityLane::new();

        lane.resolve(&mut reg, "a.mp4", FPS);
        assert_eq!(lane.resolve(&mut reg, "c.mp4", FPS), LaneDecision::DirectLoad);
        assert_eq!(reg.refcount("a.mp4"), 0);
        assert_eq!(reg.refcount("c.mp4"), 1);
    }

    /// Test: automatic preload near a cross-source transition
    /// Validates: maintain starts preloading the entering source once
    /// the active segment is inside the threshold window
    #[test]
    fn test_auto_preload() {
        use crate::entities::clip::{Clip, MediaKind};

        let clips = vec![
            Clip::new(MediaKind::Video, "a.mp4", 0, 120),
            Clip::new(MediaKind::Video, "b.mp4", 120, 240),
        ];
        let vtl = VirtualTimeline::build(&clips, FPS);

        let mut reg = registry();
        let mut lane = ContinuityLane::new();
        lane.resolve(&mut reg, "a.mp4", FPS);

        // Far from the seam: nothing to do.
        lane.maintain(&mut reg, &vtl, 30, FPS);
        assert!(lane.preload_slot().source_id.is_none());

        // Inside the 1-second window: preload the entering source.
        lane.maintain(&mut reg, &vtl, 100, FPS);
        assert_eq!(lane.preload_slot().source_id.as_deref(), Some("b.mp4"));
        assert!(reg.contains("b.mp4"));
    }

    /// Test: release_all
    /// Validates: both bindings are returned to the registry
    #[test]
    fn test_release_all() {
        let mut reg = registry();
        let mut lane = ContinuityLane::new();
        lane.resolve(&mut reg, "a.mp4", FPS);
        lane.preload_source(&mut reg, "b.mp4", 0.0, FPS).unwrap();

        lane.release_all(&mut reg);
        assert_eq!(reg.refcount("a.mp4"), 0);
        assert_eq!(reg.refcount("b.mp4"), 0);
    }
}
