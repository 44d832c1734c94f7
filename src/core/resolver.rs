//! Frame Resolver - pure timeline-to-source mapping.
//!
//! Side-effect-free functions over `(timeline_frame, clips, fps)`. The
//! single formula `source_frame = in_frame + (frame - start_frame)` is
//! the canonical mapping; every consumer (compositor, preload, audio)
//! goes through here so nothing can drift.
//!
//! Visibility is half-open: a clip covers `[start_frame, end_frame)`,
//! so cut boundaries never double-render. Render order is ascending
//! `(row, layer)` under a stable sort; clips sharing both values keep
//! their input order (documented tie-break, not an error).

use indexmap::IndexMap;
use uuid::Uuid;

use crate::core::registry::normalize_source_id;
use crate::entities::clip::Clip;
use crate::entities::transform::Transform;

/// Derived per-clip metadata with defaults applied.
#[derive(Debug, Clone, Copy)]
pub struct ClipMeta {
    pub in_frame: i64,
    pub out_frame: i64,
    pub transform: Transform,
    pub opacity: f32,
}

/// One resolved instruction to show a layer at the current frame.
/// Produced fresh every resolution call, never mutated.
#[derive(Debug, Clone)]
pub struct FrameRequest {
    pub clip_id: Uuid,
    pub source_id: String,
    pub source_url: String,
    pub source_frame: i64,
    pub source_time: f64,
    pub row: u32,
    pub layer: u32,
    pub opacity: f32,
    pub transform: Transform,
    pub width: u32,
    pub height: u32,
}

/// Audio analog of `FrameRequest`: volume/mute instead of transform.
#[derive(Debug, Clone)]
pub struct AudioRequest {
    pub clip_id: Uuid,
    pub source_id: String,
    pub source_url: String,
    pub source_time: f64,
    pub volume: f32,
    pub muted: bool,
    pub rate: f32,
}

/// Compute derived clip metadata: in/out source frames plus sanitized
/// transform and clamped opacity.
pub fn clip_meta(clip: &Clip, fps: f64) -> ClipMeta {
    ClipMeta {
        in_frame: clip.in_frame(fps),
        out_frame: clip.out_frame(fps),
        transform: clip.transform.sanitized(),
        opacity: if clip.opacity.is_finite() {
            clip.opacity.clamp(0.0, 1.0)
        } else {
            1.0
        },
    }
}

/// Half-open visibility: `frame` in `[start_frame, end_frame)`.
#[inline]
pub fn is_visible_at(clip: &Clip, frame: i64) -> bool {
    clip.visible && frame >= clip.start_frame && frame < clip.end_frame
}

/// The canonical timeline-to-source mapping.
#[inline]
pub fn source_frame_for(frame: i64, clip: &Clip, fps: f64) -> i64 {
    clip.in_frame(fps) + (frame - clip.start_frame)
}

/// Source time in seconds for a timeline frame.
#[inline]
pub fn source_time_for(frame: i64, clip: &Clip, fps: f64) -> f64 {
    source_frame_for(frame, clip, fps) as f64 / fps.max(1.0)
}

/// Resolve the visible video layers at `frame`, ordered back to front.
/// This ordering is the sole authority for composite z-order.
pub fn resolve_frame_requests(frame: i64, clips: &[Clip], fps: f64) -> Vec<FrameRequest> {
    let mut requests: Vec<FrameRequest> = clips
        .iter()
        .filter(|c| c.kind.has_video() && is_visible_at(c, frame))
        .map(|c| {
            let meta = clip_meta(c, fps);
            let source_frame = source_frame_for(frame, c, fps);
            FrameRequest {
                clip_id: c.id,
                source_id: normalize_source_id(&c.source_url),
                source_url: c.source_url.clone(),
                source_frame,
                source_time: source_frame as f64 / fps.max(1.0),
                row: c.row,
                layer: c.layer,
                opacity: meta.opacity,
                transform: meta.transform,
                width: c.width,
                height: c.height,
            }
        })
        .collect();

    // Stable: equal (row, layer) keeps input order.
    requests.sort_by_key(|r| (r.row, r.layer));
    requests
}

/// Resolve the audible clips at `frame`.
pub fn resolve_audio_requests(frame: i64, clips: &[Clip], fps: f64) -> Vec<AudioRequest> {
    clips
        .iter()
        .filter(|c| c.kind.has_audio() && is_visible_at(c, frame))
        .map(|c| AudioRequest {
            clip_id: c.id,
            source_id: normalize_source_id(&c.source_url),
            source_url: c.source_url.clone(),
            source_time: source_time_for(frame, c, fps),
            volume: if c.volume.is_finite() {
                c.volume.clamp(0.0, 1.0)
            } else {
                1.0
            },
            muted: c.muted,
            rate: 1.0,
        })
        .collect()
}

/// Union of the source frames needed for the next `lookahead` timeline
/// frames, grouped per source. Drives `SourceRegistry::preload_frames`.
pub fn preload_plan(
    frame: i64,
    clips: &[Clip],
    fps: f64,
    lookahead: i64,
) -> IndexMap<String, (String, Vec<i64>)> {
    let mut plan: IndexMap<String, (String, Vec<i64>)> = IndexMap::new();

    for ahead in 1..=lookahead.max(0) {
        for request in resolve_frame_requests(frame + ahead, clips, fps) {
            let entry = plan
                .entry(request.source_id.clone())
                .or_insert_with(|| (request.source_url.clone(), Vec::new()));
            entry.1.push(request.source_frame);
        }
    }

    for (_, (_, frames)) in plan.iter_mut() {
        frames.sort_unstable();
        frames.dedup();
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::clip::MediaKind;

    const FPS: f64 = 30.0;

    fn clip(start: i64, end: i64) -> Clip {
        Clip::new(MediaKind::Video, "clips/a.mp4", start, end)
    }

    /// Test: frame mapping invariant
    /// Validates: source_frame = in_frame + (frame - start), strictly
    /// monotonic in the timeline frame
    #[test]
    fn test_frame_mapping() {
        let mut c = clip(10, 100);
        c.source_in = 2.0;
        let in_frame = c.in_frame(FPS);
        assert_eq!(in_frame, 60);

        let mut prev = None;
        for f in 10..100 {
            let sf = source_frame_for(f, &c, FPS);
            assert_eq!(sf, in_frame + (f - 10));
            if let Some(p) = prev {
                assert!(sf > p);
            }
            prev = Some(sf);
        }
    }

    /// Test: half-open visibility
    /// Validates: visible at end-1, not at end, not when hidden
    #[test]
    fn test_half_open_visibility() {
        let c = clip(0, 100);
        assert!(is_visible_at(&c, 0));
        assert!(is_visible_at(&c, 99));
        assert!(!is_visible_at(&c, 100));
        assert!(!is_visible_at(&c, -1));

        let mut hidden = clip(0, 100);
        hidden.visible = false;
        assert!(!is_visible_at(&hidden, 50));
    }

    /// Test: z-order determinism
    /// Validates: rows/layers (0,0),(1,0),(0,1) render (0,0) < (0,1) < (1,0)
    #[test]
    fn test_z_order() {
        let mut a = clip(0, 10);
        a.row = 0;
        a.layer = 0;
        let mut b = clip(0, 10);
        b.row = 1;
        b.layer = 0;
        let mut d = clip(0, 10);
        d.row = 0;
        d.layer = 1;

        let clips = vec![a.clone(), b.clone(), d.clone()];
        let order: Vec<(u32, u32)> = resolve_frame_requests(5, &clips, FPS)
            .iter()
            .map(|r| (r.row, r.layer))
            .collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0)]);

        // Deterministic across calls.
        let again: Vec<(u32, u32)> = resolve_frame_requests(5, &clips, FPS)
            .iter()
            .map(|r| (r.row, r.layer))
            .collect();
        assert_eq!(order, again);
    }

    /// Test: tie-break stability
    /// Validates: identical (row, layer) resolves in input order
    #[test]
    fn test_stable_tie_break() {
        let a = clip(0, 10);
        let b = clip(0, 10);
        let ids = vec![a.id, b.id];
        let clips = vec![a, b];
        let resolved: Vec<_> = resolve_frame_requests(0, &clips, FPS)
            .iter()
            .map(|r| r.clip_id)
            .collect();
        assert_eq!(resolved, ids);
    }

    /// Test: non-video clips filtered
    /// Validates: audio/subtitle clips produce no frame requests
    #[test]
    fn test_kind_filter() {
        let clips = vec![
            Clip::new(MediaKind::Audio, "a.wav", 0, 10),
            Clip::new(MediaKind::Subtitle, "s.srt", 0, 10),
            Clip::new(MediaKind::Image, "i.png", 0, 10),
        ];
        let reqs = resolve_frame_requests(0, &clips, FPS);
        assert_eq!(reqs.len(), 1);

        let audio = resolve_audio_requests(0, &clips, FPS);
        assert_eq!(audio.len(), 1);
    }

    /// Test: malformed clip values repaired
    /// Validates: non-finite opacity and transform become safe defaults
    #[test]
    fn test_sanitized_meta() {
        let mut c = clip(0, 10);
        c.opacity = f32::NAN;
        c.transform.scale_x = f32::INFINITY;
        let meta = clip_meta(&c, FPS);
        assert_eq!(meta.opacity, 1.0);
        assert_eq!(meta.transform.scale_x, 1.0);
    }

    /// Test: preload plan
    /// Validates: lookahead frames union per source, sorted and deduped
    #[test]
    fn test_preload_plan() {
        let c = clip(0, 100);
        let clips = vec![c];
        let plan = preload_plan(10, &clips, FPS, 5);
        assert_eq!(plan.len(), 1);
        let (_, frames) = plan.values().next().unwrap();
        assert_eq!(frames, &vec![11, 12, 13, 14, 15]);

        // Lookahead past the clip end contributes nothing.
        let plan = preload_plan(98, &clips, FPS, 5);
        let (_, frames) = plan.values().next().unwrap();
        assert_eq!(frames, &vec![99]);
    }
}
