//! Virtual Timeline Manager - segment and transition analysis.
//!
//! Rebuilt wholesale from the track list on every structural change
//! (add/remove/reorder/retime), never patched incrementally. Track
//! lists are tens of clips, so recomputing buys correctness simplicity
//! at negligible cost.
//!
//! The point of this component is classifying transitions: same-source
//! seams are a cheap seek on the existing decoder, cross-source seams
//! need a different decoder and fresh buffering. The Dual-Buffer
//! Continuity Unit preloads only the expensive kind.

use indexmap::IndexMap;
use uuid::Uuid;

use crate::core::registry::normalize_source_id;
use crate::core::resolver;
use crate::entities::clip::Clip;

/// Two segments whose ranges meet within this many frames form a
/// transition.
const ADJACENCY_FRAMES: i64 = 1;

/// A clip's contribution mapped into source-space.
#[derive(Debug, Clone)]
pub struct Segment {
    pub clip_id: Uuid,
    pub source_id: String,
    pub source_url: String,
    pub source_start: f64,
    pub source_end: f64,
    pub start_frame: i64,
    pub end_frame: i64,
    pub row: u32,
    pub layer: u32,
}

/// The seam between two timeline-adjacent segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Index of the exiting segment.
    pub from: usize,
    /// Index of the entering segment.
    pub to: usize,
    /// Timeline frame at which the entering segment starts.
    pub frame: i64,
    pub same_source: bool,
    /// Gap (or overlap, negative) between exit end and enter start.
    pub frame_delta: i64,
}

/// An upcoming segment, annotated with whether reaching it requires a
/// different decoder than the segment currently playing.
#[derive(Debug, Clone, Copy)]
pub struct UpcomingSegment {
    pub segment: usize,
    pub needs_source_change: bool,
}

/// Segment/transition index over the current track list.
#[derive(Debug, Default)]
pub struct VirtualTimeline {
    /// All segments, sorted by timeline start.
    segments: Vec<Segment>,
    /// Per-source ordered segment lists (indices into `segments`).
    by_source: IndexMap<String, Vec<usize>>,
    transitions: Vec<Transition>,
}

impl VirtualTimeline {
    /// Analyze the full track list. Video-bearing clips only.
    pub fn build(clips: &[Clip], fps: f64) -> Self {
        let mut segments: Vec<Segment> = clips
            .iter()
            .filter(|c| c.kind.has_video() && c.start_frame < c.end_frame)
            .map(|c| Segment {
                clip_id: c.id,
                source_id: normalize_source_id(&c.source_url),
                source_url: c.source_url.clone(),
                source_start: resolver::source_time_for(c.start_frame, c, fps),
                source_end: resolver::source_time_for(c.end_frame, c, fps),
                start_frame: c.start_frame,
                end_frame: c.end_frame,
                row: c.row,
                layer: c.layer,
            })
            .collect();
        segments.sort_by_key(|s| (s.start_frame, s.row, s.layer));

        let mut by_source: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (i, seg) in segments.iter().enumerate() {
            by_source.entry(seg.source_id.clone()).or_default().push(i);
        }

        let transitions = Self::calculate_transitions(&segments);
        log::debug!(
            "Virtual timeline rebuilt: {} segments, {} sources, {} transitions",
            segments.len(),
            by_source.len(),
            transitions.len()
        );

        Self {
            segments,
            by_source,
            transitions,
        }
    }

    /// For every segment, find the segment (if any) starting within
    /// the adjacency window of its end.
    fn calculate_transitions(segments: &[Segment]) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for (i, exit) in segments.iter().enumerate() {
            for (j, enter) in segments.iter().enumerate() {
                if i == j {
                    continue;
                }
                let delta = enter.start_frame - exit.end_frame;
                if delta.abs() <= ADJACENCY_FRAMES {
                    transitions.push(Transition {
                        from: i,
                        to: j,
                        frame: enter.start_frame,
                        same_source: exit.source_id == enter.source_id,
                        frame_delta: delta,
                    });
                }
            }
        }
        transitions.sort_by_key(|t| t.frame);
        transitions
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Ordered segment indices for one source (normalized id or URL).
    pub fn segments_for(&self, source: &str) -> &[usize] {
        self.by_source
            .get(&normalize_source_id(source))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn source_count(&self) -> usize {
        self.by_source.len()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// The back-most segment covering `frame` (the program segment).
    pub fn segment_at(&self, frame: i64) -> Option<&Segment> {
        self.segments
            .iter()
            .filter(|s| frame >= s.start_frame && frame < s.end_frame)
            .min_by_key(|s| (s.row, s.layer))
    }

    /// Segments starting within `(frame, frame + lookahead]`, annotated
    /// with whether reaching them needs a source change relative to the
    /// segment at `frame`.
    pub fn upcoming_segments(&self, frame: i64, lookahead: i64) -> Vec<UpcomingSegment> {
        let current_source = self.segment_at(frame).map(|s| s.source_id.as_str());
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.start_frame > frame && s.start_frame <= frame + lookahead)
            .map(|(i, s)| UpcomingSegment {
                segment: i,
                needs_source_change: current_source != Some(s.source_id.as_str()),
            })
            .collect()
    }

    /// First transition past `frame`.
    pub fn next_transition(&self, frame: i64) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.frame > frame)
    }
}
