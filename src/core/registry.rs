//! Source Registry - one decoder and one frame cache per media source.
//!
//! **Why**: Several clips can reference the same media file. Decoders
//! are expensive, so the registry keeps exactly one per normalized
//! source id, refcounted by clip references, with a bounded LRU cache
//! of decoded frames and a last-known-good frame for fallback.
//!
//! **Used by**: Compositor (per-layer frame lookup), Dual-Buffer
//! Continuity Unit (slot bindings), Engine (lifecycle on track changes).
//!
//! # Request coalescing
//!
//! The same frame is never decoded twice concurrently: a pending set
//! per source records in-flight targets, repeated requests share the
//! eventual result. Pending entries carry their issue time and expire,
//! so a decode lost to an epoch bump becomes retryable.
//!
//! # Failure semantics
//!
//! Decode/seek timeouts are non-fatal: the caller gets the source's
//! last valid frame flagged as fallback. Only a source with no decode
//! history at all yields an empty result.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info, warn};
use lru::LruCache;

use crate::entities::decoder::{DecoderFactory, DecoderLane, Readiness};
use crate::entities::frame::Frame;

/// Default per-source frame cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 30;

/// Default bounded wait for decoder readiness on precision requests.
pub const DEFAULT_READINESS_BUDGET: Duration = Duration::from_millis(500);

/// Pending decodes older than this are assumed lost and retryable.
const PENDING_EXPIRE: Duration = Duration::from_secs(2);

/// Result of a frame request.
#[derive(Debug, Clone, Default)]
pub struct FrameResult {
    pub frame: Option<Frame>,
    pub from_cache: bool,
    pub fallback: bool,
}

impl FrameResult {
    fn cached(frame: Frame) -> Self {
        Self {
            frame: Some(frame),
            from_cache: true,
            fallback: false,
        }
    }

    fn fresh(frame: Frame) -> Self {
        Self {
            frame: Some(frame),
            from_cache: false,
            fallback: false,
        }
    }

    fn fallback_from(last_valid: Option<&Frame>) -> Self {
        match last_valid {
            Some(frame) => Self {
                frame: Some(frame.clone()),
                from_cache: false,
                fallback: true,
            },
            None => Self::default(),
        }
    }
}

/// Cache statistics for the diagnostics surface.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Normalize a source URL into a same-resource identity.
///
/// Query/fragment and the host of http(s) URLs are stripped (the same
/// file served from two CDN hosts is one source). Content-addressed
/// and ephemeral identifiers (`blob:`, `data:`) stay verbatim; custom
/// schemes keep their full path.
pub fn normalize_source_id(url: &str) -> String {
    if url.starts_with("blob:") || url.starts_with("data:") {
        return url.to_string();
    }

    let path = if let Some(rest) = url.strip_prefix("http://").or_else(|| url.strip_prefix("https://")) {
        match rest.find('/') {
            Some(i) => &rest[i..],
            None => rest,
        }
    } else if let Some(rest) = url.strip_prefix("file://") {
        rest
    } else if let Some(idx) = url.find("://") {
        &url[idx + 3..]
    } else {
        url
    };

    let end = path.find(['?', '#']).unwrap_or(path.len());
    path[..end].to_string()
}

struct SourceEntry {
    lane: DecoderLane,
    cache: LruCache<i64, Frame>,
    last_valid: Option<Frame>,
    /// In-flight foreground targets (frame -> issue time).
    pending: HashMap<i64, Instant>,
    /// In-flight background preload targets.
    preload_pending: HashMap<i64, Instant>,
    refcount: usize,
    fps: f64,
}

/// Owns every decoder and every frame cache. All access to decoders
/// from the rest of the engine goes through here.
pub struct SourceRegistry {
    sources: IndexMap<String, SourceEntry>,
    factory: Box<dyn DecoderFactory>,
    epoch: Arc<AtomicU64>,
    stats: CacheStats,
    capacity: NonZeroUsize,
}

impl SourceRegistry {
    pub fn new(factory: Box<dyn DecoderFactory>, epoch: Arc<AtomicU64>) -> Self {
        Self::with_capacity(factory, epoch, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(
        factory: Box<dyn DecoderFactory>,
        epoch: Arc<AtomicU64>,
        capacity: usize,
    ) -> Self {
        Self {
            sources: IndexMap::new(),
            factory,
            epoch,
            stats: CacheStats::default(),
            capacity: NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Register a reference to a source. The first reference creates
    /// the decoder; later ones only bump the refcount.
    pub fn register_source(&mut self, url: &str, fps: f64) -> Result<(), crate::entities::DecoderError> {
        let id = normalize_source_id(url);
        if let Some(entry) = self.sources.get_mut(&id) {
            entry.refcount += 1;
            entry.fps = fps;
            debug!("Source {} refcount -> {}", id, entry.refcount);
            return Ok(());
        }

        let mut lane = DecoderLane::new(self.factory.create(url)?);
        lane.bind(url)?;
        self.sources.insert(
            id.clone(),
            SourceEntry {
                lane,
                cache: LruCache::new(self.capacity),
                last_valid: None,
                pending: HashMap::new(),
                preload_pending: HashMap::new(),
                refcount: 1,
                fps,
            },
        );
        info!("Registered source {} (fps {})", id, fps);
        Ok(())
    }

    /// Drop a reference. At refcount zero the decoder is stopped and
    /// every cached frame is freed.
    pub fn release_source(&mut self, url: &str) {
        let id = normalize_source_id(url);
        let remaining = {
            let Some(entry) = self.sources.get_mut(&id) else {
                return;
            };
            entry.refcount = entry.refcount.saturating_sub(1);
            entry.refcount
        };

        if remaining == 0 {
            if let Some(mut entry) = self.sources.shift_remove(&id) {
                entry.lane.shutdown();
                let freed: usize = entry.cache.iter().map(|(_, f)| f.mem()).sum();
                info!("Released source {} ({} KB cached freed)", id, freed / 1024);
            }
        } else {
            debug!("Source {} refcount -> {}", id, remaining);
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.sources.contains_key(&normalize_source_id(url))
    }

    pub fn refcount(&self, url: &str) -> usize {
        self.sources
            .get(&normalize_source_id(url))
            .map(|e| e.refcount)
            .unwrap_or(0)
    }

    /// Direct lane access for sync/continuity decisions. Never rebind a
    /// lane's source through this; use register/release.
    pub fn lane_mut(&mut self, url: &str) -> Option<&mut DecoderLane> {
        self.sources.get_mut(&normalize_source_id(url)).map(|e| &mut e.lane)
    }

    pub fn readiness(&self, url: &str) -> Readiness {
        self.sources
            .get(&normalize_source_id(url))
            .map(|e| e.lane.readiness())
            .unwrap_or(Readiness::Idle)
    }

    /// Resolve one source frame.
    ///
    /// `budget` bounds how long this call may wait for decoder
    /// readiness: scrub-precision requests pass up to
    /// `DEFAULT_READINESS_BUDGET`, playback passes zero and relies on
    /// fallback plus a later cycle.
    pub fn get_frame(&mut self, url: &str, source_frame: i64, fps: f64, budget: Duration) -> FrameResult {
        let id = normalize_source_id(url);
        let Some(entry) = self.sources.get_mut(&id) else {
            // Registration race: treat as not-yet-renderable this cycle.
            return FrameResult::default();
        };
        entry.fps = fps;

        // 1. Cache hit promotes to most-recently-used.
        if let Some(frame) = entry.cache.get(&source_frame) {
            self.stats.record_hit();
            return FrameResult::cached(frame.clone());
        }
        self.stats.record_miss();

        // 2. Identical in-flight decode: share its eventual result.
        if entry.pending.contains_key(&source_frame)
            || entry.preload_pending.contains_key(&source_frame)
        {
            return FrameResult::fallback_from(entry.last_valid.as_ref());
        }

        // 3. Decode: seek only when off-target by more than one frame.
        let frame_duration = 1.0 / fps.max(1.0);
        let target = source_frame as f64 * frame_duration;
        entry.lane.seek_if_needed(target, frame_duration);

        let deadline = Instant::now() + budget;
        loop {
            entry.lane.pump();
            if entry.lane.readiness().at_least(Readiness::Current) {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }

        // 4. Capture an immutable snapshot of the target frame.
        if let Some(frame) = entry.lane.sample(target) {
            entry.cache.put(source_frame, frame.clone());
            entry.last_valid = Some(frame.clone());
            entry.pending.remove(&source_frame);
            return FrameResult::fresh(frame);
        }

        // 5. Not ready in time: leave the request pending so a later
        // pump can land it, degrade to the last valid frame now.
        entry.pending.insert(source_frame, Instant::now());
        FrameResult::fallback_from(entry.last_valid.as_ref())
    }

    /// Fire-and-forget background decode of uncached frames. Skipped
    /// entirely while a previous preload for this source is still in
    /// flight; individual frames are coalesced against foreground
    /// requests.
    pub fn preload_frames(&mut self, url: &str, frames: &[i64], fps: f64) {
        let id = normalize_source_id(url);
        let Some(entry) = self.sources.get_mut(&id) else {
            return;
        };
        if !entry.preload_pending.is_empty() {
            return;
        }

        let mut todo: Vec<i64> = frames
            .iter()
            .copied()
            .filter(|f| !entry.cache.contains(f) && !entry.pending.contains_key(f))
            .collect();
        todo.sort_unstable();
        todo.dedup();
        if todo.is_empty() {
            return;
        }

        let now = Instant::now();
        for &f in &todo {
            entry.preload_pending.insert(f, now);
        }
        debug!("Preloading {} frames for {}", todo.len(), id);
        entry.lane.prefetch(&todo, fps);
    }

    /// Per-cycle housekeeping: pump every lane, harvest decodes that
    /// completed since last cycle into the caches, expire lost requests.
    pub fn pump(&mut self) {
        for (_, entry) in self.sources.iter_mut() {
            entry.lane.pump();

            let fps = entry.fps.max(1.0);
            let now = Instant::now();
            let SourceEntry {
                lane,
                cache,
                last_valid,
                pending,
                preload_pending,
                ..
            } = entry;

            let mut harvest = |set: &mut HashMap<i64, Instant>| {
                set.retain(|&frame_idx, issued| {
                    if let Some(frame) = lane.sample(frame_idx as f64 / fps) {
                        cache.put(frame_idx, frame.clone());
                        *last_valid = Some(frame);
                        false
                    } else if now.duration_since(*issued) >= PENDING_EXPIRE {
                        warn!("Dropping stale decode request for frame {}", frame_idx);
                        false
                    } else {
                        true
                    }
                });
            };
            harvest(pending);
            harvest(preload_pending);
        }
    }

    /// Match decoder play state to the timeline: sources in the active
    /// set follow `playing`, everything else pauses (not destroyed, so
    /// reappearing clips resume instantly).
    pub fn sync_play_state<'a>(&mut self, active: impl Iterator<Item = &'a str>, playing: bool) {
        let active: std::collections::HashSet<String> =
            active.map(normalize_source_id).collect();
        for (id, entry) in self.sources.iter_mut() {
            entry.lane.set_playing(playing && active.contains(id));
        }
    }

    /// Current engine epoch (bumped on scrubs/structural changes).
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn cached_frames(&self, url: &str) -> usize {
        self.sources
            .get(&normalize_source_id(url))
            .map(|e| e.cache.len())
            .unwrap_or(0)
    }

    /// Total bytes held by frame caches, for diagnostics.
    pub fn mem_usage(&self) -> usize {
        self.sources
            .values()
            .map(|e| e.cache.iter().map(|(_, f)| f.mem()).sum::<usize>())
            .sum()
    }
}

impl Drop for SourceRegistry {
    fn drop(&mut self) {
        for (_, entry) in self.sources.iter_mut() {
            entry.lane.shutdown();
        }
    }
}
