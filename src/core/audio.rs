//! Audio direction - per-source play/seek/volume commands.
//!
//! The engine does not mix or output audio; it emits one command per
//! audible source each cycle and the embedding application drives its
//! audio output from them.
//!
//! Continuity is keyed by source id, not clip id: when playback crosses
//! a cut between two clips of the same source, the predicted position
//! of that source's audio matches the next clip's target, drift stays
//! inside the tolerance and no re-seek (audible click) is issued. A
//! hard sync happens only on real discontinuities: cross-source cuts,
//! user seeks, or accumulated drift.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::core::resolver::AudioRequest;

/// Positional drift (seconds) tolerated before a hard re-sync.
pub const AUDIO_DRIFT_TOLERANCE: f64 = 0.08;

/// One instruction for the external audio output.
#[derive(Debug, Clone)]
pub struct AudioCommand {
    pub source_id: String,
    pub source_url: String,
    pub target_time: f64,
    pub playing: bool,
    pub volume: f32,
    pub muted: bool,
    pub rate: f32,
    /// True when the output must seek to `target_time` rather than
    /// letting its own clock continue.
    pub hard_sync: bool,
}

/// Per-cycle set of audio commands. Sources that stopped being audible
/// get one final `playing = false` command.
#[derive(Debug, Clone, Default)]
pub struct AudioPlan {
    pub commands: Vec<AudioCommand>,
}

#[derive(Debug, Clone)]
struct LaneState {
    last_time: f64,
    last_frame: i64,
    url: String,
}

/// Tracks audio position per source and decides when to hard-sync.
#[derive(Debug, Default)]
pub struct AudioDirector {
    states: HashMap<String, LaneState>,
    drift_tolerance: f64,
}

impl AudioDirector {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            drift_tolerance: AUDIO_DRIFT_TOLERANCE,
        }
    }

    /// Build the command set for this cycle.
    pub fn plan(
        &mut self,
        requests: &[AudioRequest],
        frame: i64,
        fps: f64,
        playing: bool,
        force_sync: bool,
    ) -> AudioPlan {
        let fps = fps.max(1.0);

        // Merge per source: the first request (z-order) provides the
        // target time, volume is the loudest unmuted contributor.
        struct Merged<'a> {
            request: &'a AudioRequest,
            volume: f32,
            muted: bool,
        }
        let mut merged: IndexMap<&str, Merged> = IndexMap::new();
        for req in requests {
            match merged.entry(req.source_id.as_str()) {
                indexmap::map::Entry::Occupied(mut e) => {
                    let m = e.get_mut();
                    if !req.muted {
                        m.volume = m.volume.max(req.volume);
                        m.muted = false;
                    }
                }
                indexmap::map::Entry::Vacant(v) => {
                    v.insert(Merged {
                        request: req,
                        volume: req.volume,
                        muted: req.muted,
                    });
                }
            }
        }

        let mut commands = Vec::with_capacity(merged.len());

        for (id, m) in &merged {
            let target = m.request.source_time;
            let hard_sync = force_sync
                || match self.states.get(*id) {
                    Some(state) => {
                        let predicted =
                            state.last_time + (frame - state.last_frame) as f64 / fps;
                        (target - predicted).abs() > self.drift_tolerance
                    }
                    // First time this source is audible.
                    None => true,
                };

            self.states.insert(
                id.to_string(),
                LaneState {
                    last_time: target,
                    last_frame: frame,
                    url: m.request.source_url.clone(),
                },
            );

            commands.push(AudioCommand {
                source_id: id.to_string(),
                source_url: m.request.source_url.clone(),
                target_time: target,
                playing,
                volume: m.volume,
                muted: m.muted,
                rate: m.request.rate,
                hard_sync,
            });
        }

        // Sources no longer audible: one stop command, state dropped.
        let gone: Vec<String> = self
            .states
            .keys()
            .filter(|id| !merged.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in gone {
            let state = self.states.remove(&id);
            commands.push(AudioCommand {
                source_url: state.map(|s| s.url).unwrap_or_else(|| id.clone()),
                source_id: id,
                target_time: 0.0,
                playing: false,
                volume: 0.0,
                muted: true,
                rate: 1.0,
                hard_sync: false,
            });
        }

        AudioPlan { commands }
    }

    /// Forget all continuity state (track list rebuilt, hard seek).
    pub fn reset(&mut self) {
        self.states.clear();
    }
}
