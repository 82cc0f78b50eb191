//! Per-label face tracks and their lifecycle.
//!
//! A track accumulates liveness evidence and the stability counter for one
//! matched label across consecutive frames. Tracks decay (stable count
//! halved) when their label is missing from a frame and are dropped once
//! the count reaches zero.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::challenge::HeadTurnChallenge;
use crate::liveness::{
    classify_turn, detect_blink, estimate_head_pose, motion_magnitude, summarize_motion,
    LivenessState, MotionSummary,
};
use crate::types::Landmarks;

/// Default number of motion samples kept per track.
pub const DEFAULT_MOTION_CAPACITY: usize = 10;

/// Bounded FIFO of per-frame motion magnitudes.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionHistory {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl MotionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn push(&mut self, sample: f32) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.samples.iter()
    }

    pub fn summary(&self) -> MotionSummary {
        summarize_motion(self.samples.iter())
    }
}

/// Accumulated evidence for one matched label.
#[derive(Debug, Clone)]
pub struct FaceTrack {
    pub label: String,
    pub stable_count: u32,
    pub last_distance: f32,
    pub liveness: LivenessState,
    pub motion_history: MotionHistory,
    /// Sticky once a blink has been seen.
    pub blink_detected: bool,
    pub last_landmarks: Option<Landmarks>,
    pub challenge: Option<HeadTurnChallenge>,
    /// Consecutive frames this track has waited on passive liveness.
    pub pending_liveness_frames: u32,
}

impl FaceTrack {
    pub fn new(
        label: impl Into<String>,
        distance: f32,
        motion_capacity: usize,
        challenge: Option<HeadTurnChallenge>,
    ) -> Self {
        Self {
            label: label.into(),
            stable_count: 0,
            last_distance: distance,
            liveness: LivenessState::default(),
            motion_history: MotionHistory::new(motion_capacity),
            blink_detected: false,
            last_landmarks: None,
            challenge,
            pending_liveness_frames: 0,
        }
    }

    /// Run the liveness extractors on this frame's landmarks and commit
    /// their state.
    pub fn observe(&mut self, landmarks: &Landmarks) {
        let (blink, liveness) = detect_blink(landmarks, &self.liveness);
        self.liveness = liveness;
        self.blink_detected |= blink.is_blink;

        let motion = motion_magnitude(landmarks, self.last_landmarks.as_ref());
        self.motion_history.push(motion);
        self.liveness.motion_score = self.motion_history.summary().mean_motion;

        let pose = estimate_head_pose(landmarks);
        self.liveness.last_head_pose = pose.pose;
        if let Some(challenge) = self.challenge.as_mut() {
            challenge.advance(classify_turn(pose.ratio));
            self.liveness.challenge_completed |= challenge.is_completed();
        }

        self.last_landmarks = Some(landmarks.clone());
    }

    /// A confirmed blink, or a full motion window in the natural band.
    pub fn liveness_satisfied(&self) -> bool {
        self.blink_detected
            || (self.motion_history.is_full() && self.motion_history.summary().is_natural)
    }

    /// True when no challenge was issued or the issued one is complete.
    pub fn challenge_satisfied(&self) -> bool {
        self.challenge.as_ref().map_or(true, |c| c.is_completed())
    }
}

/// All live tracks for one session, keyed by label.
#[derive(Debug, Default)]
pub struct TrackTable {
    tracks: HashMap<String, FaceTrack>,
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<&FaceTrack> {
        self.tracks.get(label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut FaceTrack> {
        self.tracks.get_mut(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.tracks.contains_key(label)
    }

    /// Fetch the track for `label`, creating it with `create` on first sight.
    pub fn get_or_insert_with(
        &mut self,
        label: &str,
        create: impl FnOnce() -> FaceTrack,
    ) -> &mut FaceTrack {
        self.tracks.entry(label.to_string()).or_insert_with(|| {
            tracing::debug!(label, "track created");
            create()
        })
    }

    /// Halve the stable count of every track whose label is not in
    /// `present`, removing those that reach zero. Returns removed labels.
    pub fn decay_absent(&mut self, present: &HashSet<String>) -> Vec<String> {
        let mut removed = Vec::new();
        self.tracks.retain(|label, track| {
            if present.contains(label) {
                return true;
            }
            track.stable_count /= 2;
            if track.stable_count == 0 {
                removed.push(label.clone());
                false
            } else {
                true
            }
        });
        for label in &removed {
            tracing::debug!(label = %label, "track removed after decay");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.tracks.keys().map(String::as_str)
    }
}
