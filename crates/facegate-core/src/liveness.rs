//! Passive liveness signals computed from 68-point facial landmarks.
//!
//! A printed photograph or a still image on a phone screen produces no
//! blinks and near-identical landmark positions across consecutive frames.
//! A live person blinks and drifts slightly even while looking straight at
//! the camera. A looping replay tends to move too much.
//!
//! Every extractor here is a pure function of landmark data and prior
//! state. State is returned, never mutated in place, so callers decide when
//! to commit it.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs, static images held in front of camera.
//! - **Does not block:** A replay that blinks at a natural rate, 3D masks.

use serde::{Deserialize, Serialize};

use crate::types::{Landmarks, Point};

/// Average eye aspect ratio below which the eyes count as closed.
pub const EAR_THRESHOLD: f32 = 0.21;
/// Consecutive closed frames required before a reopening counts as a blink.
pub const EAR_CONSEC_FRAMES: u32 = 2;
/// EAR reported for degenerate eye geometry (treated as open).
pub const DEFAULT_OPEN_EAR: f32 = 0.3;
/// Pose-ratio offset from 1.0 that counts as a deliberate head turn.
pub const HEAD_TURN_THRESHOLD: f32 = 0.45;
/// Open interval of pose ratios that counts as facing the camera.
pub const STRAIGHT_RATIO_RANGE: (f32, f32) = (0.75, 1.35);
/// Minimum samples before natural movement can be asserted.
pub const NATURAL_MOTION_MIN_SAMPLES: usize = 5;
/// Mean nose-tip motion below this (pixels/frame) suggests a static photo.
pub const NATURAL_MOTION_FLOOR: f32 = 0.5;
/// Mean nose-tip motion above this (pixels/frame) suggests an erratic replay.
pub const NATURAL_MOTION_CEILING: f32 = 20.0;

/// Coarse head orientation estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    /// Approximate yaw in degrees, positive when turned left.
    pub yaw: f32,
    /// Vertical nose offset below the eye line, normalised.
    pub pitch: f32,
}

/// Accumulated passive-liveness evidence for one tracked face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessState {
    pub blink_count: u32,
    pub last_ear: f32,
    pub eye_closed_frames: u32,
    pub last_head_pose: HeadPose,
    pub motion_score: f32,
    pub challenge_completed: bool,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self {
            blink_count: 0,
            last_ear: DEFAULT_OPEN_EAR,
            eye_closed_frames: 0,
            last_head_pose: HeadPose::default(),
            motion_score: 0.0,
            challenge_completed: false,
        }
    }
}

// ── Blink ─────────────────────────────────────────────────────────────────────

/// Eye aspect ratio `(|p2-p6| + |p3-p5|) / (2 * |p1-p4|)`.
///
/// Returns [`DEFAULT_OPEN_EAR`] when the horizontal eye width is zero.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> f32 {
    let vertical_a = eye[1].distance(&eye[5]);
    let vertical_b = eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);

    if horizontal == 0.0 {
        return DEFAULT_OPEN_EAR;
    }
    (vertical_a + vertical_b) / (2.0 * horizontal)
}

/// Result of one blink-detector step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkSignal {
    /// True exactly once per qualifying closed-to-open transition.
    pub is_blink: bool,
    /// Average EAR of both eyes for this frame.
    pub ear: f32,
}

/// Advance the blink detector by one frame.
pub fn detect_blink(landmarks: &Landmarks, state: &LivenessState) -> (BlinkSignal, LivenessState) {
    let ear = (eye_aspect_ratio(&landmarks.left_eye()) + eye_aspect_ratio(&landmarks.right_eye())) / 2.0;

    let mut next = state.clone();
    next.last_ear = ear;
    let mut is_blink = false;

    if ear < EAR_THRESHOLD {
        next.eye_closed_frames = state.eye_closed_frames.saturating_add(1);
    } else {
        if state.eye_closed_frames >= EAR_CONSEC_FRAMES {
            next.blink_count = state.blink_count.saturating_add(1);
            is_blink = true;
        }
        next.eye_closed_frames = 0;
    }

    (BlinkSignal { is_blink, ear }, next)
}

// ── Head pose ─────────────────────────────────────────────────────────────────

/// Pose ratio plus derived yaw/pitch for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimate {
    /// Horizontal nose-to-left-eye over nose-to-right-eye distance.
    pub ratio: f32,
    pub pose: HeadPose,
}

/// Estimate head orientation from the nose tip and outer eye corners.
pub fn estimate_head_pose(landmarks: &Landmarks) -> PoseEstimate {
    let nose = landmarks.nose_tip();
    let left_eye = landmarks.left_eye_outer();
    let right_eye = landmarks.right_eye_outer();

    let to_left = (nose.x - left_eye.x).abs();
    let to_right = (nose.x - right_eye.x).abs();

    let ratio = if to_right > 0.0 {
        to_left / to_right
    } else if to_left > 0.0 {
        f32::INFINITY
    } else {
        1.0
    };

    let eye_center_y = (left_eye.y + right_eye.y) / 2.0;
    let pose = HeadPose {
        yaw: if ratio.is_finite() { (ratio - 1.0) * 30.0 } else { 30.0 },
        pitch: (nose.y - eye_center_y) / 50.0,
    };

    PoseEstimate { ratio, pose }
}

/// Discrete head orientation band. `Neutral` is the dead zone between
/// facing straight and a deliberate turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadTurn {
    Straight,
    Left,
    Right,
    Neutral,
}

pub fn classify_turn(ratio: f32) -> HeadTurn {
    if ratio > 1.0 + HEAD_TURN_THRESHOLD {
        HeadTurn::Left
    } else if ratio < 1.0 - HEAD_TURN_THRESHOLD {
        HeadTurn::Right
    } else if ratio > STRAIGHT_RATIO_RANGE.0 && ratio < STRAIGHT_RATIO_RANGE.1 {
        HeadTurn::Straight
    } else {
        HeadTurn::Neutral
    }
}

// ── Motion ────────────────────────────────────────────────────────────────────

/// Nose-tip displacement in pixels since the previous frame, 0 without one.
pub fn motion_magnitude(current: &Landmarks, previous: Option<&Landmarks>) -> f32 {
    previous
        .map(|prev| current.nose_tip().distance(&prev.nose_tip()))
        .unwrap_or(0.0)
}

/// Summary of a motion-sample window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSummary {
    /// Whether the mean lies in the natural-movement band.
    pub is_natural: bool,
    /// Mean nose-tip motion in pixels per frame.
    pub mean_motion: f32,
    /// Number of samples analysed.
    pub samples: usize,
}

/// Judge whether a window of motion samples looks like a live subject.
///
/// Fewer than [`NATURAL_MOTION_MIN_SAMPLES`] samples never counts as
/// natural movement.
pub fn summarize_motion<'a>(samples: impl IntoIterator<Item = &'a f32>) -> MotionSummary {
    let (count, total) = samples
        .into_iter()
        .fold((0usize, 0.0f32), |(n, sum), s| (n + 1, sum + s));

    let mean_motion = if count > 0 { total / count as f32 } else { 0.0 };

    MotionSummary {
        is_natural: count >= NATURAL_MOTION_MIN_SAMPLES
            && (NATURAL_MOTION_FLOOR..=NATURAL_MOTION_CEILING).contains(&mean_motion),
        mean_motion,
        samples: count,
    }
}

pub fn has_natural_movement<'a>(samples: impl IntoIterator<Item = &'a f32>) -> bool {
    summarize_motion(samples).is_natural
}
