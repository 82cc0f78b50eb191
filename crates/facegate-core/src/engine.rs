//! Per-frame reducer composing admission, matching, tracking and policy.
//!
//! [`FrameProcessor::process`] is synchronous and reads no clock: the
//! caller passes `now`. It owns every piece of mutable per-session state
//! (tracks, cooldowns, the challenge RNG, the in-flight action latch), so
//! the async loop around it only moves frames in and reports out.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::challenge::HeadTurnChallenge;
use crate::cooldown::CooldownMap;
use crate::matcher::{Gallery, MatchError, MatchResult};
use crate::policy::{decide, ConfidenceTier, Decision, PolicyError, StabilityPolicy};
use crate::telemetry::{FailureReason, TelemetryEvent};
use crate::track::{FaceTrack, TrackTable, DEFAULT_MOTION_CAPACITY};
use crate::types::{BoundingBox, DetectedFace, ReferenceIdentity};
use crate::zone::{AdmissionConfig, Placement};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),
}

// ── Flow configuration ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    CheckIn,
    Login,
    Enroll,
}

impl FlowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckIn => "checkin",
            Self::Login => "login",
            Self::Enroll => "enroll",
        }
    }

    /// Login and enrollment only look at the first detected face.
    pub fn single_face(self) -> bool {
        !matches!(self, Self::CheckIn)
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkin" | "check-in" | "check_in" => Ok(Self::CheckIn),
            "login" => Ok(Self::Login),
            "enroll" => Ok(Self::Enroll),
            other => Err(format!("unknown flow '{other}' (expected checkin, login or enroll)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub kind: FlowKind,
    pub policy: StabilityPolicy,
    pub admission: AdmissionConfig,
    pub motion_capacity: usize,
    /// Per-label suppression after an accept action is dispatched.
    pub accept_cooldown: Duration,
    /// Per-reason suppression of failure telemetry.
    pub telemetry_window: Duration,
}

impl FlowConfig {
    pub fn for_kind(kind: FlowKind) -> Self {
        let (policy, admission) = match kind {
            FlowKind::CheckIn => (StabilityPolicy::check_in(), AdmissionConfig::check_in()),
            FlowKind::Login => (StabilityPolicy::login(), AdmissionConfig::login()),
            FlowKind::Enroll => (StabilityPolicy::enroll(), AdmissionConfig::enroll()),
        };
        Self {
            kind,
            policy,
            admission,
            motion_capacity: DEFAULT_MOTION_CAPACITY,
            accept_cooldown: Duration::from_secs(10),
            telemetry_window: Duration::from_secs(10),
        }
    }

    pub fn check_in() -> Self {
        Self::for_kind(FlowKind::CheckIn)
    }

    pub fn login() -> Self {
        Self::for_kind(FlowKind::Login)
    }

    pub fn enroll() -> Self {
        Self::for_kind(FlowKind::Enroll)
    }
}

/// How a descriptor becomes a label for this session.
#[derive(Debug, Clone)]
pub enum Identifier {
    /// Nearest neighbour over a session gallery.
    Gallery(Gallery),
    /// Every face is the account being enrolled.
    Candidate(String),
}

impl Identifier {
    /// Gallery gated at the policy's reject boundary, the single
    /// plausibility threshold for the session.
    pub fn gallery(
        references: Vec<ReferenceIdentity>,
        policy: &StabilityPolicy,
    ) -> Result<Self, MatchError> {
        Gallery::new(references, policy.reject_boundary()).map(Self::Gallery)
    }

    fn identify(&self, descriptor: &[f32]) -> Result<MatchResult, MatchError> {
        match self {
            Self::Gallery(gallery) => gallery.find_best_match(descriptor),
            Self::Candidate(label) => Ok(MatchResult::certain(label.as_str())),
        }
    }
}

// ── Frame input / output ──────────────────────────────────────────────────────

/// Detector output for one captured frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInput {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayColour {
    Green,
    Yellow,
    Orange,
    Red,
}

impl OverlayColour {
    fn for_tier(tier: ConfidenceTier) -> Self {
        match tier {
            ConfidenceTier::Strict => Self::Green,
            ConfidenceTier::Normal => Self::Yellow,
            ConfidenceTier::MaskTolerant => Self::Orange,
        }
    }
}

/// Overlay entry and verdict for one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOutcome {
    pub bounding_box: BoundingBox,
    pub placement: Placement,
    pub label: Option<String>,
    pub distance: Option<f32>,
    pub decision: Option<Decision>,
    pub colour: OverlayColour,
    pub caption: String,
}

/// The single side effect a frame may trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptEvent {
    pub label: String,
    pub distance: f32,
    pub tier: ConfidenceTier,
    pub descriptor: Vec<f32>,
}

/// Headline status for the frame, one per tick.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    Accepted { label: String, tier: ConfidenceTier },
    Confirming { label: String, stable: u32, required: u32 },
    AwaitingChallenge { label: String, instruction: &'static str },
    AwaitingLiveness { label: String },
    Failure(FailureReason),
}

impl FrameStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Accepted { .. } => 4,
            Self::Confirming { .. } => 3,
            Self::AwaitingChallenge { .. } => 2,
            Self::AwaitingLiveness { .. } => 1,
            Self::Failure(_) => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Short human-readable status line.
    pub fn message(&self) -> String {
        match self {
            Self::Accepted { label, .. } => format!("Welcome, {label}"),
            Self::Confirming { label, stable, required } => {
                format!("Verifying {label} ({stable}/{required})")
            }
            Self::AwaitingChallenge { instruction, .. } => (*instruction).to_string(),
            Self::AwaitingLiveness { .. } => "Please blink naturally".to_string(),
            Self::Failure(reason) => reason.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub faces: Vec<FaceOutcome>,
    pub status: FrameStatus,
    pub accepted: Option<AcceptEvent>,
    pub telemetry: Vec<TelemetryEvent>,
    /// All tracks were dropped because no face was detected.
    pub tracks_cleared: bool,
}

// ── Processor ─────────────────────────────────────────────────────────────────

pub struct FrameProcessor {
    config: FlowConfig,
    identifier: Identifier,
    tracks: TrackTable,
    accept_cooldowns: CooldownMap,
    telemetry_limiter: CooldownMap,
    rng: StdRng,
    pending_action: Option<String>,
}

impl FrameProcessor {
    pub fn new(config: FlowConfig, identifier: Identifier, rng: StdRng) -> Result<Self, ProcessError> {
        config.policy.validate()?;
        Ok(Self {
            accept_cooldowns: CooldownMap::new(config.accept_cooldown),
            telemetry_limiter: CooldownMap::new(config.telemetry_window),
            config,
            identifier,
            tracks: TrackTable::new(),
            rng,
            pending_action: None,
        })
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn tracks(&self) -> &TrackTable {
        &self.tracks
    }

    /// Label whose accept action is still in flight.
    pub fn pending_action(&self) -> Option<&str> {
        self.pending_action.as_deref()
    }

    /// Advance every track by one detector result.
    pub fn process(&mut self, frame: &FrameInput, now: Instant) -> Result<FrameReport, ProcessError> {
        let flow = self.config.kind;
        let mut report = FrameReport {
            faces: Vec::new(),
            status: FrameStatus::Failure(FailureReason::NoFace),
            accepted: None,
            telemetry: Vec::new(),
            tracks_cleared: false,
        };

        if frame.faces.is_empty() {
            if !self.tracks.is_empty() {
                tracing::debug!(tracks = self.tracks.len(), "no face, clearing tracks");
                self.tracks.clear();
                report.tracks_cleared = true;
            }
            self.emit_failure(FailureReason::NoFace, None, now, &mut report);
            return Ok(report);
        }

        let faces = if flow.single_face() {
            &frame.faces[..1]
        } else {
            &frame.faces[..]
        };

        let mut present: HashSet<String> = HashSet::new();
        let mut worst_failure: Option<(FailureReason, Option<String>)> = None;
        let mut note_failure = |reason: FailureReason, best: Option<String>| {
            if worst_failure.as_ref().map_or(true, |(r, _)| reason > *r) {
                worst_failure = Some((reason, best));
            }
        };

        for face in faces {
            let placement = self
                .config
                .admission
                .assess(&face.bounding_box, frame.width, frame.height);

            if !placement.is_admitted() {
                let (reason, colour) = match placement {
                    Placement::TooFar => (FailureReason::TooFar, OverlayColour::Yellow),
                    _ => (FailureReason::OutOfZone, OverlayColour::Red),
                };
                note_failure(reason, None);
                report.faces.push(FaceOutcome {
                    bounding_box: face.bounding_box,
                    placement,
                    label: None,
                    distance: None,
                    decision: None,
                    colour,
                    caption: reason.message().to_string(),
                });
                continue;
            }

            let result = self.identifier.identify(&face.descriptor)?;
            let distance = result.distance;

            if result.is_unknown() {
                // A label already matched by another face this frame keeps its track.
                let nearest_track = result
                    .nearest
                    .as_deref()
                    .filter(|nearest| !present.contains(*nearest))
                    .and_then(|nearest| self.tracks.get_mut(nearest));
                let (reason, decision) = match nearest_track {
                    Some(track) => {
                        let decision = decide(&self.config.policy, track, distance);
                        tracing::debug!(label = %track.label, distance, "track reset by reject-band frame");
                        present.insert(track.label.clone());
                        (FailureReason::LowConfidence, Some(decision))
                    }
                    None => (FailureReason::UnknownFace, None),
                };
                note_failure(reason, result.nearest.clone());
                report.faces.push(FaceOutcome {
                    bounding_box: face.bounding_box,
                    placement,
                    label: None,
                    distance: Some(distance),
                    decision,
                    colour: OverlayColour::Red,
                    caption: result.to_string(),
                });
                continue;
            }

            let label = result.label;
            present.insert(label.clone());

            let capacity = self.config.motion_capacity;
            let require_challenge = self.config.policy.require_challenge;
            let rng = &mut self.rng;
            let track = self.tracks.get_or_insert_with(&label, || {
                FaceTrack::new(
                    label.as_str(),
                    distance,
                    capacity,
                    require_challenge.then(|| HeadTurnChallenge::random(rng)),
                )
            });
            track.observe(&face.landmarks);
            let decision = decide(&self.config.policy, track, distance);
            let instruction = track.challenge.as_ref().map(HeadTurnChallenge::instruction);

            tracing::debug!(label = %label, distance, ?decision, "face decided");

            let tier_colour = self
                .config
                .policy
                .tier_for(distance)
                .map_or(OverlayColour::Red, |t| OverlayColour::for_tier(t.tier));

            let status = match decision {
                Decision::Rejected => {
                    note_failure(FailureReason::LowConfidence, Some(label.clone()));
                    None
                }
                Decision::PendingChallenge => Some(FrameStatus::AwaitingChallenge {
                    label: label.clone(),
                    instruction: instruction.unwrap_or("Turn your head to one side"),
                }),
                Decision::PendingLiveness { waited } => {
                    if waited > self.config.policy.liveness_patience_frames {
                        self.emit_failure(
                            FailureReason::LowConfidence,
                            Some(label.clone()),
                            now,
                            &mut report,
                        );
                    }
                    Some(FrameStatus::AwaitingLiveness { label: label.clone() })
                }
                Decision::Pending { stable, required, .. } => Some(FrameStatus::Confirming {
                    label: label.clone(),
                    stable,
                    required,
                }),
                Decision::Accepted { tier, stable } => {
                    if report.accepted.is_none()
                        && self.pending_action.is_none()
                        && self.accept_cooldowns.try_start(&label, now)
                    {
                        tracing::info!(label = %label, distance, stable, tier = tier.as_str(), "face accepted");
                        self.pending_action = Some(label.clone());
                        report.telemetry.push(TelemetryEvent::success(&label, distance, flow));
                        report.accepted = Some(AcceptEvent {
                            label: label.clone(),
                            distance,
                            tier,
                            descriptor: face.descriptor.clone(),
                        });
                    }
                    Some(FrameStatus::Accepted { label: label.clone(), tier })
                }
            };

            let (colour, caption) = match &status {
                Some(FrameStatus::Accepted { .. }) => (OverlayColour::Green, format!("{label} ({distance:.2})")),
                Some(FrameStatus::Confirming { stable, required, .. }) => {
                    (tier_colour, format!("{label} ({distance:.2}) {stable}/{required}"))
                }
                Some(other) => (tier_colour, other.message()),
                None => (OverlayColour::Red, format!("{label} ({distance:.2})")),
            };

            report.faces.push(FaceOutcome {
                bounding_box: face.bounding_box,
                placement,
                label: Some(label.clone()),
                distance: Some(distance),
                decision: Some(decision),
                colour,
                caption,
            });

            if let Some(status) = status {
                if status.rank() > report.status.rank() {
                    report.status = status;
                }
            }
        }

        self.tracks.decay_absent(&present);

        if report.status.is_failure() {
            if let Some((reason, best)) = worst_failure {
                report.status = FrameStatus::Failure(reason);
                self.emit_failure(reason, best, now, &mut report);
            }
        }

        Ok(report)
    }

    /// Report the outcome of the accept action for `label`.
    ///
    /// A failed action lifts that label's cooldown so the next accepted
    /// frame can retry.
    pub fn resolve_action(&mut self, label: &str, success: bool) {
        if self.pending_action.as_deref() == Some(label) {
            self.pending_action = None;
        }
        if !success {
            tracing::debug!(label, "accept action failed, lifting cooldown");
            self.accept_cooldowns.clear(label);
        }
    }

    /// Drop all tracks and latches (session stop).
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.pending_action = None;
    }

    fn emit_failure(
        &mut self,
        reason: FailureReason,
        best_match: Option<String>,
        now: Instant,
        report: &mut FrameReport,
    ) {
        if self.telemetry_limiter.try_start(reason.as_str(), now) {
            report
                .telemetry
                .push(TelemetryEvent::failure(reason, best_match, self.config.kind));
        }
    }
}
