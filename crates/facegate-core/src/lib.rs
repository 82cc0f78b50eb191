//! Frame-by-frame face acceptance engine.
//!
//! Detector output goes in; per-face verdicts, a status line, telemetry and
//! at most one accept event come out. Nothing here performs I/O or reads a
//! clock.

pub mod challenge;
pub mod cooldown;
pub mod engine;
pub mod liveness;
pub mod matcher;
pub mod policy;
pub mod telemetry;
pub mod track;
pub mod types;
pub mod zone;

pub use engine::{
    AcceptEvent, FaceOutcome, FlowConfig, FlowKind, FrameInput, FrameProcessor, FrameReport,
    FrameStatus, Identifier, OverlayColour, ProcessError,
};
pub use matcher::{euclidean_distance, find_best_match, Gallery, MatchError, MatchResult};
pub use policy::{ConfidenceTier, Decision, StabilityPolicy};
pub use telemetry::{EventKind, FailureReason, TelemetryEvent};
pub use types::{BoundingBox, DetectedFace, Landmarks, Point, ReferenceIdentity};
