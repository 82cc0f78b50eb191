//! Failure classification and telemetry records.

use serde::{Deserialize, Serialize};

use crate::engine::FlowKind;

/// Why a frame made no progress.
///
/// Ordered from least to most specific; when several faces fail for
/// different reasons the greatest one is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    NoFace,
    OutOfZone,
    TooFar,
    UnknownFace,
    LowConfidence,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoFace => "NO_FACE",
            Self::OutOfZone => "OUT_OF_ZONE",
            Self::TooFar => "TOO_FAR",
            Self::UnknownFace => "UNKNOWN_FACE",
            Self::LowConfidence => "LOW_CONFIDENCE",
        }
    }

    /// User-facing text.
    pub fn message(self) -> &'static str {
        match self {
            Self::NoFace => "No face detected",
            Self::OutOfZone => "Centre your face in the guide",
            Self::TooFar => "Move closer to the camera",
            Self::UnknownFace => "Face not recognised",
            Self::LowConfidence => "Hold still, confidence too low",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ScanFail,
    ScanSuccess,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScanFail => "SCAN_FAIL",
            Self::ScanSuccess => "SCAN_SUCCESS",
        }
    }
}

/// One fire-and-forget telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub kind: EventKind,
    pub reason: Option<FailureReason>,
    pub message: String,
    pub best_match: Option<String>,
    pub source: FlowKind,
}

impl TelemetryEvent {
    pub fn failure(reason: FailureReason, best_match: Option<String>, source: FlowKind) -> Self {
        Self {
            kind: EventKind::ScanFail,
            reason: Some(reason),
            message: reason.message().to_string(),
            best_match,
            source,
        }
    }

    pub fn success(label: &str, distance: f32, source: FlowKind) -> Self {
        Self {
            kind: EventKind::ScanSuccess,
            reason: None,
            message: format!("{label} accepted at distance {distance:.3}"),
            best_match: Some(label.to_string()),
            source,
        }
    }
}
