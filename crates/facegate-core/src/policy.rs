//! Adaptive stability policy.
//!
//! Match distance selects a confidence tier; less certain tiers need more
//! consecutive confirming frames. Any frame at or beyond the reject
//! boundary wipes all progress.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::track::FaceTrack;

/// Named confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Strict,
    Normal,
    MaskTolerant,
}

impl ConfidenceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Normal => "normal",
            Self::MaskTolerant => "mask_tolerant",
        }
    }
}

/// Distances strictly below `below` fall in this tier (unless an earlier
/// tier already claimed them).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub tier: ConfidenceTier,
    pub below: f32,
    pub required_frames: u32,
}

#[derive(Error, Debug, PartialEq)]
pub enum PolicyError {
    #[error("policy has no tiers")]
    NoTiers,
    #[error("tier boundaries must strictly increase ({0} follows {1})")]
    UnorderedBoundaries(f32, f32),
    #[error("required frames must not decrease across tiers ({0} follows {1})")]
    DecreasingFrames(u32, u32),
    #[error("tier {0:?} requires zero frames")]
    ZeroFrames(ConfidenceTier),
    #[error("tier {0:?} boundary {1} must be a positive finite distance")]
    InvalidBoundary(ConfidenceTier, f32),
}

/// Tier table plus liveness gating for one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityPolicy {
    /// Tiers in ascending boundary order.
    pub tiers: Vec<Tier>,
    /// Require a blink or natural motion before counting stable frames.
    #[serde(default)]
    pub require_liveness: bool,
    /// Require the head-turn challenge before counting stable frames.
    #[serde(default)]
    pub require_challenge: bool,
    /// Frames a track may wait on passive liveness before it is reported
    /// as low confidence.
    #[serde(default = "default_liveness_patience")]
    pub liveness_patience_frames: u32,
}

fn default_liveness_patience() -> u32 {
    25
}

impl StabilityPolicy {
    /// Multi-face check-in: accepts masked faces after a long confirmation.
    pub fn check_in() -> Self {
        Self {
            tiers: vec![
                Tier { tier: ConfidenceTier::Strict, below: 0.35, required_frames: 3 },
                Tier { tier: ConfidenceTier::Normal, below: 0.48, required_frames: 6 },
                Tier { tier: ConfidenceTier::MaskTolerant, below: 0.55, required_frames: 12 },
            ],
            require_liveness: false,
            require_challenge: false,
            liveness_patience_frames: default_liveness_patience(),
        }
    }

    /// Single-identity login: tighter bands and passive liveness required.
    pub fn login() -> Self {
        Self {
            tiers: vec![
                Tier { tier: ConfidenceTier::Strict, below: 0.42, required_frames: 3 },
                Tier { tier: ConfidenceTier::Normal, below: 0.48, required_frames: 5 },
            ],
            require_liveness: true,
            require_challenge: false,
            liveness_patience_frames: default_liveness_patience(),
        }
    }

    /// Enrollment: the candidate is known, only steadiness and the head-turn
    /// challenge matter.
    pub fn enroll() -> Self {
        Self {
            tiers: vec![Tier { tier: ConfidenceTier::Strict, below: 1.0, required_frames: 6 }],
            require_liveness: false,
            require_challenge: true,
            liveness_patience_frames: default_liveness_patience(),
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.tiers.is_empty() {
            return Err(PolicyError::NoTiers);
        }
        for tier in &self.tiers {
            if !tier.below.is_finite() || tier.below <= 0.0 {
                return Err(PolicyError::InvalidBoundary(tier.tier, tier.below));
            }
            if tier.required_frames == 0 {
                return Err(PolicyError::ZeroFrames(tier.tier));
            }
        }
        for pair in self.tiers.windows(2) {
            if pair[1].below <= pair[0].below {
                return Err(PolicyError::UnorderedBoundaries(pair[1].below, pair[0].below));
            }
            if pair[1].required_frames < pair[0].required_frames {
                return Err(PolicyError::DecreasingFrames(
                    pair[1].required_frames,
                    pair[0].required_frames,
                ));
            }
        }
        Ok(())
    }

    /// Distances at or above this are rejected outright.
    pub fn reject_boundary(&self) -> f32 {
        self.tiers.last().map_or(0.0, |t| t.below)
    }

    pub fn tier_for(&self, distance: f32) -> Option<&Tier> {
        self.tiers.iter().find(|t| distance < t.below)
    }

    pub fn required_frames(&self, distance: f32) -> Option<u32> {
        self.tier_for(distance).map(|t| t.required_frames)
    }
}

/// Per-frame verdict for one tracked face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// At or beyond the reject boundary; progress reset.
    Rejected,
    /// Waiting on the head-turn challenge.
    PendingChallenge,
    /// Waiting on a blink or natural motion.
    PendingLiveness { waited: u32 },
    /// Confirming: `stable` of `required` frames so far.
    Pending { tier: ConfidenceTier, stable: u32, required: u32 },
    /// Enough consecutive confirming frames. Reported on every frame that
    /// stays accepted; the caller latches side effects.
    Accepted { tier: ConfidenceTier, stable: u32 },
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn tier(&self) -> Option<ConfidenceTier> {
        match self {
            Self::Pending { tier, .. } | Self::Accepted { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}

/// Apply one frame at `distance` to `track` and decide.
pub fn decide(policy: &StabilityPolicy, track: &mut FaceTrack, distance: f32) -> Decision {
    track.last_distance = distance;

    let Some(tier) = policy.tier_for(distance).copied() else {
        track.stable_count = 0;
        return Decision::Rejected;
    };

    if policy.require_challenge && !track.challenge_satisfied() {
        return Decision::PendingChallenge;
    }

    if policy.require_liveness && !track.liveness_satisfied() {
        track.pending_liveness_frames = track.pending_liveness_frames.saturating_add(1);
        return Decision::PendingLiveness {
            waited: track.pending_liveness_frames,
        };
    }
    track.pending_liveness_frames = 0;

    track.stable_count = track.stable_count.saturating_add(1);
    if track.stable_count >= tier.required_frames {
        Decision::Accepted {
            tier: tier.tier,
            stable: track.stable_count,
        }
    } else {
        Decision::Pending {
            tier: tier.tier,
            stable: track.stable_count,
            required: tier.required_frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::tests::{closed_eyes, open_eyes};

    fn track() -> FaceTrack {
        FaceTrack::new("Alice Smith", 0.0, 10, None)
    }

    #[test]
    fn test_builtin_policies_validate() {
        StabilityPolicy::check_in().validate().unwrap();
        StabilityPolicy::login().validate().unwrap();
        StabilityPolicy::enroll().validate().unwrap();
    }

    #[test]
    fn test_check_in_tiers() {
        let p = StabilityPolicy::check_in();
        assert_eq!(p.required_frames(0.0), Some(3));
        assert_eq!(p.required_frames(0.349), Some(3));
        assert_eq!(p.required_frames(0.35), Some(6));
        assert_eq!(p.required_frames(0.50), Some(12));
        assert_eq!(p.required_frames(0.55), None);
        assert_eq!(p.reject_boundary(), 0.55);
    }

    #[test]
    fn test_validate_rejects_bad_tables() {
        let mut p = StabilityPolicy::check_in();
        p.tiers.swap(0, 1);
        assert!(matches!(p.validate(), Err(PolicyError::UnorderedBoundaries(..))));

        let mut p = StabilityPolicy::check_in();
        p.tiers[2].required_frames = 2;
        assert!(matches!(p.validate(), Err(PolicyError::DecreasingFrames(2, 6))));

        let p = StabilityPolicy { tiers: vec![], ..StabilityPolicy::login() };
        assert_eq!(p.validate(), Err(PolicyError::NoTiers));
    }

    #[test]
    fn test_validate_rejects_degenerate_boundaries() {
        for below in [f32::NAN, f32::INFINITY, 0.0, -0.3] {
            let mut p = StabilityPolicy::login();
            p.tiers[0].below = below;
            assert!(
                matches!(p.validate(), Err(PolicyError::InvalidBoundary(ConfidenceTier::Strict, _))),
                "below = {below} accepted"
            );
        }

        let p: StabilityPolicy = toml::from_str(
            r#"
            [[tiers]]
            tier = "strict"
            below = nan
            required_frames = 3
        "#,
        )
        .unwrap();
        assert!(matches!(p.validate(), Err(PolicyError::InvalidBoundary(..))));
    }

    #[test]
    fn test_strict_accepts_on_third_frame() {
        let p = StabilityPolicy::check_in();
        let mut t = track();
        assert!(matches!(decide(&p, &mut t, 0.1), Decision::Pending { stable: 1, required: 3, .. }));
        assert!(matches!(decide(&p, &mut t, 0.1), Decision::Pending { stable: 2, .. }));
        assert_eq!(
            decide(&p, &mut t, 0.1),
            Decision::Accepted { tier: ConfidenceTier::Strict, stable: 3 }
        );
    }

    #[test]
    fn test_reject_resets_progress() {
        let p = StabilityPolicy::check_in();
        let mut t = track();
        for _ in 0..10 {
            decide(&p, &mut t, 0.5);
        }
        assert_eq!(t.stable_count, 10);
        assert_eq!(decide(&p, &mut t, 0.55), Decision::Rejected);
        assert_eq!(t.stable_count, 0);
        assert_eq!(t.last_distance, 0.55);
    }

    #[test]
    fn test_liveness_gate_holds_progress() {
        let p = StabilityPolicy::login();
        let mut t = track();
        assert_eq!(decide(&p, &mut t, 0.1), Decision::PendingLiveness { waited: 1 });
        assert_eq!(decide(&p, &mut t, 0.1), Decision::PendingLiveness { waited: 2 });
        assert_eq!(t.stable_count, 0);

        t.observe(&closed_eyes());
        t.observe(&closed_eyes());
        t.observe(&open_eyes());
        assert!(matches!(decide(&p, &mut t, 0.1), Decision::Pending { stable: 1, .. }));
        assert_eq!(t.pending_liveness_frames, 0);
    }

    #[test]
    fn test_rejection_takes_priority_over_liveness() {
        let p = StabilityPolicy::login();
        let mut t = track();
        assert_eq!(decide(&p, &mut t, 0.9), Decision::Rejected);
    }

    #[test]
    fn test_challenge_gate() {
        let p = StabilityPolicy::enroll();
        let mut t = FaceTrack::new(
            "a@example.com",
            0.0,
            10,
            Some(crate::challenge::HeadTurnChallenge::new(
                crate::challenge::TurnDirection::Either,
            )),
        );
        assert_eq!(decide(&p, &mut t, 0.0), Decision::PendingChallenge);
        assert_eq!(t.stable_count, 0);
    }

    #[test]
    fn test_policy_from_toml() {
        let text = r#"
            require_liveness = true
            [[tiers]]
            tier = "strict"
            below = 0.4
            required_frames = 2
            [[tiers]]
            tier = "mask_tolerant"
            below = 0.6
            required_frames = 10
        "#;
        let p: StabilityPolicy = toml::from_str(text).unwrap();
        p.validate().unwrap();
        assert!(p.require_liveness);
        assert!(!p.require_challenge);
        assert_eq!(p.liveness_patience_frames, 25);
        assert_eq!(p.reject_boundary(), 0.6);
    }
}
