mod common;

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use common::{centred_face, closed_eyes, corner_face, frame, open_eyes};
use facegate_core::{
    FailureReason, FlowConfig, FrameProcessor, FrameStatus, Identifier, ReferenceIdentity,
};

const TICK: Duration = Duration::from_millis(200);

fn check_in(gallery: Vec<ReferenceIdentity>) -> FrameProcessor {
    let config = FlowConfig::check_in();
    let identifier = Identifier::gallery(gallery, &config.policy).unwrap();
    FrameProcessor::new(config, identifier, StdRng::seed_from_u64(42)).unwrap()
}

#[test]
fn test_identical_descriptor_accepts_on_third_frame() {
    let d_alice = vec![0.1, 0.2, 0.3, 0.4];
    let mut p = check_in(vec![ReferenceIdentity::new("Alice", d_alice.clone())]);
    let t0 = Instant::now();

    let frames = [
        frame(vec![centred_face(d_alice.clone(), closed_eyes())]),
        frame(vec![centred_face(d_alice.clone(), closed_eyes())]),
        frame(vec![centred_face(d_alice.clone(), open_eyes())]),
    ];

    let mut accepted_at = Vec::new();
    for (i, f) in frames.iter().enumerate() {
        let report = p.process(f, t0 + TICK * i as u32).unwrap();
        if let Some(event) = &report.accepted {
            assert_eq!(event.label, "Alice");
            assert_eq!(event.distance, 0.0);
            accepted_at.push(i + 1);
        }
    }
    assert_eq!(accepted_at, vec![3]);
    assert!(p.tracks().get("Alice").unwrap().blink_detected);
}

#[test]
fn test_distance_in_reject_band_never_accepts() {
    let mut p = check_in(vec![ReferenceIdentity::new("Alice", vec![0.0, 0.0])]);
    let t0 = Instant::now();
    let f = frame(vec![centred_face(vec![0.6, 0.0], open_eyes())]);

    for i in 0..50u32 {
        let report = p.process(&f, t0 + TICK * i).unwrap();
        assert!(report.accepted.is_none());
        assert!(report.status.is_failure());
        assert_eq!(report.faces[0].label, None);
        let stable = p.tracks().get("Alice").map_or(0, |t| t.stable_count);
        assert_eq!(stable, 0);
    }
}

#[test]
fn test_out_of_zone_face_is_rate_limited() {
    let mut p = check_in(vec![ReferenceIdentity::new("Alice", vec![0.0, 0.0])]);
    let t0 = Instant::now();
    let f = frame(vec![corner_face(vec![0.0, 0.0])]);

    let mut telemetry = 0;
    for i in 0..10u32 {
        let report = p.process(&f, t0 + TICK * i).unwrap();
        assert_eq!(report.status, FrameStatus::Failure(FailureReason::OutOfZone));
        assert!(p.tracks().is_empty());
        telemetry += report.telemetry.len();
    }
    assert_eq!(telemetry, 1);

    // A new window opens once ten seconds have passed.
    let report = p.process(&f, t0 + Duration::from_secs(11)).unwrap();
    assert_eq!(report.telemetry.len(), 1);
}

#[test]
fn test_brief_absence_halves_progress() {
    let mut p = check_in(vec![ReferenceIdentity::new("Bob", vec![0.0, 0.0])]);
    let t0 = Instant::now();
    // distance 0.4: normal tier, six frames required
    let bob = frame(vec![centred_face(vec![0.4, 0.0], open_eyes())]);
    let gap = frame(vec![corner_face(vec![0.4, 0.0])]);

    for i in 0..5u32 {
        let report = p.process(&bob, t0 + TICK * i).unwrap();
        assert!(report.accepted.is_none());
    }
    assert_eq!(p.tracks().get("Bob").unwrap().stable_count, 5);

    p.process(&gap, t0 + TICK * 5).unwrap();
    assert_eq!(p.tracks().get("Bob").unwrap().stable_count, 2);

    let report = p.process(&bob, t0 + TICK * 6).unwrap();
    assert_eq!(p.tracks().get("Bob").unwrap().stable_count, 3);
    assert!(matches!(
        report.status,
        FrameStatus::Confirming { stable: 3, required: 6, .. }
    ));
}

#[test]
fn test_empty_frame_is_hard_reset() {
    let mut p = check_in(vec![ReferenceIdentity::new("Bob", vec![0.0, 0.0])]);
    let t0 = Instant::now();
    let bob = frame(vec![centred_face(vec![0.4, 0.0], open_eyes())]);
    for i in 0..5u32 {
        p.process(&bob, t0 + TICK * i).unwrap();
    }
    let report = p.process(&frame(vec![]), t0 + TICK * 5).unwrap();
    assert!(report.tracks_cleared);

    p.process(&bob, t0 + TICK * 6).unwrap();
    assert_eq!(p.tracks().get("Bob").unwrap().stable_count, 1);
}
