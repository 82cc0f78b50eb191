mod common;

use proptest::collection::vec;
use proptest::prelude::*;

use facegate_core::liveness::{detect_blink, LivenessState};
use facegate_core::policy::{decide, Decision, StabilityPolicy};
use facegate_core::track::{FaceTrack, MotionHistory};
use facegate_core::euclidean_distance;

fn descriptor_pair() -> impl Strategy<Value = (Vec<f32>, Vec<f32>)> {
    (1usize..=128).prop_flat_map(|n| (vec(-1.0f32..1.0, n), vec(-1.0f32..1.0, n)))
}

proptest! {
    #[test]
    fn pt_distance_symmetric_and_zero_on_self((a, b) in descriptor_pair()) {
        let ab = euclidean_distance(&a, &b).unwrap();
        let ba = euclidean_distance(&b, &a).unwrap();
        prop_assert_eq!(ab, ba);
        prop_assert!(ab >= 0.0);
        prop_assert_eq!(euclidean_distance(&a, &a).unwrap(), 0.0);
    }

    #[test]
    fn pt_required_frames_monotonic(
        d1 in 0.0f32..0.55,
        d2 in 0.0f32..0.55,
    ) {
        let (lo, hi) = if d1 <= d2 { (d1, d2) } else { (d2, d1) };
        for policy in [StabilityPolicy::check_in(), StabilityPolicy::login()] {
            let boundary = policy.reject_boundary();
            if hi < boundary {
                let r_lo = policy.required_frames(lo).unwrap();
                let r_hi = policy.required_frames(hi).unwrap();
                prop_assert!(r_lo <= r_hi);
            }
        }
    }

    #[test]
    fn pt_reject_band_resets_stable_count(
        prior in 0u32..10_000,
        distance in 0.55f32..10.0,
    ) {
        let policy = StabilityPolicy::check_in();
        let mut track = FaceTrack::new("Alice Smith", 0.1, 10, None);
        track.stable_count = prior;
        prop_assert_eq!(decide(&policy, &mut track, distance), Decision::Rejected);
        prop_assert_eq!(track.stable_count, 0);
    }

    #[test]
    fn pt_motion_history_bounded_fifo(
        capacity in 1usize..32,
        samples in vec(0.0f32..50.0, 0..200),
    ) {
        let mut history = MotionHistory::new(capacity);
        for s in &samples {
            history.push(*s);
            prop_assert!(history.len() <= capacity);
        }
        prop_assert_eq!(history.len(), samples.len().min(capacity));
        let kept: Vec<f32> = history.iter().copied().collect();
        prop_assert_eq!(&kept[..], &samples[samples.len() - kept.len()..]);
    }

    #[test]
    fn pt_one_blink_per_closure(closed in 2usize..200, open in 1usize..20) {
        let closed_lm = common::closed_eyes();
        let open_lm = common::open_eyes();
        let mut state = LivenessState::default();
        let mut blinks = 0;
        for _ in 0..closed {
            let (signal, next) = detect_blink(&closed_lm, &state);
            blinks += signal.is_blink as u32;
            state = next;
        }
        for _ in 0..open {
            let (signal, next) = detect_blink(&open_lm, &state);
            blinks += signal.is_blink as u32;
            state = next;
        }
        prop_assert_eq!(blinks, 1);
    }
}
