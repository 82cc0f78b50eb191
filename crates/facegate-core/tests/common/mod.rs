#![allow(dead_code)]

use facegate_core::types::LANDMARK_COUNT;
use facegate_core::{BoundingBox, DetectedFace, FrameInput, Landmarks, Point};

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Frontal face: 30 px wide eyes with outer corners at x=100 and x=200,
/// nose tip centred at x=150. `eye_opening` is the lid gap in px, so 9.0
/// gives an EAR of 0.3 and 3.0 gives 0.1.
pub fn landmarks(eye_opening: f32, offset_x: f32) -> Landmarks {
    let mut points = vec![Point::new(0.0, 0.0); LANDMARK_COUNT];
    let half = eye_opening / 2.0;
    for (start, x0) in [(36usize, 100.0f32), (42, 170.0)] {
        let eye = [
            Point::new(x0, 100.0),
            Point::new(x0 + 10.0, 100.0 - half),
            Point::new(x0 + 20.0, 100.0 - half),
            Point::new(x0 + 30.0, 100.0),
            Point::new(x0 + 20.0, 100.0 + half),
            Point::new(x0 + 10.0, 100.0 + half),
        ];
        points[start..start + 6].copy_from_slice(&eye);
    }
    points[30] = Point::new(150.0, 140.0);
    Landmarks::try_from(points)
        .expect("68 points")
        .translated(offset_x, 0.0)
}

pub fn open_eyes() -> Landmarks {
    landmarks(9.0, 0.0)
}

pub fn closed_eyes() -> Landmarks {
    landmarks(3.0, 0.0)
}

/// Face centred in a 640x480 frame, wide enough for every flow.
pub fn centred_face(descriptor: Vec<f32>, landmarks: Landmarks) -> DetectedFace {
    DetectedFace {
        bounding_box: BoundingBox {
            x: 220.0,
            y: 140.0,
            width: 200.0,
            height: 200.0,
        },
        landmarks,
        descriptor,
    }
}

/// Face well outside the centre guide.
pub fn corner_face(descriptor: Vec<f32>) -> DetectedFace {
    DetectedFace {
        bounding_box: BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 200.0,
            height: 200.0,
        },
        landmarks: open_eyes(),
        descriptor,
    }
}

pub fn frame(faces: Vec<DetectedFace>) -> FrameInput {
    FrameInput {
        width: FRAME_WIDTH,
        height: FRAME_HEIGHT,
        faces,
    }
}
