use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in the 68-point facial landmark layout.
pub const LANDMARK_COUNT: usize = 68;

// Index ranges and points of the 68-point layout.
const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;
const NOSE_TIP: usize = 30;

/// A 2-D point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned face bounding box, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("expected {LANDMARK_COUNT} landmark points, got {0}")]
pub struct LandmarkCountError(pub usize);

/// The 68 facial landmark points of one detected face.
///
/// Eye points follow the conventional 6-point ordering: outer corner, two
/// upper-lid points, inner corner, two lower-lid points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Landmarks {
    points: Vec<Point>,
}

impl Landmarks {
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn left_eye(&self) -> [Point; 6] {
        eye_points(&self.points[LEFT_EYE])
    }

    pub fn right_eye(&self) -> [Point; 6] {
        eye_points(&self.points[RIGHT_EYE])
    }

    pub fn nose_tip(&self) -> Point {
        self.points[NOSE_TIP]
    }

    pub fn left_eye_outer(&self) -> Point {
        self.points[LEFT_EYE.start]
    }

    pub fn right_eye_outer(&self) -> Point {
        self.points[RIGHT_EYE.start + 3]
    }

    /// Copy of these landmarks with every point shifted by `(dx, dy)`.
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| Point::new(p.x + dx, p.y + dy))
                .collect(),
        }
    }
}

fn eye_points(slice: &[Point]) -> [Point; 6] {
    let mut eye = [Point::default(); 6];
    eye.copy_from_slice(slice);
    eye
}

impl TryFrom<Vec<Point>> for Landmarks {
    type Error = LandmarkCountError;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        if points.len() != LANDMARK_COUNT {
            return Err(LandmarkCountError(points.len()));
        }
        Ok(Self { points })
    }
}

impl From<Landmarks> for Vec<Point> {
    fn from(landmarks: Landmarks) -> Self {
        landmarks.points
    }
}

/// One face produced by the external detector for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    pub landmarks: Landmarks,
    pub descriptor: Vec<f32>,
}

/// A labelled reference descriptor loaded from the identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceIdentity {
    pub label: String,
    pub descriptor: Vec<f32>,
}

impl ReferenceIdentity {
    pub fn new(label: impl Into<String>, descriptor: Vec<f32>) -> Self {
        Self {
            label: label.into(),
            descriptor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_landmarks() -> Landmarks {
        let points = (0..LANDMARK_COUNT)
            .map(|i| Point::new(i as f32, 0.0))
            .collect::<Vec<_>>();
        Landmarks::try_from(points).unwrap()
    }

    #[test]
    fn test_landmark_count_enforced() {
        let err = Landmarks::try_from(vec![Point::default(); 5]).unwrap_err();
        assert_eq!(err, LandmarkCountError(5));
    }

    #[test]
    fn test_named_points() {
        let lm = numbered_landmarks();
        assert_eq!(lm.left_eye()[0].x, 36.0);
        assert_eq!(lm.right_eye()[5].x, 47.0);
        assert_eq!(lm.nose_tip().x, 30.0);
        assert_eq!(lm.left_eye_outer().x, 36.0);
        assert_eq!(lm.right_eye_outer().x, 45.0);
    }

    #[test]
    fn test_landmarks_deserialize_rejects_short_list() {
        let json = r#"[{"x":1.0,"y":2.0}]"#;
        assert!(serde_json::from_str::<Landmarks>(json).is_err());
    }

    #[test]
    fn test_box_center() {
        let b = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 50.0,
        };
        assert_eq!(b.center(), Point::new(60.0, 45.0));
    }
}
