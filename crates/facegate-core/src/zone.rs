//! Geometric admission: is the face centred in the guide and close enough?

use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneShape {
    Rect,
    Ellipse,
}

/// On-screen guide centred on the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdmissionZone {
    pub shape: ZoneShape,
    pub width: f32,
    pub height: f32,
}

impl AdmissionZone {
    /// Whether `point` lies inside the zone (boundary inclusive) for a frame
    /// of the given size.
    pub fn contains(&self, point: Point, frame_width: u32, frame_height: u32) -> bool {
        let cx = frame_width as f32 / 2.0;
        let cy = frame_height as f32 / 2.0;
        let half_w = self.width / 2.0;
        let half_h = self.height / 2.0;
        let dx = point.x - cx;
        let dy = point.y - cy;

        match self.shape {
            ZoneShape::Rect => dx.abs() <= half_w && dy.abs() <= half_h,
            ZoneShape::Ellipse => {
                if half_w <= 0.0 || half_h <= 0.0 {
                    return false;
                }
                (dx / half_w).powi(2) + (dy / half_h).powi(2) <= 1.0
            }
        }
    }
}

/// Minimum face width, a proxy for distance from the camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinFaceWidth {
    Pixels(f32),
    /// Fraction of the frame width.
    FrameFraction(f32),
}

impl MinFaceWidth {
    pub fn resolve(&self, frame_width: u32) -> f32 {
        match *self {
            Self::Pixels(px) => px,
            Self::FrameFraction(f) => frame_width as f32 * f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub zone: AdmissionZone,
    pub min_face_width: MinFaceWidth,
}

impl AdmissionConfig {
    /// 300 px square guide, faces at least 180 px wide.
    pub fn check_in() -> Self {
        Self {
            zone: AdmissionZone {
                shape: ZoneShape::Rect,
                width: 300.0,
                height: 300.0,
            },
            min_face_width: MinFaceWidth::Pixels(180.0),
        }
    }

    /// Same guide as check-in; a single user sits close to their own camera.
    pub fn login() -> Self {
        Self::check_in()
    }

    /// 220×300 oval, faces at least 22% of the frame wide.
    pub fn enroll() -> Self {
        Self {
            zone: AdmissionZone {
                shape: ZoneShape::Ellipse,
                width: 220.0,
                height: 300.0,
            },
            min_face_width: MinFaceWidth::FrameFraction(0.22),
        }
    }

    /// Out-of-zone is reported before too-far.
    pub fn assess(&self, face: &BoundingBox, frame_width: u32, frame_height: u32) -> Placement {
        if !self.zone.contains(face.center(), frame_width, frame_height) {
            Placement::OutOfZone
        } else if face.width < self.min_face_width.resolve(frame_width) {
            Placement::TooFar
        } else {
            Placement::Admitted
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Admitted,
    OutOfZone,
    TooFar,
}

impl Placement {
    pub fn is_admitted(self) -> bool {
        self == Self::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(cx: f32, cy: f32, width: f32) -> BoundingBox {
        BoundingBox {
            x: cx - width / 2.0,
            y: cy - width / 2.0,
            width,
            height: width,
        }
    }

    #[test]
    fn test_centred_face_admitted() {
        let cfg = AdmissionConfig::check_in();
        assert_eq!(cfg.assess(&face(320.0, 240.0, 200.0), 640, 480), Placement::Admitted);
    }

    #[test]
    fn test_off_centre_face_out_of_zone() {
        let cfg = AdmissionConfig::check_in();
        assert_eq!(cfg.assess(&face(520.0, 240.0, 200.0), 640, 480), Placement::OutOfZone);
    }

    #[test]
    fn test_small_face_too_far() {
        let cfg = AdmissionConfig::check_in();
        assert_eq!(cfg.assess(&face(320.0, 240.0, 120.0), 640, 480), Placement::TooFar);
    }

    #[test]
    fn test_out_of_zone_reported_before_too_far() {
        let cfg = AdmissionConfig::check_in();
        assert_eq!(cfg.assess(&face(20.0, 20.0, 50.0), 640, 480), Placement::OutOfZone);
    }

    #[test]
    fn test_ellipse_corner_excluded() {
        let zone = AdmissionConfig::enroll().zone;
        // Inside the 220x300 bounding rect but outside the oval.
        assert!(!zone.contains(Point::new(320.0 + 100.0, 240.0 + 140.0), 640, 480));
        assert!(zone.contains(Point::new(320.0, 240.0 + 150.0), 640, 480));
    }

    #[test]
    fn test_fractional_min_width() {
        let cfg = AdmissionConfig::enroll();
        // 22% of 640 = 140.8
        assert_eq!(cfg.assess(&face(320.0, 240.0, 140.0), 640, 480), Placement::TooFar);
        assert_eq!(cfg.assess(&face(320.0, 240.0, 141.0), 640, 480), Placement::Admitted);
    }
}
