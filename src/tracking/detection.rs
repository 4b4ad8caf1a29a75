//! Detector output types

use serde::{Deserialize, Serialize};

/// Pixel coordinate in the video frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned box in pixels, `(x1, y1)` top-left and `(x2, y2)`
/// bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Point {
        Point {
            x: (self.x1 + self.x2) / 2.0,
            y: (self.y1 + self.y2) / 2.0,
        }
    }

    /// Negative, inverted, empty or non-finite boxes
    pub fn is_malformed(&self) -> bool {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        coords.iter().any(|c| !c.is_finite() || *c < 0.0)
            || self.x2 <= self.x1
            || self.y2 <= self.y1
    }
}

/// Face recognition match attached to a detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceIdentity {
    pub name: String,
    pub confidence: f64,
}

/// One person found by the detector in one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    #[serde(default)]
    pub face: Option<FaceIdentity>,
    /// Set by the audio-activity collaborator
    #[serde(default)]
    pub is_speaking: bool,
}

impl RawDetection {
    pub fn new(bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            bbox,
            confidence,
            face: None,
            is_speaking: false,
        }
    }

    pub fn speaking(mut self, is_speaking: bool) -> Self {
        self.is_speaking = is_speaking;
        self
    }

    pub fn with_face(mut self, name: impl Into<String>, confidence: f64) -> Self {
        self.face = Some(FaceIdentity {
            name: name.into(),
            confidence,
        });
        self
    }

    pub fn is_malformed(&self) -> bool {
        self.bbox.is_malformed() || self.confidence.is_nan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center() {
        let bbox = BoundingBox::new(100.0, 200.0, 300.0, 600.0);
        assert_eq!(bbox.center(), Point { x: 200.0, y: 400.0 });
    }

    #[test]
    fn test_malformed_boxes() {
        assert!(BoundingBox::new(-1.0, 0.0, 10.0, 10.0).is_malformed());
        assert!(BoundingBox::new(50.0, 0.0, 10.0, 10.0).is_malformed());
        assert!(BoundingBox::new(0.0, 10.0, 10.0, 10.0).is_malformed());
        assert!(BoundingBox::new(0.0, 0.0, f64::NAN, 10.0).is_malformed());
        assert!(!BoundingBox::new(0.0, 0.0, 10.0, 10.0).is_malformed());
    }

    #[test]
    fn test_detection_deserialization_defaults() {
        let json = r#"{"bbox":{"x1":0,"y1":0,"x2":10,"y2":20},"confidence":0.8}"#;
        let detection: RawDetection = serde_json::from_str(json).unwrap();
        assert!(!detection.is_speaking);
        assert!(detection.face.is_none());
    }
}
