//! Camera pose and positional envelope
//!
//! Coordinates are studio meters: x is left-right, y is height above the
//! floor, z is front-back.

use serde::{Deserialize, Serialize};

/// One of the three translation axes of the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Position of the axis in `[x, y, z]` arrays
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

/// Camera position in studio coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }

    /// Euclidean distance to another pose
    pub fn distance(&self, other: &Pose) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Largest single-axis difference to another pose
    pub fn max_axis_delta(&self, other: &Pose) -> f64 {
        Axis::ALL
            .iter()
            .map(|&axis| (self.get(axis) - other.get(axis)).abs())
            .fold(0.0, f64::max)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Allowed interval on one axis, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// NaN collapses to the lower bound so a bad value can never escape.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min < self.max
    }
}

/// Hard mechanical bounds of the rig
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub x: AxisRange,
    pub y: AxisRange,
    pub z: AxisRange,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            x: AxisRange::new(-5.0, 5.0),
            y: AxisRange::new(1.0, 4.0),
            z: AxisRange::new(-5.0, 5.0),
        }
    }
}

impl Envelope {
    pub fn range(&self, axis: Axis) -> &AxisRange {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    pub fn clamp(&self, pose: Pose) -> Pose {
        Pose {
            x: self.x.clamp(pose.x),
            y: self.y.clamp(pose.y),
            z: self.z.clamp(pose.z),
        }
    }

    pub fn contains(&self, pose: &Pose) -> bool {
        Axis::ALL
            .iter()
            .all(|&axis| self.range(axis).contains(pose.get(axis)))
    }

    /// First axis whose range is empty or not finite
    pub fn invalid_axis(&self) -> Option<Axis> {
        Axis::ALL
            .iter()
            .copied()
            .find(|&axis| !self.range(axis).is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_is_idempotent() {
        let envelope = Envelope::default();
        let samples = [
            Pose::new(12.0, -3.0, 0.5),
            Pose::new(-7.5, 9.0, -11.0),
            Pose::new(0.0, 2.5, 0.0),
            Pose::new(f64::NAN, f64::INFINITY, f64::NEG_INFINITY),
        ];

        for pose in samples {
            let once = envelope.clamp(pose);
            assert!(envelope.contains(&once), "{once} escaped the envelope");
            assert_eq!(envelope.clamp(once), once);
        }
    }

    #[test]
    fn test_clamp_keeps_inside_values() {
        let envelope = Envelope::default();
        let pose = Pose::new(1.25, 3.5, -4.0);
        assert_eq!(envelope.clamp(pose), pose);
    }

    #[test]
    fn test_invalid_axis_detection() {
        let mut envelope = Envelope::default();
        assert_eq!(envelope.invalid_axis(), None);

        envelope.y = AxisRange::new(4.0, 1.0);
        assert_eq!(envelope.invalid_axis(), Some(Axis::Y));
    }

    #[test]
    fn test_max_axis_delta() {
        let a = Pose::new(0.0, 2.0, 0.0);
        let b = Pose::new(0.5, 1.0, -0.25);
        assert!((a.max_axis_delta(&b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pose_serialization() {
        let json = serde_json::to_string(&Pose::new(0.0, 3.0, -4.0)).unwrap();
        assert_eq!(json, r#"{"x":0.0,"y":3.0,"z":-4.0}"#);
    }
}
