//! Four-cable rig model
//!
//! The camera hangs from four winches anchored at the ceiling corners
//! of the envelope. The actuator collaborator drives cable lengths, so
//! every pose pushed to it carries the matching lengths.

use serde::{Deserialize, Serialize};

use super::pose::{Envelope, Pose};

/// Cable lengths in meters, ordered back-left, back-right, front-right,
/// front-left
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CableLengths(pub [f64; 4]);

impl CableLengths {
    pub fn longest(&self) -> f64 {
        self.0.iter().copied().fold(0.0, f64::max)
    }
}

/// Anchor layout derived from the envelope
#[derive(Debug, Clone)]
pub struct Rig {
    anchors: [Pose; 4],
}

impl Rig {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let top = envelope.y.max;
        Self {
            anchors: [
                Pose::new(envelope.x.min, top, envelope.z.min),
                Pose::new(envelope.x.max, top, envelope.z.min),
                Pose::new(envelope.x.max, top, envelope.z.max),
                Pose::new(envelope.x.min, top, envelope.z.max),
            ],
        }
    }

    pub fn anchors(&self) -> &[Pose; 4] {
        &self.anchors
    }

    pub fn cable_lengths(&self, pose: &Pose) -> CableLengths {
        CableLengths(self.anchors.map(|anchor| anchor.distance(pose)))
    }
}
