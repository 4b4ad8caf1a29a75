//! Immutable per-tick state published to observers

use serde::{Deserialize, Serialize};

use crate::geometry::Pose;
use crate::state::Mode;
use crate::tracking::{TrackedSubject, TrackingStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub mode: Mode,
    /// Actual camera pose
    pub pose: Pose,
    pub target: Pose,
    /// Confirmed subjects only
    pub subjects: Vec<TrackedSubject>,
    /// Poses pushed to the actuator so far
    pub movements: u64,
    pub tracking: TrackingStats,
    /// Ticks discarded after a fault
    pub faults: u64,
}

impl Snapshot {
    /// Id of the subject currently flagged as speaking, if any
    pub fn speaking_subject(&self) -> Option<u64> {
        self.subjects
            .iter()
            .filter(|s| s.is_speaking)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence).then(b.id.cmp(&a.id)))
            .map(|s| s.id)
    }
}
