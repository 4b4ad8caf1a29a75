//! Fused per-person tracking state
//!
//! Written only by the control loop while it drains the detection inbox.
//! Everything else sees subjects through snapshots. A new track stays
//! tentative until it has been matched in `min_hits` frames; only
//! confirmed tracks are reported as subjects.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::TrackingConfig;

use super::detection::{BoundingBox, FaceIdentity, Point, RawDetection};

pub type SubjectId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Seen in fewer than `min_hits` frames
    #[default]
    Tentative,
    Confirmed,
}

/// Cumulative tracking counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingStats {
    /// Detector frames folded in
    pub frames: u64,
    /// Detections dropped as malformed
    pub malformed: u64,
    /// Tracks that reached confirmation
    pub acquired: u64,
}

/// A person followed across frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSubject {
    pub id: SubjectId,
    pub bbox: BoundingBox,
    pub center: Point,
    pub confidence: f64,
    pub is_speaking: bool,
    pub face: Option<FaceIdentity>,
    /// Frames this subject was matched in
    pub hits: u32,
    /// Consecutive frames without a match
    pub missed: u32,
    #[serde(default)]
    pub state: TrackState,
}

impl TrackedSubject {
    fn spawn(id: SubjectId, detection: RawDetection) -> Self {
        Self {
            id,
            bbox: detection.bbox,
            center: detection.bbox.center(),
            confidence: detection.confidence.clamp(0.0, 1.0),
            is_speaking: detection.is_speaking,
            face: detection.face,
            hits: 1,
            missed: 0,
            state: TrackState::Tentative,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    fn absorb(&mut self, detection: RawDetection) {
        self.bbox = detection.bbox;
        self.center = detection.bbox.center();
        self.confidence = detection.confidence.clamp(0.0, 1.0);
        self.is_speaking = detection.is_speaking;
        if detection.face.is_some() {
            self.face = detection.face;
        }
        self.hits = self.hits.saturating_add(1);
        self.missed = 0;
    }

    fn miss(&mut self) {
        self.missed = self.missed.saturating_add(1);
        self.is_speaking = false;
    }
}

/// Result of one `upsert` or `age`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertReport {
    /// Every confirmed subject after the update, ordered by id
    pub subjects: Vec<TrackedSubject>,
    /// Tracks confirmed in this update
    pub acquired: Vec<SubjectId>,
    /// Confirmed subjects dropped in this update
    pub evicted: Vec<SubjectId>,
    /// Detections dropped as malformed in this update
    pub malformed: usize,
}

#[derive(Debug)]
pub struct SubjectRepository {
    /// Tentative and confirmed tracks, ordered by id
    tracks: Vec<TrackedSubject>,
    /// Confirmed tracks as of the last update
    confirmed: Vec<TrackedSubject>,
    next_id: SubjectId,
    radius_px: f64,
    grace_frames: u32,
    min_hits: u32,
    stats: TrackingStats,
}

impl SubjectRepository {
    pub fn new(config: &TrackingConfig) -> Self {
        Self::with_limits(
            config.association_radius_px(),
            config.grace_frames(),
            config.min_hits,
        )
    }

    pub fn with_limits(radius_px: f64, grace_frames: u32, min_hits: u32) -> Self {
        Self {
            tracks: Vec::new(),
            confirmed: Vec::new(),
            next_id: 1,
            radius_px,
            grace_frames,
            min_hits: min_hits.max(1),
            stats: TrackingStats::default(),
        }
    }

    /// Confirmed subjects, ordered by id
    pub fn subjects(&self) -> &[TrackedSubject] {
        &self.confirmed
    }

    /// Any live track, tentative or confirmed
    pub fn get(&self, id: SubjectId) -> Option<&TrackedSubject> {
        self.tracks.iter().find(|s| s.id == id)
    }

    pub fn stats(&self) -> TrackingStats {
        self.stats
    }

    /// Fold one detector frame into the store
    pub fn upsert(&mut self, detections: Vec<RawDetection>) -> UpsertReport {
        let mut report = UpsertReport::default();
        self.stats.frames += 1;

        let detections: Vec<RawDetection> = detections
            .into_iter()
            .filter(|detection| {
                if detection.is_malformed() {
                    report.malformed += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        if report.malformed > 0 {
            self.stats.malformed += report.malformed as u64;
            warn!(
                dropped = report.malformed,
                total = self.stats.malformed,
                "malformed detections dropped"
            );
        }

        let pairs = self.associate(&detections);

        let mut slots: Vec<Option<RawDetection>> = detections.into_iter().map(Some).collect();
        let mut matched = vec![false; self.tracks.len()];

        for (track_idx, detection_idx) in pairs {
            if let Some(detection) = slots[detection_idx].take() {
                self.tracks[track_idx].absorb(detection);
                matched[track_idx] = true;
            }
        }

        for (track, was_matched) in self.tracks.iter_mut().zip(&matched) {
            if !was_matched {
                track.miss();
            }
        }

        for detection in slots.into_iter().flatten() {
            let id = self.next_id;
            self.next_id += 1;
            trace!(id, center_x = detection.bbox.center().x, "tentative track");
            self.tracks.push(TrackedSubject::spawn(id, detection));
        }

        self.settle(report)
    }

    /// Count one detector frame that never arrived
    ///
    /// Tracks age as if the frame were empty; speaking flags are kept.
    pub fn age(&mut self) -> UpsertReport {
        for track in &mut self.tracks {
            track.missed = track.missed.saturating_add(1);
        }
        self.settle(UpsertReport::default())
    }

    /// Promote, evict and refresh the confirmed view
    fn settle(&mut self, mut report: UpsertReport) -> UpsertReport {
        for track in &mut self.tracks {
            if !track.is_confirmed() && track.hits >= self.min_hits {
                track.state = TrackState::Confirmed;
                self.stats.acquired += 1;
                debug!(id = track.id, hits = track.hits, "subject acquired");
                report.acquired.push(track.id);
            }
        }

        let grace = self.grace_frames;
        self.tracks.retain(|track| {
            if track.missed <= grace {
                return true;
            }
            if track.is_confirmed() {
                debug!(id = track.id, missed = track.missed, "subject evicted");
                report.evicted.push(track.id);
            } else {
                trace!(id = track.id, hits = track.hits, "tentative track dropped");
            }
            false
        });

        self.confirmed = self.tracks.iter().filter(|t| t.is_confirmed()).cloned().collect();
        trace!(
            tracks = self.tracks.len(),
            confirmed = self.confirmed.len(),
            "repository updated"
        );
        report.subjects = self.confirmed.clone();
        report
    }

    /// Greedy nearest-center matching: all pairs within the radius,
    /// shortest first, each subject and detection used at most once
    fn associate(&self, detections: &[RawDetection]) -> Vec<(usize, usize)> {
        let mut candidates = Vec::new();
        for (subject_idx, subject) in self.tracks.iter().enumerate() {
            for (detection_idx, detection) in detections.iter().enumerate() {
                let distance = subject.center.distance(&detection.bbox.center());
                if distance <= self.radius_px {
                    candidates.push((distance, subject_idx, detection_idx));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut subject_used = vec![false; self.tracks.len()];
        let mut detection_used = vec![false; detections.len()];
        let mut pairs = Vec::new();

        for (_, subject_idx, detection_idx) in candidates {
            if subject_used[subject_idx] || detection_used[detection_idx] {
                continue;
            }
            subject_used[subject_idx] = true;
            detection_used[detection_idx] = true;
            pairs.push((subject_idx, detection_idx));
        }

        pairs
    }
}
