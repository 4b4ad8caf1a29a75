//! Per-mode target resolution
//!
//! Missing data never fails: with nobody in view the automatic modes
//! hold the previous target, and with nobody speaking Speaker falls back
//! to the most confident subject.

use tracing::trace;

use crate::config::{FramingConfig, TrackingConfig};
use crate::geometry::{Envelope, Pose};
use crate::state::Mode;
use crate::tracking::TrackedSubject;

#[derive(Debug, Clone)]
pub struct TargetResolver {
    framing: FramingConfig,
    frame_width: f64,
    envelope: Envelope,
}

impl TargetResolver {
    pub fn new(framing: FramingConfig, tracking: &TrackingConfig, envelope: Envelope) -> Self {
        Self {
            framing,
            frame_width: tracking.frame_width,
            envelope,
        }
    }

    /// Desired pose for this tick, always inside the envelope
    ///
    /// `held` is the previous tick's target; `manual_target` is the
    /// standing operator target while in Manual.
    pub fn resolve(
        &self,
        mode: Mode,
        manual_target: Option<Pose>,
        subjects: &[TrackedSubject],
        current: Pose,
        held: Pose,
    ) -> Pose {
        let resolved = match mode {
            Mode::Manual => manual_target.unwrap_or(current),
            Mode::Wide => self.framing.wide_pose,
            Mode::Speaker => match select_speaker(subjects) {
                Some(subject) => {
                    trace!(id = subject.id, speaking = subject.is_speaking, "speaker selected");
                    self.retarget(self.speaker_pose(subject), held)
                }
                None => held,
            },
            Mode::Group => match self.group_pose(subjects) {
                Some(pose) => self.retarget(pose, held),
                None => held,
            },
        };

        self.envelope.clamp(resolved)
    }

    fn speaker_pose(&self, subject: &TrackedSubject) -> Pose {
        Pose::new(
            self.horizontal(subject.center.x),
            self.framing.head_height,
            self.framing.close_depth,
        )
    }

    /// Centroid framing; depth pulls back as the group spreads out
    fn group_pose(&self, subjects: &[TrackedSubject]) -> Option<Pose> {
        if subjects.is_empty() {
            return None;
        }

        let count = subjects.len() as f64;
        let centroid = subjects.iter().map(|s| s.center.x).sum::<f64>() / count;

        let (left, right) = subjects.iter().fold((f64::MAX, f64::MIN), |(lo, hi), s| {
            (lo.min(s.center.x), hi.max(s.center.x))
        });
        let spread = ((right - left) / self.frame_width).clamp(0.0, 1.0);

        let near = self.framing.group_near_depth;
        let far = self.framing.group_far_depth;
        let depth = near + (far - near) * spread;

        Some(Pose::new(self.horizontal(centroid), self.framing.head_height, depth))
    }

    /// Maps a pixel column to studio x
    fn horizontal(&self, cx: f64) -> f64 {
        (cx / self.frame_width - 0.5) * self.framing.frame_span
    }

    /// Keep the held target unless the candidate moved far enough
    fn retarget(&self, candidate: Pose, held: Pose) -> Pose {
        if candidate.max_axis_delta(&held) > self.framing.retarget_threshold {
            candidate
        } else {
            held
        }
    }
}

/// Speaking subjects first, then confidence, then the oldest track
fn select_speaker(subjects: &[TrackedSubject]) -> Option<&TrackedSubject> {
    most_confident(subjects.iter().filter(|s| s.is_speaking))
        .or_else(|| most_confident(subjects.iter()))
}

fn most_confident<'a>(
    candidates: impl Iterator<Item = &'a TrackedSubject>,
) -> Option<&'a TrackedSubject> {
    candidates.fold(None, |best: Option<&'a TrackedSubject>, subject| match best {
        Some(current)
            if current.confidence > subject.confidence
                || (current.confidence == subject.confidence && current.id < subject.id) =>
        {
            Some(current)
        }
        _ => Some(subject),
    })
}
