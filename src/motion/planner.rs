//! Velocity and acceleration capped motion planning
//!
//! Each axis is planned on its own. The step taken in one tick is the
//! smallest of:
//! - the remaining distance (never overshoot)
//! - `max_velocity * dt` (top speed)
//! - the previous step plus `max_acceleration * dt²` (gentle starts)
//! - `sqrt(2 * max_acceleration * d) * dt` (brake into the target)
//!
//! Large target jumps, e.g. a Wide to Speaker switch, are absorbed here.

use tracing::trace;

use crate::config::MotionConfig;
use crate::geometry::{Axis, Envelope, Pose};

/// Below this the axis is considered on target
const SETTLE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct MotionPlanner {
    max_velocity: f64,
    max_acceleration: f64,
    envelope: Envelope,
}

impl MotionPlanner {
    pub fn new(motion: &MotionConfig, envelope: Envelope) -> Self {
        Self {
            max_velocity: motion.max_velocity,
            max_acceleration: motion.max_acceleration,
            envelope,
        }
    }

    /// Advance `actual` toward `target` by one tick of `dt` seconds
    ///
    /// `last_step` holds the signed per-axis displacement of the previous
    /// tick and is updated in place.
    pub fn advance(&self, target: Pose, actual: Pose, dt: f64, last_step: &mut [f64; 3]) -> Pose {
        if !(dt > 0.0 && dt.is_finite()) {
            *last_step = [0.0; 3];
            return self.envelope.clamp(actual);
        }

        let target = self.envelope.clamp(target);
        let actual = self.envelope.clamp(actual);
        let mut next = actual;

        for axis in Axis::ALL {
            let i = axis.index();
            let delta = target.get(axis) - actual.get(axis);
            let distance = delta.abs();

            if distance <= SETTLE_EPSILON {
                next.set(axis, target.get(axis));
                last_step[i] = 0.0;
                continue;
            }

            let direction = delta.signum();
            // a reversal starts again from rest
            let carried = (last_step[i] * direction).max(0.0);

            let step = distance
                .min(self.max_velocity * dt)
                .min(carried + self.max_acceleration * dt * dt)
                .min((2.0 * self.max_acceleration * distance).sqrt() * dt);

            if step >= distance {
                next.set(axis, target.get(axis));
            } else {
                next.set(axis, actual.get(axis) + direction * step);
            }
            last_step[i] = direction * step;
        }

        let next = self.envelope.clamp(next);
        trace!(%target, %next, "motion step");
        next
    }
}
