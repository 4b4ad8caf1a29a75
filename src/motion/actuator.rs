//! Link to the motor/winch driver
//!
//! The physical link is slow, so a pose is only pushed once the camera
//! has moved more than `epsilon` since the last push. The driver reads
//! the latest command from a `watch` channel.

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::geometry::{CableLengths, Pose, Rig};

/// What the winch driver consumes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorCommand {
    pub sequence: u64,
    pub pose: Pose,
    pub cables: CableLengths,
}

pub struct ActuatorLink {
    epsilon: f64,
    rig: Rig,
    last_sent: Option<Pose>,
    sequence: u64,
    tx: watch::Sender<Option<ActuatorCommand>>,
}

impl ActuatorLink {
    pub fn new(epsilon: f64, rig: Rig) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            epsilon,
            rig,
            last_sent: None,
            sequence: 0,
            tx,
        }
    }

    /// Receiver for the driver side
    pub fn subscribe(&self) -> watch::Receiver<Option<ActuatorCommand>> {
        self.tx.subscribe()
    }

    /// Push `pose` if it moved far enough; returns whether it was sent
    pub fn push(&mut self, pose: Pose) -> bool {
        if let Some(last) = self.last_sent {
            if last.distance(&pose) <= self.epsilon {
                return false;
            }
        }

        self.sequence += 1;
        let command = ActuatorCommand {
            sequence: self.sequence,
            pose,
            cables: self.rig.cable_lengths(&pose),
        };
        debug!(sequence = command.sequence, %pose, "actuator command");

        self.tx.send_replace(Some(command));
        self.last_sent = Some(pose);
        true
    }

    pub fn last_sent(&self) -> Option<Pose> {
        self.last_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Envelope;

    fn link() -> ActuatorLink {
        ActuatorLink::new(0.01, Rig::from_envelope(&Envelope::default()))
    }

    #[test]
    fn test_first_pose_is_always_sent() {
        let mut link = link();
        let rx = link.subscribe();
        assert!(link.push(Pose::new(0.0, 2.5, 0.0)));

        let command = rx.borrow().clone().unwrap();
        assert_eq!(command.sequence, 1);
        assert_eq!(command.pose, Pose::new(0.0, 2.5, 0.0));
    }

    #[test]
    fn test_small_moves_are_suppressed() {
        let mut link = link();
        assert!(link.push(Pose::new(0.0, 2.5, 0.0)));
        assert!(!link.push(Pose::new(0.005, 2.5, 0.0)));
        assert!(!link.push(Pose::new(0.009, 2.5, 0.0)));
        assert!(link.push(Pose::new(0.02, 2.5, 0.0)));
        assert_eq!(link.last_sent(), Some(Pose::new(0.02, 2.5, 0.0)));
    }

    #[test]
    fn test_slow_drift_accumulates() {
        let mut link = link();
        link.push(Pose::new(0.0, 2.5, 0.0));

        let mut sent = 0;
        for i in 1..=10 {
            if link.push(Pose::new(i as f64 * 0.004, 2.5, 0.0)) {
                sent += 1;
            }
        }
        // pushes at 0.012, 0.024, 0.036
        assert_eq!(sent, 3);
    }
}
