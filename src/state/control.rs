//! Per-engine control state

use crate::geometry::Pose;

use super::machine::{Mode, ModeMachine};

/// Everything the control loop carries from one tick to the next
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub machine: ModeMachine,
    /// Actual camera pose
    pub pose: Pose,
    /// Pose the planner is steering toward
    pub target: Pose,
    /// Signed per-axis displacement of the previous tick, `[x, y, z]`
    pub last_step: [f64; 3],
    /// Completed ticks
    pub tick: u64,
    /// Poses pushed to the actuator
    pub movements: u64,
}

impl ControlState {
    pub fn new(home: Pose) -> Self {
        Self {
            machine: ModeMachine::new(home),
            pose: home,
            target: home,
            last_step: [0.0; 3],
            tick: 0,
            movements: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.machine.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_home_in_manual() {
        let home = Pose::new(0.0, 2.5, 0.0);
        let state = ControlState::new(home);
        assert_eq!(state.mode(), Mode::Manual);
        assert_eq!(state.pose, home);
        assert_eq!(state.target, home);
        assert_eq!(state.tick, 0);
    }
}
