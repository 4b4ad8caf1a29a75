//! Motion: bounded steps toward the target and the actuator link

mod actuator;
mod planner;

pub use actuator::{ActuatorCommand, ActuatorLink};
pub use planner::MotionPlanner;
