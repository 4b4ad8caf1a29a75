//! Control engine: owns `ControlState` and runs the tick loop
//!
//! Detections and operator commands reach the engine only through
//! bounded inboxes that are drained at tick boundaries.

mod commands;
mod control_loop;

pub use commands::{Command, CommandError, CommandOutcome, CommandResult, EngineHandle};
pub use control_loop::Engine;
