//! Control state and mode management
//!
//! Provides the mode state machine with four modes:
//! - Manual: operator-commanded target, the initial mode
//! - Speaker: follows the active speaker
//! - Group: frames everyone in view
//! - Wide: fixed wide shot
//!
//! and `ControlState`, the single value the control loop owns and
//! replaces once per tick.

mod control;
mod machine;

pub use control::ControlState;
pub use machine::{Mode, ModeChange, ModeMachine, ModeParseError};
