//! Studio geometry: camera poses, the mechanical envelope and the
//! four-cable rig model.

mod pose;
mod rig;

pub use pose::{Axis, AxisRange, Envelope, Pose};
pub use rig::{CableLengths, Rig};
