//! spidercam-daemon: framing and motion control for a cable-suspended
//! studio camera
//!
//! A fixed-cadence control loop owns the camera state. Detector frames
//! and operator commands reach it through bounded inboxes, and every
//! tick is fanned out to observers as an immutable snapshot.

pub mod broadcast;
pub mod config;
pub mod engine;
pub mod events;
pub mod framing;
pub mod geometry;
pub mod ipc;
pub mod lifecycle;
pub mod motion;
pub mod presets;
pub mod state;
pub mod tracking;
