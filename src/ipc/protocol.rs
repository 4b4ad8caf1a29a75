//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::broadcast::Snapshot;
use crate::events::EngineEvent;
use crate::geometry::{CableLengths, Envelope, Pose};
use crate::presets::Preset;
use crate::state::Mode;
use crate::tracking::{RawDetection, TrackingStats};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from operator surfaces, observers and the detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current engine status
    GetStatus,

    /// Switch operating mode; unknown names are rejected
    SetMode { mode: String },

    /// Manual target, clamped into the envelope
    SetPosition { x: f64, y: f64, z: f64 },

    /// Jump to a named preset
    ApplyPreset { name: String },

    ListPresets,

    /// Positional envelope
    GetLimits,

    /// One frame of detector output
    SubmitDetections { detections: Vec<RawDetection> },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to snapshots and events
    Subscribe,

    Unsubscribe,
}

/// Responses from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current engine status
    Status(EngineStatus),

    /// Mode request applied
    ModeChange { mode: Mode, previous: Mode },

    /// Manual target accepted (after clamping)
    Position { pose: Pose },

    PresetApplied { name: String, pose: Pose },

    Presets { presets: Vec<Preset> },

    Limits { envelope: Envelope },

    /// Whether the frame made it into the detection inbox
    DetectionsAccepted { accepted: bool },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    Unsubscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl std::fmt::Display) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Push notification for subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Snapshot { snapshot: Snapshot },
    Event { event: EngineEvent },
}

/// Full engine status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Daemon version
    pub version: String,

    pub mode: Mode,

    pub pose: Pose,

    pub target: Pose,

    pub tick: u64,

    /// Confirmed subjects currently tracked
    pub subjects: usize,

    pub speaking_subject: Option<u64>,

    /// Poses pushed to the actuator
    pub movements: u64,

    pub cable_lengths: CableLengths,

    /// Frames processed, malformed detections, subjects acquired
    pub tracking: TrackingStats,

    /// Control ticks discarded after a fault
    pub faults: u64,

    pub subscribers: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}
