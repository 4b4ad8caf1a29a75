//! Discrete engine events
//!
//! Snapshots carry continuous state; events mark the moments something
//! changed, for logs and for subscribed IPC clients.

use serde::{Deserialize, Serialize};

use crate::geometry::Pose;
use crate::state::Mode;
use crate::tracking::SubjectId;

/// Events emitted by the control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Operating mode changed
    ModeChanged { from: Mode, to: Mode },

    /// Operator set a manual target
    PositionCommanded { pose: Pose },

    /// Operator applied a preset
    PresetApplied { name: String, pose: Pose },

    /// A new person entered tracking
    SubjectAcquired { id: SubjectId },

    /// A person was evicted after the grace period
    SubjectLost { id: SubjectId },
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::ModeChanged { from, to } => write!(f, "MODE_CHANGED ({from} -> {to})"),
            EngineEvent::PositionCommanded { pose } => write!(f, "POSITION_COMMANDED {pose}"),
            EngineEvent::PresetApplied { name, pose } => {
                write!(f, "PRESET_APPLIED {name:?} {pose}")
            }
            EngineEvent::SubjectAcquired { id } => write!(f, "SUBJECT_ACQUIRED #{id}"),
            EngineEvent::SubjectLost { id } => write!(f, "SUBJECT_LOST #{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::ModeChanged {
            from: Mode::Manual,
            to: Mode::Speaker,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("mode_changed"));
        assert!(json.contains("speaker"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"subject_lost","id":4}"#;
        let event: EngineEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, EngineEvent::SubjectLost { id: 4 });
    }

    #[test]
    fn test_event_display() {
        let event = EngineEvent::SubjectAcquired { id: 9 };
        assert_eq!(event.to_string(), "SUBJECT_ACQUIRED #9");
    }
}
