//! Operator commands and the handle used to reach a running engine
//!
//! Commands go through a bounded inbox and are applied at the start of
//! the next tick, never in the middle of one. The caller gets the
//! outcome back over a oneshot channel once that tick has committed.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use crate::broadcast::{Snapshot, StateBroadcaster, Subscription};
use crate::events::EngineEvent;
use crate::geometry::{Envelope, Pose};
use crate::presets::{Preset, PresetError, PresetStore};
use crate::state::{Mode, ModeChange};
use crate::tracking::RawDetection;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMode(Mode),
    /// Already clamped into the envelope
    SetPosition(Pose),
    ApplyPreset(String),
}

/// State right after a command was applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub mode: ModeChange,
    /// Standing target; in the automatic modes this is the held target
    /// until the resolver runs later in the same tick
    pub target: Pose,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    UnknownPreset(#[from] PresetError),

    #[error("command inbox is full")]
    Busy,

    #[error("engine is not running")]
    EngineStopped,

    #[error("command was dropped by a faulted tick")]
    Aborted,
}

pub type CommandResult = Result<CommandOutcome, CommandError>;

pub(crate) struct CommandRequest {
    pub command: Command,
    pub reply: oneshot::Sender<CommandResult>,
}

/// Cloneable access to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) commands: mpsc::Sender<CommandRequest>,
    pub(crate) detections: mpsc::Sender<Vec<RawDetection>>,
    pub(crate) broadcaster: Arc<StateBroadcaster>,
    pub(crate) presets: Arc<PresetStore>,
    pub(crate) events: broadcast::Sender<EngineEvent>,
    pub(crate) envelope: Envelope,
}

impl EngineHandle {
    /// Queue a command without waiting; the receiver resolves after the
    /// tick that applies it
    pub fn submit(&self, command: Command) -> Result<oneshot::Receiver<CommandResult>, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .try_send(CommandRequest { command, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => CommandError::Busy,
                mpsc::error::TrySendError::Closed(_) => CommandError::EngineStopped,
            })?;
        Ok(rx)
    }

    /// Queue a command and wait for its outcome
    pub async fn execute(&self, command: Command) -> CommandResult {
        let rx = self.submit(command)?;
        rx.await.unwrap_or(Err(CommandError::Aborted))
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<ModeChange, CommandError> {
        Ok(self.execute(Command::SetMode(mode)).await?.mode)
    }

    /// Out-of-envelope positions are clamped; the clamped pose is returned
    pub async fn set_position(&self, x: f64, y: f64, z: f64) -> Result<Pose, CommandError> {
        let pose = self.envelope.clamp(Pose::new(x, y, z));
        Ok(self.execute(Command::SetPosition(pose)).await?.target)
    }

    pub async fn apply_preset(&self, name: &str) -> Result<Pose, CommandError> {
        // unknown names fail here without a round trip
        self.presets.apply(name)?;
        Ok(self.execute(Command::ApplyPreset(name.to_string())).await?.target)
    }

    /// Hand one detector frame to the engine; a full inbox drops it
    pub fn submit_detections(&self, detections: Vec<RawDetection>) -> bool {
        match self.detections.try_send(detections) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("detection inbox full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.broadcaster.unsubscribe(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.broadcaster.latest()
    }

    pub fn presets(&self) -> Vec<Preset> {
        self.presets.list()
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope
    }
}
