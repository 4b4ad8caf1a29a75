//! Operating mode state machine
//!
//! Every transition between Manual, Speaker, Group and Wide is legal.
//! What differs is the entry behavior: entering Manual freezes the
//! target where the camera currently is, entering an automatic mode
//! drops the manual target so the resolver takes over on the next tick.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::geometry::Pose;

/// The four operating modes of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Operator drives the camera; target is the last commanded pose
    Manual,
    /// Follow the person who is talking
    Speaker,
    /// Frame everyone in view
    Group,
    /// Fixed wide shot
    Wide,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Manual
    }
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Manual, Mode::Speaker, Mode::Group, Mode::Wide];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Manual => "manual",
            Mode::Speaker => "speaker",
            Mode::Group => "group",
            Mode::Wide => "wide",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode {0:?}, expected one of manual, speaker, group, wide")]
pub struct ModeParseError(pub String);

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModeParseError(s.to_string()))
    }
}

/// Outcome of a mode request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeChange {
    pub from: Mode,
    pub to: Mode,
}

impl ModeChange {
    pub fn is_transition(&self) -> bool {
        self.from != self.to
    }
}

/// Current mode plus the standing manual target
#[derive(Debug, Clone, PartialEq)]
pub struct ModeMachine {
    mode: Mode,
    /// Only set while in Manual
    manual_target: Option<Pose>,
    /// Tick at which the current mode was entered
    entered_at: u64,
}

impl ModeMachine {
    /// Start in Manual, holding `home`
    pub fn new(home: Pose) -> Self {
        Self {
            mode: Mode::Manual,
            manual_target: Some(home),
            entered_at: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn manual_target(&self) -> Option<Pose> {
        self.manual_target
    }

    /// Request a mode; re-requesting the active mode changes nothing
    pub fn set_mode(&mut self, requested: Mode, actual: Pose, tick: u64) -> ModeChange {
        let change = ModeChange {
            from: self.mode,
            to: requested,
        };

        if !change.is_transition() {
            debug!(mode = %requested, "mode already active");
            return change;
        }

        self.transition_to(requested, tick);
        self.manual_target = match requested {
            Mode::Manual => Some(actual),
            Mode::Speaker | Mode::Group | Mode::Wide => None,
        };

        change
    }

    /// Operator position command: forces Manual with `pose` as target
    pub fn command_pose(&mut self, pose: Pose, tick: u64) -> ModeChange {
        let change = ModeChange {
            from: self.mode,
            to: Mode::Manual,
        };
        if change.is_transition() {
            self.transition_to(Mode::Manual, tick);
        }
        self.manual_target = Some(pose);
        change
    }

    fn transition_to(&mut self, new_mode: Mode, tick: u64) {
        info!(
            from = %self.mode,
            to = %new_mode,
            ticks_in_mode = tick.saturating_sub(self.entered_at),
            "mode transition"
        );
        self.mode = new_mode;
        self.entered_at = tick;
    }
}
