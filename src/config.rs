//! Configuration loading and validation
//!
//! Settings come from a TOML file named by `SPIDERCAM_CONFIG`. Every
//! field has a default, so a missing file or a partial one is fine.
//! `validate` must pass before the engine is built.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::geometry::{Axis, Envelope, Pose};
use crate::presets::Preset;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SPIDERCAM_CONFIG";

/// Control loop rates the engine accepts
pub const MIN_TICK_HZ: f64 = 10.0;
pub const MAX_TICK_HZ: f64 = 1000.0;

/// Detector frame rates the tracker accepts
pub const MIN_DETECTION_FPS: f64 = 1.0;
pub const MAX_DETECTION_FPS: f64 = 1000.0;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Hard positional limits
    #[serde(default)]
    pub envelope: Envelope,

    /// Pose at engine start
    #[serde(default = "default_home")]
    pub home: Pose,

    #[serde(default)]
    pub motion: MotionConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub framing: FramingConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default = "default_presets")]
    pub presets: Vec<Preset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Top speed per axis (m/s)
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,
    /// Speed-up limit per axis (m/s²)
    #[serde(default = "default_max_acceleration")]
    pub max_acceleration: f64,
    /// Control loop rate
    #[serde(default = "default_tick_hz")]
    pub tick_hz: f64,
    /// Minimum travel before a new pose is pushed to the actuator (m)
    #[serde(default = "default_actuator_epsilon")]
    pub actuator_epsilon: f64,
    /// Pending operator commands
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_frame_width")]
    pub frame_width: f64,
    /// Nominal detector frame rate
    #[serde(default = "default_detection_fps")]
    pub detection_fps: f64,
    /// Association radius as a fraction of frame width
    #[serde(default = "default_association_threshold")]
    pub association_threshold: f64,
    /// How long a subject survives without a matching detection
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: f64,
    /// Matched frames before a track counts as a subject
    #[serde(default = "default_min_hits")]
    pub min_hits: u32,
    /// Pending detection frames
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FramingConfig {
    /// Studio width (m) covered by the full frame width
    #[serde(default = "default_frame_span")]
    pub frame_span: f64,
    #[serde(default = "default_head_height")]
    pub head_height: f64,
    /// Depth for a single-person shot
    #[serde(default = "default_close_depth")]
    pub close_depth: f64,
    /// Depth for a tight group
    #[serde(default = "default_group_near_depth")]
    pub group_near_depth: f64,
    /// Depth for a group spread over the whole frame
    #[serde(default = "default_group_far_depth")]
    pub group_far_depth: f64,
    /// Minimum change before an automatic target is replaced (m)
    #[serde(default = "default_retarget_threshold")]
    pub retarget_threshold: f64,
    #[serde(default = "default_wide_pose")]
    pub wide_pose: Pose,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Publish a snapshot every N ticks
    #[serde(default = "default_every_ticks")]
    pub every_ticks: u64,
    /// Snapshots buffered per subscriber before the oldest is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_socket_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("spidercam")
        .join("engine.sock")
}

fn default_home() -> Pose { Pose::new(0.0, 2.5, 0.0) }
fn default_max_velocity() -> f64 { 1.0 }
fn default_max_acceleration() -> f64 { 2.0 }
fn default_tick_hz() -> f64 { 30.0 }
fn default_actuator_epsilon() -> f64 { 0.01 }
fn default_command_capacity() -> usize { 32 }
fn default_frame_width() -> f64 { 1280.0 }
fn default_detection_fps() -> f64 { 30.0 }
fn default_association_threshold() -> f64 { 0.15 }
fn default_grace_period_secs() -> f64 { 1.0 }
fn default_min_hits() -> u32 { 3 }
fn default_inbox_capacity() -> usize { 8 }
fn default_frame_span() -> f64 { 6.0 }
fn default_head_height() -> f64 { 2.5 }
fn default_close_depth() -> f64 { -2.0 }
fn default_group_near_depth() -> f64 { -2.5 }
fn default_group_far_depth() -> f64 { -5.0 }
fn default_retarget_threshold() -> f64 { 0.1 }
fn default_wide_pose() -> Pose { Pose::new(0.0, 3.0, -4.0) }
fn default_every_ticks() -> u64 { 1 }
fn default_queue_capacity() -> usize { 16 }

fn default_presets() -> Vec<Preset> {
    vec![
        Preset::new("Plan Large", Pose::new(0.0, 3.0, -4.0), "Overview of the whole set"),
        Preset::new("Plan Moyen", Pose::new(0.0, 2.5, -2.5), "Group framing"),
        Preset::new("Gros Plan", Pose::new(0.0, 2.0, -1.5), "Tight shot on one person"),
        Preset::new("Vue du dessus", Pose::new(0.0, 3.8, 0.0), "Overhead view"),
    ]
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            max_velocity: default_max_velocity(),
            max_acceleration: default_max_acceleration(),
            tick_hz: default_tick_hz(),
            actuator_epsilon: default_actuator_epsilon(),
            command_capacity: default_command_capacity(),
        }
    }
}

impl MotionConfig {
    /// Nominal tick period in seconds
    pub fn tick_secs(&self) -> f64 {
        1.0 / self.tick_hz
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            frame_width: default_frame_width(),
            detection_fps: default_detection_fps(),
            association_threshold: default_association_threshold(),
            grace_period_secs: default_grace_period_secs(),
            min_hits: default_min_hits(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl TrackingConfig {
    /// Association radius in pixels
    pub fn association_radius_px(&self) -> f64 {
        self.association_threshold * self.frame_width
    }

    /// Grace period expressed in detector frames
    pub fn grace_frames(&self) -> u32 {
        (self.grace_period_secs * self.detection_fps).round() as u32
    }

    /// Nominal time between detector frames in seconds
    pub fn frame_secs(&self) -> f64 {
        1.0 / self.detection_fps
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            frame_span: default_frame_span(),
            head_height: default_head_height(),
            close_depth: default_close_depth(),
            group_near_depth: default_group_near_depth(),
            group_far_depth: default_group_far_depth(),
            retarget_threshold: default_retarget_threshold(),
            wide_pose: default_wide_pose(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            every_ticks: default_every_ticks(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            envelope: Envelope::default(),
            home: default_home(),
            motion: MotionConfig::default(),
            tracking: TrackingConfig::default(),
            framing: FramingConfig::default(),
            broadcast: BroadcastConfig::default(),
            presets: default_presets(),
        }
    }
}

/// Reasons the daemon refuses to start
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("envelope axis {axis} must have finite bounds with min < max")]
    InvalidEnvelope { axis: Axis },

    #[error("{name} must be a positive finite number, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("{name} must be at least 1")]
    ZeroCapacity { name: &'static str },

    #[error("{name} pose {pose} lies outside the envelope")]
    OutsideEnvelope { name: String, pose: Pose },

    #[error("preset name {0:?} is defined more than once")]
    DuplicatePreset(String),

    #[error("motion.tick_hz must be within [10, 1000], got {0}")]
    TickRate(f64),

    #[error("tracking.detection_fps must be within [1, 1000], got {0}")]
    DetectionRate(f64),

    #[error("association_threshold must be in (0, 1], got {0}")]
    AssociationThreshold(f64),

    #[error("grace_period_secs must be zero or positive, got {0}")]
    GracePeriod(f64),
}

impl Config {
    /// Load configuration from the file named by `SPIDERCAM_CONFIG`,
    /// falling back to defaults
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => {
                info!("{CONFIG_ENV} not set, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(?path, "configuration file not found, using built-in defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Ensure the socket directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Check every invariant the engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(axis) = self.envelope.invalid_axis() {
            return Err(ConfigError::InvalidEnvelope { axis });
        }

        positive("motion.max_velocity", self.motion.max_velocity)?;
        positive("motion.max_acceleration", self.motion.max_acceleration)?;
        positive("tracking.frame_width", self.tracking.frame_width)?;
        positive("framing.frame_span", self.framing.frame_span)?;

        if !(self.motion.actuator_epsilon >= 0.0 && self.motion.actuator_epsilon.is_finite()) {
            return Err(ConfigError::NonPositive {
                name: "motion.actuator_epsilon",
                value: self.motion.actuator_epsilon,
            });
        }
        if !(self.framing.retarget_threshold >= 0.0 && self.framing.retarget_threshold.is_finite()) {
            return Err(ConfigError::NonPositive {
                name: "framing.retarget_threshold",
                value: self.framing.retarget_threshold,
            });
        }

        let tick_hz = self.motion.tick_hz;
        if !(MIN_TICK_HZ..=MAX_TICK_HZ).contains(&tick_hz) {
            return Err(ConfigError::TickRate(tick_hz));
        }
        let fps = self.tracking.detection_fps;
        if !(MIN_DETECTION_FPS..=MAX_DETECTION_FPS).contains(&fps) {
            return Err(ConfigError::DetectionRate(fps));
        }

        let threshold = self.tracking.association_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::AssociationThreshold(threshold));
        }
        let grace = self.tracking.grace_period_secs;
        if !(grace >= 0.0 && grace.is_finite()) {
            return Err(ConfigError::GracePeriod(grace));
        }

        if self.broadcast.every_ticks == 0 {
            return Err(ConfigError::ZeroCapacity { name: "broadcast.every_ticks" });
        }
        if self.broadcast.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity { name: "broadcast.queue_capacity" });
        }
        if self.tracking.inbox_capacity == 0 {
            return Err(ConfigError::ZeroCapacity { name: "tracking.inbox_capacity" });
        }
        if self.tracking.min_hits == 0 {
            return Err(ConfigError::ZeroCapacity { name: "tracking.min_hits" });
        }
        if self.motion.command_capacity == 0 {
            return Err(ConfigError::ZeroCapacity { name: "motion.command_capacity" });
        }

        self.inside_envelope("home", &self.home)?;
        self.inside_envelope("framing.wide_pose", &self.framing.wide_pose)?;

        let mut seen = std::collections::HashSet::new();
        for preset in &self.presets {
            if !seen.insert(preset.name.as_str()) {
                return Err(ConfigError::DuplicatePreset(preset.name.clone()));
            }
            self.inside_envelope(&format!("preset {:?}", preset.name), &preset.pose)?;
        }

        Ok(())
    }

    fn inside_envelope(&self, name: &str, pose: &Pose) -> Result<(), ConfigError> {
        if self.envelope.contains(pose) {
            Ok(())
        } else {
            Err(ConfigError::OutsideEnvelope {
                name: name.to_string(),
                pose: *pose,
            })
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.socket_path.to_string_lossy().contains("spidercam"));
        assert_eq!(config.tracking.grace_frames(), 30);
        assert!((config.tracking.association_radius_px() - 192.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [motion]
            max_velocity = 0.5

            [envelope.y]
            min = 1.5
            max = 3.5
            "#,
        )
        .unwrap();

        assert_eq!(config.motion.max_velocity, 0.5);
        assert_eq!(config.motion.max_acceleration, 2.0);
        assert_eq!(config.envelope.y.min, 1.5);
        assert_eq!(config.envelope.x.max, 5.0);
        assert_eq!(config.presets.len(), 4);
    }

    #[test]
    fn test_preset_table_from_toml() {
        let config = Config::from_toml(
            r#"
            [[presets]]
            name = "Desk"
            pose = { x = 1.0, y = 2.0, z = -1.0 }
            "#,
        )
        .unwrap();

        assert_eq!(config.presets.len(), 1);
        assert_eq!(config.presets[0].name, "Desk");
        assert_eq!(config.presets[0].description, "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_envelope_rejected() {
        let mut config = Config::default();
        config.envelope.x.min = 6.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEnvelope { axis: Axis::X })
        ));
    }

    #[test]
    fn test_negative_limits_rejected() {
        let mut config = Config::default();
        config.motion.max_acceleration = -2.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive { name: "motion.max_acceleration", .. })
        ));
    }

    #[test]
    fn test_tick_rate_bounds() {
        for tick_hz in [1e-300, 5.0, 1e9, f64::NAN, f64::INFINITY] {
            let mut config = Config::default();
            config.motion.tick_hz = tick_hz;
            assert!(
                matches!(config.validate(), Err(ConfigError::TickRate(_))),
                "tick_hz {tick_hz} accepted"
            );
        }

        let mut config = Config::default();
        config.motion.tick_hz = 10.0;
        assert!(config.validate().is_ok());
        config.motion.tick_hz = 1000.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_detection_rate_bounds() {
        for fps in [0.0, 1e-300, 1e12] {
            let mut config = Config::default();
            config.tracking.detection_fps = fps;
            assert!(matches!(config.validate(), Err(ConfigError::DetectionRate(_))));
        }
    }

    #[test]
    fn test_zero_min_hits_rejected() {
        let mut config = Config::default();
        config.tracking.min_hits = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroCapacity { name: "tracking.min_hits" })
        ));
    }

    #[test]
    fn test_preset_outside_envelope_rejected() {
        let mut config = Config::default();
        config.presets.push(Preset::new("Roof", Pose::new(0.0, 9.0, 0.0), ""));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutsideEnvelope { .. })
        ));
    }

    #[test]
    fn test_duplicate_preset_rejected() {
        let mut config = Config::default();
        config.presets.push(Preset::new("Plan Large", Pose::new(0.0, 3.0, -4.0), ""));
        assert!(matches!(config.validate(), Err(ConfigError::DuplicatePreset(_))));
    }
}
