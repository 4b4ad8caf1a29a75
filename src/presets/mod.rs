//! Named fixed camera poses
//!
//! Applying a preset is an operator act: the engine turns it into a
//! manual target and forces manual mode.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::Pose;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub pose: Pose,
    #[serde(default)]
    pub description: String,
}

impl Preset {
    pub fn new(name: impl Into<String>, pose: Pose, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pose,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresetError {
    #[error("unknown preset {0:?}")]
    NotFound(String),
}

/// Read-only preset table keyed by name
#[derive(Debug, Clone, Default)]
pub struct PresetStore {
    presets: HashMap<String, Preset>,
}

impl PresetStore {
    /// Build the store; a later duplicate name replaces an earlier one
    pub fn new(presets: impl IntoIterator<Item = Preset>) -> Self {
        let presets = presets
            .into_iter()
            .map(|preset| (preset.name.clone(), preset))
            .collect();
        Self { presets }
    }

    /// Resolve a preset to its pose
    pub fn apply(&self, name: &str) -> Result<Pose, PresetError> {
        let preset = self
            .presets
            .get(name)
            .ok_or_else(|| PresetError::NotFound(name.to_string()))?;
        debug!(name, pose = %preset.pose, "preset resolved");
        Ok(preset.pose)
    }

    /// All presets, sorted by name
    pub fn list(&self) -> Vec<Preset> {
        let mut presets: Vec<Preset> = self.presets.values().cloned().collect();
        presets.sort_by(|a, b| a.name.cmp(&b.name));
        presets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PresetStore {
        PresetStore::new([
            Preset::new("Plan Large", Pose::new(0.0, 3.0, -4.0), "Overview"),
            Preset::new("Gros Plan", Pose::new(0.0, 2.0, -1.5), "Close"),
        ])
    }

    #[test]
    fn test_apply_known_preset() {
        assert_eq!(store().apply("Plan Large"), Ok(Pose::new(0.0, 3.0, -4.0)));
    }

    #[test]
    fn test_apply_unknown_preset() {
        assert_eq!(
            store().apply("Plan Americain"),
            Err(PresetError::NotFound("Plan Americain".to_string()))
        );
    }

    #[test]
    fn test_list_is_sorted() {
        let names: Vec<String> = store().list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Gros Plan", "Plan Large"]);
    }
}
