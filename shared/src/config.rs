//! World configuration shared by the server and every client projection

use crate::error::ConfigError;
use crate::types::EntityLocation;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MILLIS_PER_TICK: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Peaceful,
    Easy,
    Hard,
}

impl Difficulty {
    /// Multiplier applied to environmental and creature damage.
    pub fn damage_scale(&self) -> u8 {
        match self {
            Difficulty::Peaceful => 0,
            Difficulty::Easy => 1,
            Difficulty::Hard => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Seeds the per-tick random source; server and clients must agree on it.
    pub seed: u64,
    pub millis_per_tick: u64,
    pub difficulty: Difficulty,
    /// Synthesise block updates along faces where a newly loaded cuboid meets loaded neighbours.
    pub face_updates_on_load: bool,
    /// Let the server plan actions for idle creatures.
    pub creature_actions: bool,
    /// Where players respawn after dying.
    pub spawn_location: EntityLocation,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            millis_per_tick: DEFAULT_MILLIS_PER_TICK,
            difficulty: Difficulty::Easy,
            face_updates_on_load: false,
            creature_actions: true,
            spawn_location: EntityLocation::new(0.0, 0.0, 0.0),
        }
    }
}

impl WorldConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: WorldConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.millis_per_tick == 0 || self.millis_per_tick > 1000 {
            return Err(ConfigError::InvalidValue {
                field: "millis_per_tick",
                reason: format!("{} is outside 1..=1000", self.millis_per_tick),
            });
        }
        let spawn = self.spawn_location;
        if !(spawn.x.is_finite() && spawn.y.is_finite() && spawn.z.is_finite()) {
            return Err(ConfigError::InvalidValue {
                field: "spawn_location",
                reason: "coordinates must be finite".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = WorldConfig::from_json(r#"{ "seed": 42, "difficulty": "Hard" }"#).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.difficulty, Difficulty::Hard);
        assert_eq!(config.millis_per_tick, DEFAULT_MILLIS_PER_TICK);
        assert!(config.creature_actions);
    }

    #[test]
    fn test_zero_tick_rejected() {
        let result = WorldConfig::from_json(r#"{ "millis_per_tick": 0 }"#);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                field: "millis_per_tick",
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            WorldConfig::from_json("{ seed: "),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = WorldConfig::from_json_file("/nonexistent/world.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
