//! Game configuration.
//!
//! Loaded from the `game:` section of the trainer's YAML configuration.
//! Defaults reproduce the fixed rule set: six decks, quarter-shoe
//! penetration, Hi-Lo bins -5..=+5, three fixed-strategy table-mates.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::opponents::OpponentStyle;
use crate::shoe::CountBins;

/// Table rules and simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Decks in the shoe.
    pub num_decks: u32,
    /// Reshuffle when the remaining fraction of the shoe drops below this.
    pub reshuffle_penetration: f64,
    /// Closed true-count bin range.
    pub count_bins: CountBins,
    /// Fixed-strategy opponents seated before the agent.
    pub opponents: Vec<OpponentStyle>,
    /// Per-round decision budget; exhaustion forces a zero-reward terminal.
    pub step_budget: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            num_decks: 6,
            reshuffle_penetration: 0.25,
            count_bins: CountBins::default(),
            opponents: vec![
                OpponentStyle::Aggressive,
                OpponentStyle::Passive,
                OpponentStyle::Basic,
            ],
            step_budget: 200,
        }
    }
}

impl GameConfig {
    /// Parse and validate a configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the YAML is invalid or a field
    /// fails validation.
    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.num_decks == 0 {
            return Err(EngineError::Config("num_decks must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.reshuffle_penetration) {
            return Err(EngineError::Config(
                "reshuffle_penetration must be in [0, 1)".into(),
            ));
        }
        if self.count_bins.min > self.count_bins.max {
            return Err(EngineError::Config(
                "count_bins.min must not exceed count_bins.max".into(),
            ));
        }
        if self.step_budget == 0 {
            return Err(EngineError::Config("step_budget must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        GameConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_decks_is_invalid() {
        let config = GameConfig {
            num_decks: 0,
            ..GameConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_bins_are_invalid() {
        let config = GameConfig {
            count_bins: CountBins { min: 3, max: -3 },
            ..GameConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn full_penetration_is_invalid() {
        let config = GameConfig {
            reshuffle_penetration: 1.0,
            ..GameConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_from_yaml() {
        let yaml = r"
num_decks: 8
reshuffle_penetration: 0.3
count_bins: { min: -3, max: 3 }
opponents: [aggressive, basic]
step_budget: 100
";
        let config = GameConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.num_decks, 8);
        assert_eq!(config.count_bins.len(), 7);
        assert_eq!(config.opponents.len(), 2);
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        assert!(matches!(
            GameConfig::from_yaml("num_decks: zero"),
            Err(EngineError::Config(_))
        ));
    }
}
