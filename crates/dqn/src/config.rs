//! Training hyperparameters.

use serde::{Deserialize, Serialize};

use crate::DqnError;

/// Exploration strategy. The two modes are mutually exclusive: noisy-net
/// exploration pins epsilon to zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Exploration {
    /// Epsilon-greedy over plain network heads, with exponential decay.
    EpsilonGreedy {
        start: f64,
        end: f64,
        decay_steps: u32,
    },
    /// Factorized Gaussian weight noise in the network heads, resampled
    /// after every gradient step.
    Noisy { sigma_init: f64 },
}

impl Exploration {
    /// Epsilon for the given gradient-step count. Always zero in noisy mode.
    #[must_use]
    pub fn epsilon_at(self, step: u32) -> f64 {
        match self {
            Self::Noisy { .. } => 0.0,
            Self::EpsilonGreedy {
                start,
                end,
                decay_steps,
            } => end + (start - end) * (-f64::from(step) / f64::from(decay_steps)).exp(),
        }
    }

    #[must_use]
    pub fn is_noisy(self) -> bool {
        matches!(self, Self::Noisy { .. })
    }
}

/// Prioritized-replay parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PerConfig {
    /// Use prioritized sampling; uniform replay otherwise.
    pub enabled: bool,
    /// Priority exponent; 0 reduces to uniform sampling.
    pub alpha: f64,
    /// Initial importance-sampling exponent, annealed toward 1.
    pub beta_start: f64,
    /// Gradient steps over which beta reaches 1.
    pub beta_frames: u32,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alpha: 0.7,
            beta_start: 0.5,
            beta_frames: 250_000,
        }
    }
}

impl PerConfig {
    /// Linearly annealed beta for the given gradient-step count.
    #[must_use]
    pub fn beta_at(self, step: u32) -> f64 {
        let progress = f64::from(step) / f64::from(self.beta_frames.max(1));
        (self.beta_start + (1.0 - self.beta_start) * progress).min(1.0)
    }
}

/// Configuration for the Double-DQN trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DqnConfig {
    /// Episodes to simulate.
    pub num_episodes: u64,
    /// Transitions per gradient step.
    pub batch_size: usize,
    /// Replay capacity.
    pub replay_capacity: usize,
    /// Minimum stored transitions before training starts.
    pub warmup: usize,
    /// Gradient steps between target-network syncs.
    pub target_sync_steps: u32,
    /// Gradient steps per episode once past warm-up.
    pub updates_per_episode: u32,
    /// Discount factor.
    pub gamma: f64,
    /// AdamW learning rate.
    pub learning_rate: f64,
    /// AdamW weight decay.
    pub weight_decay: f64,
    /// Hidden width of the value network trunk.
    pub hidden_dim: usize,
    /// Global gradient-norm clipping threshold.
    pub grad_clip_norm: f64,
    /// Exploration strategy.
    pub exploration: Exploration,
    /// Prioritized-replay parameters.
    pub per: PerConfig,
    /// Multiplier applied to every logged reward.
    pub reward_scale: f64,
    /// Clip rewards to [-1, 1] before logging.
    pub clip_rewards: bool,
    /// Random seed for the whole run.
    pub seed: u64,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            num_episodes: 500_000,
            batch_size: 512,
            replay_capacity: 500_000,
            warmup: 20_000,
            target_sync_steps: 2_000,
            updates_per_episode: 1,
            gamma: 0.995,
            learning_rate: 5e-4,
            weight_decay: 1e-6,
            hidden_dim: 512,
            grad_clip_norm: 5.0,
            exploration: Exploration::Noisy { sigma_init: 0.5 },
            per: PerConfig::default(),
            reward_scale: 1.0,
            clip_rewards: true,
            seed: 42,
        }
    }
}

impl DqnConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DqnError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<(), DqnError> {
        if self.num_episodes == 0 {
            return Err(DqnError::Config("num_episodes must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(DqnError::Config("batch_size must be > 0".into()));
        }
        if self.replay_capacity < self.batch_size {
            return Err(DqnError::Config(
                "replay_capacity must be >= batch_size".into(),
            ));
        }
        if self.warmup < self.batch_size {
            return Err(DqnError::Config("warmup must be >= batch_size".into()));
        }
        if self.hidden_dim == 0 {
            return Err(DqnError::Config("hidden_dim must be > 0".into()));
        }
        if self.target_sync_steps == 0 {
            return Err(DqnError::Config("target_sync_steps must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(DqnError::Config("gamma must be in [0, 1]".into()));
        }
        if self.learning_rate <= 0.0 {
            return Err(DqnError::Config("learning_rate must be > 0".into()));
        }
        if self.grad_clip_norm <= 0.0 {
            return Err(DqnError::Config("grad_clip_norm must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.per.beta_start) {
            return Err(DqnError::Config("per.beta_start must be in [0, 1]".into()));
        }
        if self.per.alpha < 0.0 {
            return Err(DqnError::Config("per.alpha must be >= 0".into()));
        }
        if self.reward_scale <= 0.0 {
            return Err(DqnError::Config("reward_scale must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        DqnConfig::default().validate().unwrap();
    }

    #[test]
    fn warmup_below_batch_is_invalid() {
        let config = DqnConfig {
            warmup: 16,
            batch_size: 32,
            ..DqnConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_hidden_dim_is_invalid() {
        let config = DqnConfig {
            hidden_dim: 0,
            ..DqnConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn noisy_mode_pins_epsilon_to_zero() {
        let exploration = Exploration::Noisy { sigma_init: 0.5 };
        assert_eq!(exploration.epsilon_at(0), 0.0);
        assert_eq!(exploration.epsilon_at(1_000_000), 0.0);
    }

    #[test]
    fn epsilon_decays_toward_end_value() {
        let exploration = Exploration::EpsilonGreedy {
            start: 1.0,
            end: 0.05,
            decay_steps: 1_000,
        };
        assert!((exploration.epsilon_at(0) - 1.0).abs() < 1e-9);
        let late = exploration.epsilon_at(100_000);
        assert!((late - 0.05).abs() < 1e-6, "late epsilon ~ end, got {late}");
        assert!(exploration.epsilon_at(500) < exploration.epsilon_at(100));
    }

    #[test]
    fn beta_anneals_to_one() {
        let per = PerConfig {
            beta_start: 0.5,
            beta_frames: 100,
            ..PerConfig::default()
        };
        assert!((per.beta_at(0) - 0.5).abs() < 1e-9);
        assert!((per.beta_at(50) - 0.75).abs() < 1e-9);
        assert!((per.beta_at(100) - 1.0).abs() < 1e-9);
        assert!((per.beta_at(10_000) - 1.0).abs() < 1e-9, "beta is capped at 1");
    }

    #[test]
    fn exploration_parses_from_yaml() {
        let noisy: Exploration = serde_yaml::from_str("{ mode: noisy, sigma_init: 0.5 }").unwrap();
        assert!(noisy.is_noisy());

        let eps: Exploration = serde_yaml::from_str(
            "{ mode: epsilon-greedy, start: 1.0, end: 0.05, decay_steps: 200000 }",
        )
        .unwrap();
        assert!(!eps.is_noisy());
    }
}
