#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! Double-DQN learner for the card-counting blackjack policy.
//!
//! # Modules
//!
//! - `encoder` - Hand/upcard/count to feature vector
//! - `network` - Dueling value network with optional noisy heads
//! - `replay` - Uniform and prioritized experience stores
//! - `trainer` - Episode rollout and gradient updates
//! - `export` - Dense policy table and its serialized formats
//! - `config` - Training hyperparameters

pub mod config;
pub mod encoder;
pub mod export;
pub mod network;
pub mod replay;
pub mod trainer;

pub use config::DqnConfig;

/// Errors that can occur during training or export.
#[derive(thiserror::Error, Debug)]
pub enum DqnError {
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("engine error: {0}")]
    Engine(#[from] blackjack_core::EngineError),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),
    #[error("batch of {requested} requested but buffer holds {available}")]
    InsufficientSamples { requested: usize, available: usize },
    #[error("policy table is malformed: {0}")]
    MalformedTable(String),
}
