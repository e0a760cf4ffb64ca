#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! Blackjack Game Engine
//!
//! The simulation half of the card-counting trainer: a multi-deck shoe with
//! Hi-Lo count tracking, soft-ace hand evaluation, the hand-resolution state
//! machine (hit/stand/double/split/surrender with dealer auto-play), and the
//! fixed-strategy table-mates that perturb the shoe between episodes.
//!
//! # Modules
//!
//! - `shoe` - Card shoe, running count, true-count binning
//! - `hand` - Hand totals, soft aces, naturals, pairs
//! - `rules` - One-hand state machine and settlement
//! - `opponents` - Fixed-strategy players
//! - `config` - Game configuration loaded from YAML

pub mod config;
pub mod error;
pub mod hand;
pub mod opponents;
pub mod rules;
pub mod shoe;

pub use config::GameConfig;
pub use error::EngineError;
pub use hand::{Card, Hand};
pub use opponents::OpponentStyle;
pub use rules::{Action, Round, StepOutcome};
pub use shoe::{CountBins, Shoe, ShoeState};
