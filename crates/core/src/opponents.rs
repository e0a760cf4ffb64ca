//! Fixed-strategy table-mates.
//!
//! Opponents exist to perturb the shared shoe and running count before the
//! learning agent acts. They play their own hands to completion (hit or
//! stand per style) and are never settled against the dealer; only their
//! card consumption matters to the learner.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::hand::Hand;
use crate::shoe::ShoeState;

/// Hitting style of a fixed-strategy opponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpponentStyle {
    /// Hits below 17.
    Aggressive,
    /// Hits below 12.
    Passive,
    /// Hits below 17 hard, below 18 soft.
    Basic,
}

impl OpponentStyle {
    fn wants_hit(self, hand: &Hand) -> bool {
        let total = hand.total();
        match self {
            Self::Aggressive => total < 17,
            Self::Passive => total < 12,
            Self::Basic => {
                if hand.is_soft() {
                    total < 18
                } else {
                    total < 17
                }
            }
        }
    }
}

/// Play one opponent hand to completion, drawing face-up from the shared
/// shoe until the style stands or the hand busts.
///
/// # Errors
///
/// Returns [`EngineError::EmptyShoe`] if the shoe runs out mid-hand.
pub fn play_opponent(
    style: OpponentStyle,
    hand: &mut Hand,
    state: &mut ShoeState,
) -> Result<(), EngineError> {
    while !hand.is_bust() && style.wants_hit(hand) {
        let card = state.draw_revealed()?;
        hand.push(card);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded_state(seed: u64) -> ShoeState {
        let mut rng = StdRng::seed_from_u64(seed);
        ShoeState::new(6, &mut rng)
    }

    #[test]
    fn aggressive_reaches_seventeen_or_busts() {
        for seed in 0..20 {
            let mut state = seeded_state(seed);
            let mut hand = Hand::of(&[2, 3]);
            play_opponent(OpponentStyle::Aggressive, &mut hand, &mut state).unwrap();
            assert!(hand.total() >= 17 || hand.is_bust());
        }
    }

    #[test]
    fn passive_stops_at_twelve() {
        for seed in 0..20 {
            let mut state = seeded_state(seed);
            let mut hand = Hand::of(&[2, 3]);
            play_opponent(OpponentStyle::Passive, &mut hand, &mut state).unwrap();
            assert!(hand.total() >= 12);
            assert!(!hand.is_bust(), "passive cannot bust from below 12");
        }
    }

    #[test]
    fn basic_hits_soft_seventeen() {
        let mut state = seeded_state(3);
        let mut hand = Hand::of(&[1, 6]);
        assert!(OpponentStyle::Basic.wants_hit(&hand));
        play_opponent(OpponentStyle::Basic, &mut hand, &mut state).unwrap();
        assert!(hand.len() > 2, "soft 17 must take at least one card");
    }

    #[test]
    fn basic_stands_hard_seventeen() {
        let hand = Hand::of(&[10, 7]);
        assert!(!OpponentStyle::Basic.wants_hit(&hand));
    }

    #[test]
    fn opponent_draws_consume_cards() {
        let mut state = seeded_state(5);
        let before_remaining = state.remaining();
        let mut hand = Hand::of(&[2, 2]);
        play_opponent(OpponentStyle::Aggressive, &mut hand, &mut state).unwrap();
        assert!(state.remaining() < before_remaining);
    }
}
