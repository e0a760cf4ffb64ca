//! The one-hand state machine: player actions, dealer auto-play, settlement.
//!
//! A [`Round`] holds the player and dealer hands for a single wager.
//! Each call to [`Round::step`] executes one player decision and returns a
//! [`StepOutcome`]: the hand continues, terminates with a reward in stake
//! units, or splits into two sub-rounds that the caller plays to completion
//! independently. Splitting is allowed once; sub-rounds have it disabled.
//!
//! Invalid requests never loop: a split on a non-pair settles as a stand, a
//! double on three or more cards is taken as a hit, and every round carries
//! a step budget whose exhaustion forces a terminal zero-reward outcome.

use crate::error::EngineError;
use crate::hand::{Card, Hand};
use crate::shoe::ShoeState;

/// Dealer draws to 17 and stands on all 17s.
const DEALER_STAND_TOTAL: u32 = 17;

/// Payout multipliers, in units of the base stake.
const NATURAL_PAYOUT: f32 = 1.5;
const SURRENDER_LOSS: f32 = -0.5;

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Player actions. The discriminants are the wire encoding used by the
/// exported policy table and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Action {
    Hit = 0,
    Stand = 1,
    Double = 2,
    Split = 3,
    Surrender = 4,
}

impl Action {
    /// Number of actions.
    pub const COUNT: usize = 5;

    /// All actions in index order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Hit,
        Self::Stand,
        Self::Double,
        Self::Split,
        Self::Surrender,
    ];

    /// Stable index of this action.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`index`](Self::index).
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Stand => "STAND",
            Self::Double => "DOUBLE",
            Self::Split => "SPLIT",
            Self::Surrender => "SURRENDER",
        }
    }
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// Result of one player decision.
#[derive(Debug)]
pub enum StepOutcome {
    /// The hand is still awaiting another decision.
    Continue,
    /// The hand is resolved; reward in units of the base stake.
    Terminal(f32),
    /// The pair was split. Each sub-round starts with one of the original
    /// cards plus one freshly drawn card and cannot split again. The caller
    /// plays both to completion and averages their rewards.
    Split(Round, Round),
}

/// A single wager being played out: the player's hand against the dealer's.
#[derive(Debug, Clone)]
pub struct Round {
    player: Hand,
    dealer: Hand,
    stake_mult: f32,
    can_split: bool,
    steps_left: u32,
}

impl Round {
    /// Start a round from dealt two-card hands. `step_budget` bounds the
    /// total number of decisions (including sub-rounds after a split).
    #[must_use]
    pub fn new(player: Hand, dealer: Hand, step_budget: u32) -> Self {
        Self {
            player,
            dealer,
            stake_mult: 1.0,
            can_split: true,
            steps_left: step_budget,
        }
    }

    #[must_use]
    pub fn player(&self) -> &Hand {
        &self.player
    }

    #[must_use]
    pub fn dealer(&self) -> &Hand {
        &self.dealer
    }

    /// The dealer's face-up card.
    #[must_use]
    pub fn dealer_upcard(&self) -> Card {
        self.dealer.cards()[0]
    }

    /// Natural-blackjack short-circuit, evaluated before any action (and
    /// before split eligibility). When either side holds a natural the
    /// round ends immediately: +1.5 for an unmatched player natural, -1
    /// for an unmatched dealer natural, 0 for a push. Reveals the dealer
    /// hole card when the round ends this way.
    pub fn check_naturals(&self, state: &mut ShoeState) -> Option<f32> {
        let player_natural = self.player.is_natural();
        let dealer_natural = self.dealer.is_natural();
        if !player_natural && !dealer_natural {
            return None;
        }
        state.reveal_hole();
        Some(if player_natural && !dealer_natural {
            NATURAL_PAYOUT
        } else if dealer_natural && !player_natural {
            -1.0
        } else {
            0.0
        })
    }

    /// Execute one player decision.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyShoe`] if a draw is attempted on an
    /// empty shoe; the episode driver is responsible for reshuffling at
    /// round boundaries, so this indicates a caller bug.
    pub fn step(&mut self, action: Action, state: &mut ShoeState) -> Result<StepOutcome, EngineError> {
        if self.steps_left == 0 {
            // Safety valve: force a terminal zero-reward outcome.
            return Ok(StepOutcome::Terminal(0.0));
        }
        self.steps_left -= 1;

        match self.coerce(action) {
            Action::Hit => self.hit(state),
            Action::Stand => Ok(StepOutcome::Terminal(self.resolve(state)?)),
            Action::Double => self.double(state),
            Action::Split => self.split(state),
            Action::Surrender => Ok(StepOutcome::Terminal(SURRENDER_LOSS)),
        }
    }

    /// Map an ineligible request onto its implicit alternative: split on a
    /// non-pair (or after a split) stands, double off two cards hits.
    fn coerce(&self, action: Action) -> Action {
        match action {
            Action::Split if !(self.can_split && self.player.is_pair()) => Action::Stand,
            Action::Double if self.player.len() != 2 => Action::Hit,
            other => other,
        }
    }

    fn hit(&mut self, state: &mut ShoeState) -> Result<StepOutcome, EngineError> {
        let card = state.draw_revealed()?;
        self.player.push(card);
        if self.player.is_bust() {
            Ok(StepOutcome::Terminal(-self.stake_mult))
        } else {
            Ok(StepOutcome::Continue)
        }
    }

    fn double(&mut self, state: &mut ShoeState) -> Result<StepOutcome, EngineError> {
        self.stake_mult = 2.0;
        let card = state.draw_revealed()?;
        self.player.push(card);
        Ok(StepOutcome::Terminal(self.resolve(state)?))
    }

    fn split(&mut self, state: &mut ShoeState) -> Result<StepOutcome, EngineError> {
        let cards = self.player.cards();
        let (left, right) = (cards[0], cards[1]);
        let first = state.draw_revealed()?;
        let second = state.draw_revealed()?;
        // Each sub-round keeps the dealer's two dealt cards and the
        // remaining step budget; neither may split again.
        let child = |kept: Card, drawn: Card, steps_left: u32| Self {
            player: Hand::of(&[kept, drawn]),
            dealer: self.dealer.clone(),
            stake_mult: 1.0,
            can_split: false,
            steps_left,
        };
        let budget = self.steps_left;
        Ok(StepOutcome::Split(
            child(left, first, budget),
            child(right, second, budget),
        ))
    }

    /// Dealer auto-play and settlement, in stake units times the double
    /// multiplier. A busted player loses without the dealer drawing.
    fn resolve(&mut self, state: &mut ShoeState) -> Result<f32, EngineError> {
        if self.player.is_bust() {
            return Ok(-self.stake_mult);
        }
        state.reveal_hole();
        while self.dealer.total() < DEALER_STAND_TOTAL {
            let card = state.draw_revealed()?;
            self.dealer.push(card);
        }
        Ok(settle(self.player.total(), self.dealer.total()) * self.stake_mult)
    }
}

/// Win/lose/push comparison for a non-busted player total.
fn settle(player_total: u32, dealer_total: u32) -> f32 {
    if dealer_total > 21 || player_total > dealer_total {
        1.0
    } else if player_total < dealer_total {
        -1.0
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
