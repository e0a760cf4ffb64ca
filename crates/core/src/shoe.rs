//! Card shoe and Hi-Lo count tracking.
//!
//! The shoe is an ordered-removal multiset of card values; after shuffling,
//! draw order carries no information. [`ShoeState`] bundles the shoe with
//! the running Hi-Lo count so the episode driver owns exactly one value of
//! mutable table state, passed explicitly through every draw.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::hand::Card;

/// Cards per deck.
const DECK_SIZE: usize = 52;

/// Minimum decks-remaining used when deriving the true count, guarding the
/// division as the shoe runs out.
const MIN_DECKS_REMAINING: f64 = 0.25;

// ---------------------------------------------------------------------------
// Shoe
// ---------------------------------------------------------------------------

/// A multi-deck dealing shoe.
#[derive(Debug, Clone)]
pub struct Shoe {
    cards: Vec<Card>,
    num_decks: u32,
}

impl Shoe {
    /// Create a freshly shuffled shoe of `num_decks` decks.
    pub fn shuffled(num_decks: u32, rng: &mut impl Rng) -> Self {
        let mut shoe = Self {
            cards: fill_decks(num_decks),
            num_decks,
        };
        shoe.cards.shuffle(rng);
        shoe
    }

    /// Refill to the full `52 * num_decks` cards and shuffle in place.
    pub fn reshuffle(&mut self, rng: &mut impl Rng) {
        self.cards = fill_decks(self.num_decks);
        self.cards.shuffle(rng);
    }

    /// Remove and return one card.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyShoe`] if the shoe is empty. Callers must
    /// reshuffle first; this is a contract violation, not a recoverable
    /// runtime condition.
    pub fn draw(&mut self) -> Result<Card, EngineError> {
        self.cards.pop().ok_or(EngineError::EmptyShoe)
    }

    /// Number of cards left to deal.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.cards.len()
    }

    /// Full capacity of the shoe (`52 * num_decks`).
    #[must_use]
    pub fn capacity(&self) -> usize {
        DECK_SIZE * self.num_decks as usize
    }

    /// Whether the remaining fraction has dropped below `penetration`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn needs_reshuffle(&self, penetration: f64) -> bool {
        (self.remaining() as f64) < penetration * self.capacity() as f64
    }
}

/// Build the ordered multiset for `num_decks` decks: ranks 1..=13 collapse
/// to values 1..=10, four of each rank per deck.
fn fill_decks(num_decks: u32) -> Vec<Card> {
    let mut cards = Vec::with_capacity(DECK_SIZE * num_decks as usize);
    for _ in 0..num_decks {
        for rank in 1u8..=13 {
            let value = rank.min(10);
            for _ in 0..4 {
                cards.push(value);
            }
        }
    }
    cards
}

// ---------------------------------------------------------------------------
// Hi-Lo counting
// ---------------------------------------------------------------------------

/// Hi-Lo count increment for a revealed card: +1 for 2-6, 0 for 7-9,
/// -1 for tens and aces.
#[must_use]
pub fn hi_lo_delta(card: Card) -> i32 {
    match card {
        2..=6 => 1,
        7..=9 => 0,
        _ => -1,
    }
}

/// Closed integer range of true-count bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBins {
    pub min: i32,
    pub max: i32,
}

impl CountBins {
    /// Number of bins in the range.
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(self) -> usize {
        (self.max - self.min + 1) as usize
    }
}

impl Default for CountBins {
    fn default() -> Self {
        Self { min: -5, max: 5 }
    }
}

/// Derive the discretized true-count bin from a running count.
///
/// The running count is divided by decks remaining (floored at 0.25 to
/// avoid blow-up on a near-empty shoe), rounded, clamped to the bin range,
/// and offset so the result indexes from 0.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn true_count_bin(running_count: i32, cards_remaining: usize, bins: CountBins) -> usize {
    let decks_left = (cards_remaining as f64 / DECK_SIZE as f64).max(MIN_DECKS_REMAINING);
    let true_count = f64::from(running_count) / decks_left;
    let rounded = (true_count.round() as i32).clamp(bins.min, bins.max);
    (rounded - bins.min) as usize
}

// ---------------------------------------------------------------------------
// ShoeState
// ---------------------------------------------------------------------------

/// Shoe plus running count, owned by the episode driver.
///
/// Every revealed card updates the count as it is drawn. The dealer's hole
/// card is drawn face-down via [`draw_hole`](Self::draw_hole) and only
/// enters the count when [`reveal_hole`](Self::reveal_hole) is called at
/// dealer resolution; the reveal is idempotent so split sub-hands that each
/// resolve a dealer continuation cannot double-count it.
#[derive(Debug, Clone)]
pub struct ShoeState {
    shoe: Shoe,
    running_count: i32,
    pending_hole: Option<Card>,
}

impl ShoeState {
    /// Create a shuffled shoe with a zero count.
    pub fn new(num_decks: u32, rng: &mut impl Rng) -> Self {
        Self {
            shoe: Shoe::shuffled(num_decks, rng),
            running_count: 0,
            pending_hole: None,
        }
    }

    /// Draw a card face-up, updating the running count.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyShoe`] if the shoe is empty.
    pub fn draw_revealed(&mut self) -> Result<Card, EngineError> {
        let card = self.shoe.draw()?;
        self.running_count += hi_lo_delta(card);
        Ok(card)
    }

    /// Draw the dealer's hole card face-down. The count is deferred until
    /// [`reveal_hole`](Self::reveal_hole).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyShoe`] if the shoe is empty.
    pub fn draw_hole(&mut self) -> Result<Card, EngineError> {
        let card = self.shoe.draw()?;
        self.pending_hole = Some(card);
        Ok(card)
    }

    /// Count the pending hole card, if any. Idempotent.
    pub fn reveal_hole(&mut self) {
        if let Some(card) = self.pending_hole.take() {
            self.running_count += hi_lo_delta(card);
        }
    }

    #[must_use]
    pub fn running_count(&self) -> i32 {
        self.running_count
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.shoe.remaining()
    }

    /// Current true-count bin for the given range.
    #[must_use]
    pub fn true_count_bin(&self, bins: CountBins) -> usize {
        true_count_bin(self.running_count, self.shoe.remaining(), bins)
    }

    /// Reshuffle and reset the count if penetration has been reached.
    /// Returns whether a reshuffle happened.
    pub fn reshuffle_if_needed(&mut self, penetration: f64, rng: &mut impl Rng) -> bool {
        if !self.shoe.needs_reshuffle(penetration) && self.shoe.remaining() > 0 {
            return false;
        }
        self.shoe.reshuffle(rng);
        self.running_count = 0;
        self.pending_hole = None;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
