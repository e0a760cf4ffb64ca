//! State encoding: hand + dealer upcard + true-count bin to a fixed-length
//! normalized feature vector.
//!
//! This is the single place where "the state" is defined for learning.
//! Changing the output dimensionality invalidates saved network parameters;
//! there is no migration, only retraining.

use blackjack_core::shoe::CountBins;
use blackjack_core::Hand;

/// Feature vector length.
pub const STATE_DIM: usize = 6;

/// Totals are clamped to this closed range before normalization. Sub-4 and
/// post-bust totals appear only transiently, never as stable decision points.
pub const TOTAL_MIN: u32 = 4;
pub const TOTAL_MAX: u32 = 21;

/// Hand sizes at or above this all normalize to 1.0.
const HAND_SIZE_CAP: usize = 5;

/// Encodes game states for the value network.
///
/// Stateless apart from the bin range; encoding is deterministic and
/// side-effect free.
#[derive(Debug, Clone, Copy)]
pub struct StateEncoder {
    bins: CountBins,
}

impl StateEncoder {
    #[must_use]
    pub fn new(bins: CountBins) -> Self {
        Self { bins }
    }

    /// Encode a decision point into `[0, 1]`-normalized features:
    /// clamped total, usable-ace flag, dealer upcard, count bin, hand
    /// size, and ace count.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn encode(&self, hand: &Hand, dealer_up: u8, count_bin: usize) -> [f32; STATE_DIM] {
        let total = hand.total().clamp(TOTAL_MIN, TOTAL_MAX);
        let usable_ace = if hand.is_soft() { 1.0 } else { 0.0 };
        let hand_size = hand.len().min(HAND_SIZE_CAP) as f32 / HAND_SIZE_CAP as f32;
        let num_aces = hand.ace_count() as f32 / 4.0;

        [
            (total - TOTAL_MIN) as f32 / (TOTAL_MAX - TOTAL_MIN) as f32,
            usable_ace,
            f32::from(dealer_up - 1) / 9.0,
            count_bin as f32 / (self.bins.len() - 1) as f32,
            hand_size,
            num_aces,
        ]
    }

    /// Recover the clamped total a feature vector was encoded from.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn decode_total(features: &[f32; STATE_DIM]) -> u32 {
        let span = (TOTAL_MAX - TOTAL_MIN) as f32;
        (features[0] * span).round() as u32 + TOTAL_MIN
    }

    #[must_use]
    pub fn bins(&self) -> CountBins {
        self.bins
    }
}
