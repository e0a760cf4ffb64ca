//! Experience stores: uniform and prioritized replay.
//!
//! Both are fixed-capacity arenas indexed by a monotonically-wrapping
//! cursor; once full, the oldest transition is overwritten in place. The
//! prioritized store keeps a parallel priority array sharing the same index
//! space by construction, so there is no separate bookkeeping to collect.

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::seq::index;
use rand::Rng;

use crate::encoder::STATE_DIM;
use crate::DqnError;

/// Additive floor applied to updated priorities so no transition ever
/// reaches exactly-zero sampling probability.
const PRIORITY_FLOOR: f32 = 1e-5;

/// One logged decision point. `next_state` is zeroed when `done` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: [f32; STATE_DIM],
    pub action: u8,
    pub reward: f32,
    pub next_state: [f32; STATE_DIM],
    pub done: bool,
}

// ---------------------------------------------------------------------------
// Uniform replay
// ---------------------------------------------------------------------------

/// Fixed-capacity ring buffer with uniform sampling.
pub struct ReplayBuffer {
    slots: Vec<Transition>,
    cursor: usize,
    capacity: usize,
}

impl ReplayBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
        }
    }

    /// Store a transition, overwriting the oldest once at capacity.
    pub fn push(&mut self, transition: Transition) {
        if self.slots.len() < self.capacity {
            self.slots.push(transition);
        } else {
            self.slots[self.cursor] = transition;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Sample `batch_size` distinct transitions uniformly at random.
    ///
    /// # Errors
    ///
    /// Returns [`DqnError::InsufficientSamples`] if fewer than `batch_size`
    /// transitions are stored.
    pub fn sample(
        &self,
        batch_size: usize,
        rng: &mut impl Rng,
    ) -> Result<Vec<&Transition>, DqnError> {
        if self.slots.len() < batch_size {
            return Err(DqnError::InsufficientSamples {
                requested: batch_size,
                available: self.slots.len(),
            });
        }
        let picks = index::sample(rng, self.slots.len(), batch_size);
        Ok(picks.iter().map(|i| &self.slots[i]).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Prioritized replay
// ---------------------------------------------------------------------------

/// A sampled batch with the bookkeeping needed to weight the loss and
/// write back updated priorities.
pub struct PrioritizedBatch<'a> {
    pub transitions: Vec<&'a Transition>,
    /// Arena indices of the sampled transitions. Must be passed back to
    /// [`PrioritizedReplay::update_priorities`] exactly once per batch.
    pub indices: Vec<usize>,
    /// Importance-sampling weights, normalized so the largest is 1.
    pub weights: Vec<f32>,
}

/// Fixed-capacity ring buffer with power-law priority sampling.
///
/// New transitions enter at the current maximum priority (1.0 when empty)
/// so they are sampled soon after insertion. Sampling probability is
/// proportional to `priority^alpha`; the importance-sampling correction is
/// `(N * P(i))^(-beta)` normalized by the batch maximum.
pub struct PrioritizedReplay {
    slots: Vec<Transition>,
    priorities: Vec<f32>,
    cursor: usize,
    capacity: usize,
    alpha: f64,
}

impl PrioritizedReplay {
    #[must_use]
    pub fn new(capacity: usize, alpha: f64) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            priorities: Vec::with_capacity(capacity),
            cursor: 0,
            capacity,
            alpha,
        }
    }

    /// Store a transition at the current maximum priority.
    pub fn push(&mut self, transition: Transition) {
        let max_priority = self
            .priorities
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        let priority = if max_priority.is_finite() {
            max_priority
        } else {
            1.0
        };

        if self.slots.len() < self.capacity {
            self.slots.push(transition);
            self.priorities.push(priority);
        } else {
            self.slots[self.cursor] = transition;
            self.priorities[self.cursor] = priority;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Sample `batch_size` transitions with probability proportional to
    /// `priority^alpha`, with replacement.
    ///
    /// # Errors
    ///
    /// Returns [`DqnError::InsufficientSamples`] if fewer than `batch_size`
    /// transitions are stored.
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample(
        &self,
        batch_size: usize,
        beta: f64,
        rng: &mut impl Rng,
    ) -> Result<PrioritizedBatch<'_>, DqnError> {
        let n = self.slots.len();
        if n < batch_size {
            return Err(DqnError::InsufficientSamples {
                requested: batch_size,
                available: n,
            });
        }

        let scaled: Vec<f64> = self
            .priorities
            .iter()
            .map(|&p| f64::from(p).powf(self.alpha))
            .collect();
        let total: f64 = scaled.iter().sum();
        let dist = WeightedIndex::new(&scaled)
            .map_err(|e| DqnError::Config(format!("degenerate priorities: {e}")))?;

        let indices: Vec<usize> = (0..batch_size).map(|_| dist.sample(rng)).collect();

        #[allow(clippy::cast_precision_loss)]
        let n_f = n as f64;
        let raw: Vec<f64> = indices
            .iter()
            .map(|&i| (n_f * scaled[i] / total).powf(-beta))
            .collect();
        let max_weight = raw.iter().copied().fold(f64::MIN, f64::max);
        let weights = raw.iter().map(|&w| (w / max_weight) as f32).collect();

        let transitions = indices.iter().map(|&i| &self.slots[i]).collect();
        Ok(PrioritizedBatch {
            transitions,
            indices,
            weights,
        })
    }

    /// Overwrite priorities with `|TD error| + floor` for a just-trained
    /// batch. Call exactly once per [`sample`](Self::sample), with the
    /// indices that call returned.
    pub fn update_priorities(&mut self, indices: &[usize], td_errors: &[f32]) {
        for (&i, &err) in indices.iter().zip(td_errors.iter()) {
            self.priorities[i] = err.abs() + PRIORITY_FLOOR;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded_rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    fn transition(tag: f32) -> Transition {
        Transition {
            state: [tag; STATE_DIM],
            action: 0,
            reward: tag,
            next_state: [0.0; STATE_DIM],
            done: false,
        }
    }

    // -----------------------------------------------------------------------
    // Uniform buffer
    // -----------------------------------------------------------------------

    #[test]
    fn ring_overwrites_oldest() {
        let mut buf = ReplayBuffer::new(3);
        for i in 0..5 {
            #[allow(clippy::cast_precision_loss)]
            buf.push(transition(i as f32));
        }
        assert_eq!(buf.len(), 3, "size never exceeds capacity");
        let rewards: Vec<f32> = buf.slots.iter().map(|t| t.reward).collect();
        // 0 and 1 were overwritten by 3 and 4.
        assert_eq!(rewards, vec![3.0, 4.0, 2.0]);
    }

    #[test]
    fn sample_requires_enough_transitions() {
        let mut buf = ReplayBuffer::new(10);
        buf.push(transition(1.0));
        let mut rng = seeded_rng(42);
        assert!(matches!(
            buf.sample(2, &mut rng),
            Err(DqnError::InsufficientSamples {
                requested: 2,
                available: 1
            })
        ));
    }

    #[test]
    fn uniform_batch_has_distinct_indices() {
        let mut buf = ReplayBuffer::new(16);
        for i in 0..16 {
            #[allow(clippy::cast_precision_loss)]
            buf.push(transition(i as f32));
        }
        let mut rng = seeded_rng(42);
        let batch = buf.sample(16, &mut rng).unwrap();
        let mut rewards: Vec<i64> = batch.iter().map(|t| t.reward as i64).collect();
        rewards.sort_unstable();
        rewards.dedup();
        assert_eq!(rewards.len(), 16, "sampling is without replacement");
    }

    // -----------------------------------------------------------------------
    // Prioritized buffer
    // -----------------------------------------------------------------------

    #[test]
    fn new_transitions_get_max_priority() {
        let mut buf = PrioritizedReplay::new(10, 0.7);
        buf.push(transition(0.0));
        assert_eq!(buf.priorities[0], 1.0, "empty buffer seeds priority 1.0");

        buf.update_priorities(&[0], &[3.0]);
        buf.push(transition(1.0));
        assert!(
            (buf.priorities[1] - (3.0 + PRIORITY_FLOOR)).abs() < 1e-6,
            "insertions inherit the running maximum"
        );
    }

    #[test]
    fn priority_ring_overwrites_with_slots() {
        let mut buf = PrioritizedReplay::new(2, 0.7);
        for i in 0..4 {
            #[allow(clippy::cast_precision_loss)]
            buf.push(transition(i as f32));
        }
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.priorities.len(), 2, "priorities share the index space");
    }

    #[test]
    fn alpha_zero_reduces_to_uniform() {
        let mut buf = PrioritizedReplay::new(100, 0.0);
        for i in 0..100 {
            #[allow(clippy::cast_precision_loss)]
            buf.push(transition(i as f32));
        }
        // Wildly different priorities are flattened by alpha = 0.
        let updates: Vec<f32> = (0..100).map(|i| (i + 1) as f32).collect();
        let indices: Vec<usize> = (0..100).collect();
        buf.update_priorities(&indices, &updates);

        let mut rng = seeded_rng(42);
        let batch = buf.sample(64, 1.0, &mut rng).unwrap();
        for &w in &batch.weights {
            assert!(
                (w - 1.0).abs() < 1e-6,
                "uniform probabilities give unit IS weights, got {w}"
            );
        }

        // Every transition is reachable: sample many batches and count
        // distinct indices.
        let mut seen = vec![false; 100];
        for _ in 0..200 {
            for &i in &buf.sample(64, 1.0, &mut rng).unwrap().indices {
                seen[i] = true;
            }
        }
        assert!(seen.iter().all(|&s| s), "all transitions must be sampled");
    }

    #[test]
    fn weights_are_normalized_to_unit_max() {
        let mut buf = PrioritizedReplay::new(50, 0.7);
        for i in 0..50 {
            #[allow(clippy::cast_precision_loss)]
            buf.push(transition(i as f32));
        }
        let updates: Vec<f32> = (0..50).map(|i| 0.1 + i as f32).collect();
        let indices: Vec<usize> = (0..50).collect();
        buf.update_priorities(&indices, &updates);

        let mut rng = seeded_rng(7);
        let batch = buf.sample(32, 0.5, &mut rng).unwrap();
        let max = batch.weights.iter().copied().fold(f32::MIN, f32::max);
        assert!((max - 1.0).abs() < 1e-6, "largest weight must be exactly 1");
        assert!(batch.weights.iter().all(|&w| w > 0.0 && w <= 1.0 + 1e-6));
    }

    #[test]
    fn high_priority_transitions_dominate_sampling() {
        let mut buf = PrioritizedReplay::new(10, 1.0);
        for i in 0..10 {
            #[allow(clippy::cast_precision_loss)]
            buf.push(transition(i as f32));
        }
        // One transition gets overwhelming priority.
        let mut updates = vec![0.001f32; 10];
        updates[3] = 100.0;
        let indices: Vec<usize> = (0..10).collect();
        buf.update_priorities(&indices, &updates);

        let mut rng = seeded_rng(11);
        let batch = buf.sample(10, 0.4, &mut rng).unwrap();
        let hits = batch.indices.iter().filter(|&&i| i == 3).count();
        assert!(
            hits >= 8,
            "index 3 should dominate the batch, got {hits}/10"
        );
    }

    #[test]
    fn prioritized_sample_requires_enough_transitions() {
        let mut buf = PrioritizedReplay::new(10, 0.7);
        buf.push(transition(1.0));
        let mut rng = seeded_rng(42);
        assert!(buf.sample(4, 0.4, &mut rng).is_err());
    }

    #[test]
    fn updated_priorities_are_floored() {
        let mut buf = PrioritizedReplay::new(4, 0.7);
        buf.push(transition(0.0));
        buf.update_priorities(&[0], &[0.0]);
        assert!(
            buf.priorities[0] > 0.0,
            "zero TD error must keep a positive sampling probability"
        );
    }
}
