//! Double-DQN training loop.
//!
//! One [`run_episode`](DqnTrainer::run_episode) call simulates a full table
//! round (opponents first, then the agent's hand end-to-end, split sub-hands
//! recursively) and, once the replay store is past warm-up, performs the
//! configured number of gradient steps: prioritized sampling with annealed
//! beta, Double-DQN targets, importance-weighted Smooth-L1 loss, global
//! gradient-norm clipping, an AdamW step, priority write-back, exploration
//! maintenance, and periodic hard target syncs.
//!
//! Everything is single-threaded and synchronous: an episode finishes
//! before the next begins, and a gradient step completes before the next
//! rollout starts.

use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use blackjack_core::opponents::play_opponent;
use blackjack_core::{Action, GameConfig, Hand, Round, ShoeState, StepOutcome};

use crate::config::DqnConfig;
use crate::encoder::{StateEncoder, STATE_DIM};
use crate::network::{DuelingNet, RunMode};
use crate::replay::{PrioritizedReplay, ReplayBuffer, Transition};
use crate::DqnError;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What one episode produced: the agent's (clipped, scaled) reward and the
/// mean loss over this episode's gradient steps, if any ran.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeOutcome {
    pub reward: f32,
    pub loss: Option<f32>,
}

/// Training-loop coordinator: owns the shoe, the replay store, both
/// networks, and the optimizer.
pub struct DqnTrainer {
    game: GameConfig,
    config: DqnConfig,
    encoder: StateEncoder,
    policy: DuelingNet,
    policy_vars: VarMap,
    target: DuelingNet,
    target_vars: VarMap,
    optimizer: AdamW,
    store: Store,
    shoe: ShoeState,
    rng: StdRng,
    step_count: u32,
    device: Device,
}

impl DqnTrainer {
    /// Create a trainer, validating both configurations. The target network
    /// starts as an exact copy of the policy network.
    pub fn new(game: GameConfig, config: DqnConfig) -> Result<Self, DqnError> {
        game.validate()?;
        config.validate()?;

        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let encoder = StateEncoder::new(game.count_bins);

        let noisy = config.exploration.is_noisy();
        let sigma_init = match config.exploration {
            crate::config::Exploration::Noisy { sigma_init } => sigma_init,
            crate::config::Exploration::EpsilonGreedy { .. } => 0.0,
        };

        let policy_vars = VarMap::new();
        let policy = build_net(&policy_vars, &config, noisy, sigma_init, &device)?;
        let target_vars = VarMap::new();
        let target = build_net(&target_vars, &config, noisy, sigma_init, &device)?;

        let optimizer = AdamW::new(
            policy_vars.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..ParamsAdamW::default()
            },
        )?;

        let store = if config.per.enabled {
            Store::Prioritized(PrioritizedReplay::new(config.replay_capacity, config.per.alpha))
        } else {
            Store::Uniform(ReplayBuffer::new(config.replay_capacity))
        };

        let shoe = ShoeState::new(game.num_decks, &mut rng);

        let mut trainer = Self {
            game,
            config,
            encoder,
            policy,
            policy_vars,
            target,
            target_vars,
            optimizer,
            store,
            shoe,
            rng,
            step_count: 0,
            device,
        };
        trainer.sync_target()?;
        Ok(trainer)
    }

    /// Simulate one episode and run any due gradient steps.
    ///
    /// # Errors
    ///
    /// Propagates engine contract violations and candle failures; neither
    /// is expected in a correctly configured run.
    pub fn run_episode(&mut self) -> Result<EpisodeOutcome, DqnError> {
        self.shoe
            .reshuffle_if_needed(self.game.reshuffle_penetration, &mut self.rng);

        let reward = self.play_table_round(true, true)?;

        let mut losses = Vec::new();
        if self.store.len() >= self.config.warmup {
            for _ in 0..self.config.updates_per_episode {
                losses.push(self.train_step()?);
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let loss = if losses.is_empty() {
            None
        } else {
            Some(losses.iter().sum::<f32>() / losses.len() as f32)
        };
        Ok(EpisodeOutcome { reward, loss })
    }

    /// Play `n_hands` greedily (no exploration, no transition logging) and
    /// return the mean reward. Used for periodic progress measurement.
    pub fn evaluate(&mut self, n_hands: u32) -> Result<f32, DqnError> {
        let mut total = 0.0;
        for _ in 0..n_hands {
            self.shoe
                .reshuffle_if_needed(self.game.reshuffle_penetration, &mut self.rng);
            total += self.play_table_round(false, false)?;
        }
        #[allow(clippy::cast_precision_loss)]
        Ok(total / n_hands as f32)
    }

    /// Gradient steps taken so far.
    #[must_use]
    pub fn steps(&self) -> u32 {
        self.step_count
    }

    /// Transitions currently stored.
    #[must_use]
    pub fn replay_len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn policy(&self) -> &DuelingNet {
        &self.policy
    }

    #[must_use]
    pub fn encoder(&self) -> &StateEncoder {
        &self.encoder
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Save the policy network parameters as a safetensors checkpoint.
    ///
    /// # Errors
    ///
    /// Returns a candle error if serialization fails.
    pub fn save_weights<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), DqnError> {
        self.policy_vars.save(path)?;
        Ok(())
    }

    /// Load policy parameters from a safetensors checkpoint and sync the
    /// target network to match.
    ///
    /// # Errors
    ///
    /// Returns a candle error if the file is missing or shapes mismatch.
    pub fn load_weights<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<(), DqnError> {
        self.policy_vars.load(path)?;
        self.sync_target()
    }
}

// ---------------------------------------------------------------------------
// Episode rollout
// ---------------------------------------------------------------------------

impl DqnTrainer {
    /// Deal a full table round: dealer (hole card face-down), fixed-strategy
    /// opponents who play out first, then the agent's hand end-to-end.
    fn play_table_round(&mut self, log: bool, explore: bool) -> Result<f32, DqnError> {
        let up = self.shoe.draw_revealed()?;
        let hole = self.shoe.draw_hole()?;
        let dealer = Hand::of(&[up, hole]);

        for style in self.game.opponents.clone() {
            let mut hand = Hand::of(&[self.shoe.draw_revealed()?, self.shoe.draw_revealed()?]);
            play_opponent(style, &mut hand, &mut self.shoe)?;
        }

        let agent = Hand::of(&[self.shoe.draw_revealed()?, self.shoe.draw_revealed()?]);
        let mut round = Round::new(agent, dealer, self.game.step_budget);

        // Natural short-circuit: no decision point, so nothing is logged.
        if let Some(reward) = round.check_naturals(&mut self.shoe) {
            return Ok(self.shape_reward(reward));
        }

        self.play_round(round, log, explore)
    }

    /// Play one round to completion, logging one transition per decision.
    /// Split sub-rounds recurse (the engine has already disabled further
    /// splitting) and the split decision itself is logged with the mean of
    /// the two sub-round rewards.
    fn play_round(&mut self, mut round: Round, log: bool, explore: bool) -> Result<f32, DqnError> {
        loop {
            let bin = self.shoe.true_count_bin(self.game.count_bins);
            let state_vec = self.encoder.encode(round.player(), round.dealer_upcard(), bin);
            let action = self.select_action(&state_vec, explore)?;

            match round.step(action, &mut self.shoe)? {
                StepOutcome::Continue => {
                    let next_bin = self.shoe.true_count_bin(self.game.count_bins);
                    let next_vec =
                        self.encoder
                            .encode(round.player(), round.dealer_upcard(), next_bin);
                    self.log_transition(log, state_vec, action, 0.0, next_vec, false);
                }
                StepOutcome::Terminal(raw) => {
                    let reward = self.shape_reward(raw);
                    self.log_transition(log, state_vec, action, reward, [0.0; STATE_DIM], true);
                    return Ok(reward);
                }
                StepOutcome::Split(left, right) => {
                    let left_reward = self.play_round(left, log, explore)?;
                    let right_reward = self.play_round(right, log, explore)?;
                    let reward = (left_reward + right_reward) / 2.0;
                    self.log_transition(log, state_vec, action, reward, [0.0; STATE_DIM], true);
                    return Ok(reward);
                }
            }
        }
    }

    /// Pick an action for the encoded state: epsilon-greedy or greedy over
    /// the (possibly noisy) policy network. Non-finite Q-values fall back
    /// to a uniform-random action rather than poisoning the rollout.
    fn select_action(
        &mut self,
        state_vec: &[f32; STATE_DIM],
        explore: bool,
    ) -> Result<Action, DqnError> {
        if explore {
            let epsilon = self.config.exploration.epsilon_at(self.step_count);
            if epsilon > 0.0 && self.rng.random::<f64>() < epsilon {
                return Ok(self.random_action());
            }
        }

        let mode = if explore && self.policy.is_noisy() {
            RunMode::Train
        } else {
            RunMode::Eval
        };
        let input = Tensor::from_slice(state_vec, (1, STATE_DIM), &self.device)?;
        let q = self
            .policy
            .forward(&input, mode)?
            .squeeze(0)?
            .to_vec1::<f32>()?;

        if q.iter().any(|v| !v.is_finite()) {
            warn!("non-finite Q-values at inference; falling back to random action");
            return Ok(self.random_action());
        }

        let best = q
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(i, _)| i);
        Ok(Action::from_index(best).unwrap_or(Action::Stand))
    }

    fn random_action(&mut self) -> Action {
        let index = self.rng.random_range(0..Action::COUNT);
        Action::from_index(index).unwrap_or(Action::Stand)
    }

    /// Optional clipping to [-1, 1], then the configured scale.
    #[allow(clippy::cast_possible_truncation)]
    fn shape_reward(&self, raw: f32) -> f32 {
        let clipped = if self.config.clip_rewards {
            raw.clamp(-1.0, 1.0)
        } else {
            raw
        };
        clipped * self.config.reward_scale as f32
    }

    fn log_transition(
        &mut self,
        log: bool,
        state: [f32; STATE_DIM],
        action: Action,
        reward: f32,
        next_state: [f32; STATE_DIM],
        done: bool,
    ) {
        if !log {
            return;
        }
        debug_assert!(reward.is_finite(), "rewards must be finite");
        #[allow(clippy::cast_possible_truncation)]
        self.store.push(Transition {
            state,
            action: action.index() as u8,
            reward,
            next_state,
            done,
        });
    }
}

// ---------------------------------------------------------------------------
// Gradient step
// ---------------------------------------------------------------------------

impl DqnTrainer {
    /// One batched Double-DQN update. Returns the scalar loss.
    fn train_step(&mut self) -> Result<f32, DqnError> {
        let batch = self.sample_batch()?;
        let b = batch.len;

        let states = Tensor::from_vec(batch.states, (b, STATE_DIM), &self.device)?;
        let next_states = Tensor::from_vec(batch.next_states, (b, STATE_DIM), &self.device)?;
        let actions = Tensor::from_vec(batch.actions, (b, 1), &self.device)?;
        let rewards = Tensor::from_vec(batch.rewards, (b, 1), &self.device)?;
        let not_done = Tensor::from_vec(batch.not_done, (b, 1), &self.device)?;

        // Double-DQN target: the policy net picks the next action, the
        // frozen target net values it.
        let next_actions = self
            .policy
            .forward(&next_states, RunMode::Eval)?
            .argmax_keepdim(1)?;
        let next_q = self
            .target
            .forward(&next_states, RunMode::Eval)?
            .gather(&next_actions, 1)?;
        let discounted = (next_q * self.config.gamma)?.mul(&not_done)?;
        let targets = rewards.add(&discounted)?.detach();

        let mode = if self.policy.is_noisy() {
            RunMode::Train
        } else {
            RunMode::Eval
        };
        let predicted = self.policy.forward(&states, mode)?.gather(&actions, 1)?;

        let td_error = predicted.sub(&targets)?;
        let elementwise = smooth_l1(&td_error)?;
        let loss = match &batch.weights {
            Some(weights) => {
                let w = Tensor::from_vec(weights.clone(), (b, 1), &self.device)?;
                elementwise.mul(&w)?.mean_all()?
            }
            None => elementwise.mean_all()?,
        };

        let mut grads = loss.backward()?;
        let vars = self.policy_vars.all_vars();
        clip_grad_norm(&mut grads, &vars, self.config.grad_clip_norm)?;
        self.optimizer.step(&grads)?;

        if let Some(indices) = &batch.indices {
            let td_abs: Vec<f32> = td_error.abs()?.squeeze(1)?.to_vec1::<f32>()?;
            if let Store::Prioritized(store) = &mut self.store {
                store.update_priorities(indices, &td_abs);
            }
        }

        self.step_count += 1;

        if self.policy.is_noisy() {
            self.policy.reset_noise(&mut self.rng)?;
            self.target.reset_noise(&mut self.rng)?;
        }
        if self.step_count % self.config.target_sync_steps == 0 {
            info!("syncing target network at step {}", self.step_count);
            self.sync_target()?;
        }

        Ok(loss.to_scalar::<f32>()?)
    }

    /// Draw a batch from whichever store is configured, flattening it into
    /// owned columnar vectors.
    fn sample_batch(&mut self) -> Result<FlatBatch, DqnError> {
        let beta = self.config.per.beta_at(self.step_count);
        let batch_size = self.config.batch_size;
        match &self.store {
            Store::Uniform(store) => {
                let transitions = store.sample(batch_size, &mut self.rng)?;
                Ok(FlatBatch::from_transitions(&transitions, None, None))
            }
            Store::Prioritized(store) => {
                let batch = store.sample(batch_size, beta, &mut self.rng)?;
                Ok(FlatBatch::from_transitions(
                    &batch.transitions,
                    Some(batch.indices),
                    Some(batch.weights),
                ))
            }
        }
    }

    /// Hard-copy every policy parameter into the same-named target
    /// parameter.
    fn sync_target(&mut self) -> Result<(), DqnError> {
        let src = self.policy_vars.data().lock().unwrap();
        let dst = self.target_vars.data().lock().unwrap();
        for (name, var) in src.iter() {
            let Some(target_var) = dst.get(name) else {
                return Err(DqnError::Config(format!(
                    "target network is missing parameter {name}"
                )));
            };
            target_var.set(var.as_tensor())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Batch flattening
// ---------------------------------------------------------------------------

/// A sampled batch in columnar form, ready for tensor construction.
struct FlatBatch {
    len: usize,
    states: Vec<f32>,
    next_states: Vec<f32>,
    actions: Vec<u32>,
    rewards: Vec<f32>,
    not_done: Vec<f32>,
    indices: Option<Vec<usize>>,
    weights: Option<Vec<f32>>,
}

impl FlatBatch {
    fn from_transitions(
        transitions: &[&Transition],
        indices: Option<Vec<usize>>,
        weights: Option<Vec<f32>>,
    ) -> Self {
        let len = transitions.len();
        let mut states = Vec::with_capacity(len * STATE_DIM);
        let mut next_states = Vec::with_capacity(len * STATE_DIM);
        let mut actions = Vec::with_capacity(len);
        let mut rewards = Vec::with_capacity(len);
        let mut not_done = Vec::with_capacity(len);

        for t in transitions {
            states.extend_from_slice(&t.state);
            next_states.extend_from_slice(&t.next_state);
            actions.push(u32::from(t.action));
            rewards.push(t.reward);
            not_done.push(if t.done { 0.0 } else { 1.0 });
        }

        Self {
            len,
            states,
            next_states,
            actions,
            rewards,
            not_done,
            indices,
            weights,
        }
    }
}

// ---------------------------------------------------------------------------
// Store dispatch
// ---------------------------------------------------------------------------

/// Uniform or prioritized experience store.
enum Store {
    Uniform(ReplayBuffer),
    Prioritized(PrioritizedReplay),
}

impl Store {
    fn push(&mut self, transition: Transition) {
        match self {
            Self::Uniform(store) => store.push(transition),
            Self::Prioritized(store) => store.push(transition),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Uniform(store) => store.len(),
            Self::Prioritized(store) => store.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loss and gradient helpers
// ---------------------------------------------------------------------------

/// Element-wise Smooth-L1 (Huber, delta = 1): quadratic inside the unit
/// interval, linear outside.
fn smooth_l1(diff: &Tensor) -> Result<Tensor, candle_core::Error> {
    let abs = diff.abs()?;
    let quadratic = (diff.sqr()? * 0.5)?;
    let linear = abs.affine(1.0, -0.5)?;
    abs.lt(1.0f32)?.where_cond(&quadratic, &linear)
}

/// Clip gradients in a `GradStore` to `max_norm` using global L2 scaling.
fn clip_grad_norm(
    grads: &mut GradStore,
    vars: &[Var],
    max_norm: f64,
) -> Result<(), candle_core::Error> {
    let mut total_sq = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let norm_sq = grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
            total_sq += f64::from(norm_sq);
        }
    }
    let total_norm = total_sq.sqrt();
    if total_norm <= max_norm {
        return Ok(());
    }
    let scale = max_norm / total_norm;
    for var in vars {
        if let Some(grad) = grads.remove(var.as_tensor()) {
            let scaled = (&grad * scale)?;
            grads.insert(var.as_tensor(), scaled);
        }
    }
    Ok(())
}

fn build_net(
    varmap: &VarMap,
    config: &DqnConfig,
    noisy: bool,
    sigma_init: f64,
    device: &Device,
) -> Result<DuelingNet, candle_core::Error> {
    let vs = VarBuilder::from_varmap(varmap, DType::F32, device);
    DuelingNet::new(
        STATE_DIM,
        Action::COUNT,
        config.hidden_dim,
        noisy,
        sigma_init,
        &vs,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
