//! Dueling value network with optional noisy heads.
//!
//! A shared trunk (two `Linear -> LayerNorm -> LeakyReLU` blocks) feeds a
//! scalar value head and a per-action advantage head; the output is
//! `value + (advantage - mean(advantage))`. The centering keeps the
//! decomposition identifiable: without it only the sum of the two heads is
//! meaningful and gradient scale drifts.
//!
//! Exploration is either epsilon-greedy over plain heads or factorized
//! Gaussian weight noise (Fortunato et al., 2017) in both heads. The two
//! are mutually exclusive; noisy mode pins epsilon to zero. Train/eval
//! behavior is an explicit [`RunMode`] threaded through `forward`, not
//! hidden object state.

use candle_core::{Device, Tensor};
use candle_nn::{layer_norm, linear, Init, LayerNorm, LayerNormConfig, Linear, Module, VarBuilder};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

/// Negative slope of the trunk nonlinearity.
const LEAKY_SLOPE: f64 = 0.01;

/// Whether a forward pass samples weight noise (training) or uses the mean
/// weights only (evaluation and export).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Train,
    Eval,
}

// ---------------------------------------------------------------------------
// Noisy linear layer
// ---------------------------------------------------------------------------

/// Linear layer with learned factorized Gaussian weight perturbations.
///
/// Parameters are the mu/sigma pairs; the epsilon buffers are resampled
/// externally on a fixed cadence via [`reset_noise`](Self::reset_noise)
/// and are not trained.
pub struct NoisyLinear {
    weight_mu: Tensor,
    weight_sigma: Tensor,
    bias_mu: Tensor,
    bias_sigma: Tensor,
    weight_eps: Tensor,
    bias_eps: Tensor,
    in_dim: usize,
    out_dim: usize,
    device: Device,
}

impl NoisyLinear {
    /// Create a noisy layer. Mu weights start uniform in
    /// `[-1/sqrt(in), 1/sqrt(in)]`; sigmas start at `sigma_init/sqrt(in)`.
    /// Epsilon buffers start at zero, so an un-reset layer behaves like its
    /// mean weights.
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        sigma_init: f64,
        vs: &VarBuilder,
    ) -> Result<Self, candle_core::Error> {
        #[allow(clippy::cast_precision_loss)]
        let bound = 1.0 / (in_dim as f64).sqrt();
        let sigma = sigma_init * bound;

        let weight_mu = vs.get_with_hints(
            (out_dim, in_dim),
            "weight_mu",
            Init::Uniform { lo: -bound, up: bound },
        )?;
        let weight_sigma =
            vs.get_with_hints((out_dim, in_dim), "weight_sigma", Init::Const(sigma))?;
        let bias_mu =
            vs.get_with_hints(out_dim, "bias_mu", Init::Uniform { lo: -bound, up: bound })?;
        let bias_sigma = vs.get_with_hints(out_dim, "bias_sigma", Init::Const(sigma))?;

        let device = vs.device().clone();
        let weight_eps = Tensor::zeros((out_dim, in_dim), candle_core::DType::F32, &device)?;
        let bias_eps = Tensor::zeros(out_dim, candle_core::DType::F32, &device)?;

        Ok(Self {
            weight_mu,
            weight_sigma,
            bias_mu,
            bias_sigma,
            weight_eps,
            bias_eps,
            in_dim,
            out_dim,
            device,
        })
    }

    /// Resample the factorized noise: independent vectors for the input and
    /// output dimensions, each passed through `sign(x) * sqrt(|x|)`, with
    /// the weight noise as their outer product.
    pub fn reset_noise(&mut self, rng: &mut StdRng) -> Result<(), candle_core::Error> {
        let eps_in = scaled_noise(self.in_dim, rng);
        let eps_out = scaled_noise(self.out_dim, rng);

        let mut outer = Vec::with_capacity(self.out_dim * self.in_dim);
        for &o in &eps_out {
            for &i in &eps_in {
                outer.push(o * i);
            }
        }
        self.weight_eps = Tensor::from_vec(outer, (self.out_dim, self.in_dim), &self.device)?;
        self.bias_eps = Tensor::from_vec(eps_out, self.out_dim, &self.device)?;
        Ok(())
    }

    fn forward(&self, x: &Tensor, mode: RunMode) -> Result<Tensor, candle_core::Error> {
        let layer = match mode {
            RunMode::Eval => Linear::new(self.weight_mu.clone(), Some(self.bias_mu.clone())),
            RunMode::Train => {
                let weight = self
                    .weight_mu
                    .add(&self.weight_sigma.mul(&self.weight_eps)?)?;
                let bias = self.bias_mu.add(&self.bias_sigma.mul(&self.bias_eps)?)?;
                Linear::new(weight, Some(bias))
            }
        };
        layer.forward(x)
    }
}

/// Sample `n` values from `sign(x) * sqrt(|x|)` of a standard normal.
fn scaled_noise(n: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..n)
        .map(|_| {
            let x: f32 = rng.sample(StandardNormal);
            x.signum() * x.abs().sqrt()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Output heads
// ---------------------------------------------------------------------------

/// Value/advantage head: plain linear under epsilon-greedy exploration,
/// noisy under NoisyNet exploration.
enum Head {
    Plain(Linear),
    Noisy(NoisyLinear),
}

impl Head {
    fn forward(&self, x: &Tensor, mode: RunMode) -> Result<Tensor, candle_core::Error> {
        match self {
            Self::Plain(layer) => layer.forward(x),
            Self::Noisy(layer) => layer.forward(x, mode),
        }
    }

    fn reset_noise(&mut self, rng: &mut StdRng) -> Result<(), candle_core::Error> {
        match self {
            Self::Plain(_) => Ok(()),
            Self::Noisy(layer) => layer.reset_noise(rng),
        }
    }
}

// ---------------------------------------------------------------------------
// Dueling network
// ---------------------------------------------------------------------------

/// Dueling MLP mapping a state vector to per-action value estimates.
pub struct DuelingNet {
    l1: Linear,
    ln1: LayerNorm,
    l2: Linear,
    ln2: LayerNorm,
    value: Head,
    adv: Head,
    noisy: bool,
}

impl DuelingNet {
    /// Create a network with random weights. `noisy` selects noisy heads;
    /// `sigma_init` is ignored for plain heads.
    pub fn new(
        state_dim: usize,
        num_actions: usize,
        hidden_dim: usize,
        noisy: bool,
        sigma_init: f64,
        vs: &VarBuilder,
    ) -> Result<Self, candle_core::Error> {
        let l1 = linear(state_dim, hidden_dim, vs.pp("l1"))?;
        let ln1 = layer_norm(hidden_dim, LayerNormConfig::default(), vs.pp("ln1"))?;
        let l2 = linear(hidden_dim, hidden_dim, vs.pp("l2"))?;
        let ln2 = layer_norm(hidden_dim, LayerNormConfig::default(), vs.pp("ln2"))?;

        let (value, adv) = if noisy {
            (
                Head::Noisy(NoisyLinear::new(hidden_dim, 1, sigma_init, &vs.pp("value"))?),
                Head::Noisy(NoisyLinear::new(
                    hidden_dim,
                    num_actions,
                    sigma_init,
                    &vs.pp("adv"),
                )?),
            )
        } else {
            (
                Head::Plain(linear(hidden_dim, 1, vs.pp("value"))?),
                Head::Plain(linear(hidden_dim, num_actions, vs.pp("adv"))?),
            )
        };

        Ok(Self {
            l1,
            ln1,
            l2,
            ln2,
            value,
            adv,
            noisy,
        })
    }

    /// Forward pass: `[B, state_dim]` to `[B, num_actions]` Q-values.
    pub fn forward(&self, x: &Tensor, mode: RunMode) -> Result<Tensor, candle_core::Error> {
        let h = leaky_relu(&self.ln1.forward(&self.l1.forward(x)?)?)?;
        let h = leaky_relu(&self.ln2.forward(&self.l2.forward(&h)?)?)?;

        let value = self.value.forward(&h, mode)?;
        let adv = self.adv.forward(&h, mode)?;
        let centered = adv.broadcast_sub(&adv.mean_keepdim(1)?)?;
        value.broadcast_add(&centered)
    }

    /// Resample both heads' noise. No-op for plain heads.
    pub fn reset_noise(&mut self, rng: &mut StdRng) -> Result<(), candle_core::Error> {
        self.value.reset_noise(rng)?;
        self.adv.reset_noise(rng)
    }

    #[must_use]
    pub fn is_noisy(&self) -> bool {
        self.noisy
    }
}

/// LeakyReLU with the trunk's fixed negative slope.
fn leaky_relu(x: &Tensor) -> Result<Tensor, candle_core::Error> {
    let scaled = (x * LEAKY_SLOPE)?;
    x.maximum(&scaled)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use rand::SeedableRng;

    const STATE_DIM: usize = 6;
    const ACTIONS: usize = 5;

    fn make_net(noisy: bool) -> (DuelingNet, VarMap) {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let net = DuelingNet::new(STATE_DIM, ACTIONS, 32, noisy, 0.5, &vs).unwrap();
        (net, varmap)
    }

    fn batch(rows: usize) -> Tensor {
        let data: Vec<f32> = (0..rows * STATE_DIM)
            .map(|i| (i % STATE_DIM) as f32 / STATE_DIM as f32)
            .collect();
        Tensor::from_vec(data, (rows, STATE_DIM), &Device::Cpu).unwrap()
    }

    #[test]
    fn output_shape_matches_actions() {
        let (net, _vm) = make_net(false);
        let out = net.forward(&batch(4), RunMode::Eval).unwrap();
        assert_eq!(out.dims(), &[4, ACTIONS]);
    }

    #[test]
    fn eval_forward_is_deterministic() {
        let (mut net, _vm) = make_net(true);
        let mut rng = StdRng::seed_from_u64(7);
        net.reset_noise(&mut rng).unwrap();

        let x = batch(3);
        let a = net.forward(&x, RunMode::Eval).unwrap().to_vec2::<f32>().unwrap();
        net.reset_noise(&mut rng).unwrap();
        let b = net.forward(&x, RunMode::Eval).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b, "eval mode must ignore resampled noise");
    }

    #[test]
    fn train_forward_changes_with_noise() {
        let (mut net, _vm) = make_net(true);
        let mut rng = StdRng::seed_from_u64(7);
        let x = batch(2);

        net.reset_noise(&mut rng).unwrap();
        let a = net.forward(&x, RunMode::Train).unwrap().to_vec2::<f32>().unwrap();
        net.reset_noise(&mut rng).unwrap();
        let b = net.forward(&x, RunMode::Train).unwrap().to_vec2::<f32>().unwrap();
        assert_ne!(a, b, "train mode must see resampled noise");
    }

    #[test]
    fn plain_net_ignores_reset_noise() {
        let (mut net, _vm) = make_net(false);
        let mut rng = StdRng::seed_from_u64(7);
        let x = batch(2);

        let a = net.forward(&x, RunMode::Train).unwrap().to_vec2::<f32>().unwrap();
        net.reset_noise(&mut rng).unwrap();
        let b = net.forward(&x, RunMode::Train).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
        assert!(!net.is_noisy());
    }

    #[test]
    fn zeroed_advantage_head_collapses_to_value() {
        // With the advantage head zeroed, centering removes nothing and
        // every action's Q-value equals the state value.
        let (net, varmap) = make_net(false);
        {
            let data = varmap.data().lock().unwrap();
            for name in ["adv.weight", "adv.bias"] {
                let var = data.get(name).unwrap();
                let zeros = Tensor::zeros(var.shape(), DType::F32, &Device::Cpu).unwrap();
                var.set(&zeros).unwrap();
            }
        }

        let out = net.forward(&batch(2), RunMode::Eval).unwrap();
        let rows = out.to_vec2::<f32>().unwrap();
        for row in rows {
            for &q in &row[1..] {
                assert!(
                    (q - row[0]).abs() < 1e-6,
                    "all actions should share the state value, got {row:?}"
                );
            }
        }
    }

    #[test]
    fn centered_output_mean_is_value() {
        // mean_a Q(s, a) == V(s): subtracting the advantage mean makes the
        // action-mean of the output recover the value head exactly.
        let (net, _vm) = make_net(false);
        let x = batch(3);
        let out = net.forward(&x, RunMode::Eval).unwrap();

        let h = leaky_relu(&net.ln1.forward(&net.l1.forward(&x).unwrap()).unwrap()).unwrap();
        let h = leaky_relu(&net.ln2.forward(&net.l2.forward(&h).unwrap()).unwrap()).unwrap();
        let value = net.value.forward(&h, RunMode::Eval).unwrap();

        let mean_q = out.mean_keepdim(1).unwrap().to_vec2::<f32>().unwrap();
        let values = value.to_vec2::<f32>().unwrap();
        for (m, v) in mean_q.iter().zip(values.iter()) {
            assert!((m[0] - v[0]).abs() < 1e-5, "mean Q {m:?} != value {v:?}");
        }
    }

    #[test]
    fn noisy_layer_noise_has_expected_shapes() {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mut layer = NoisyLinear::new(8, 3, 0.5, &vs).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        layer.reset_noise(&mut rng).unwrap();
        assert_eq!(layer.weight_eps.dims(), &[3, 8]);
        assert_eq!(layer.bias_eps.dims(), &[3]);
    }

    #[test]
    fn leaky_relu_behavior() {
        let x = Tensor::new(&[[-2.0f32, 0.0, 3.0]], &Device::Cpu).unwrap();
        let out = leaky_relu(&x).unwrap().to_vec2::<f32>().unwrap();
        assert!((out[0][0] + 0.02).abs() < 1e-7);
        assert_eq!(out[0][1], 0.0);
        assert_eq!(out[0][2], 3.0);
    }
}
