use anyhow::{Context, Result};
use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::path::Path;

use crate::action::Action;
use crate::agent::Learner;
use crate::{Features, OBS_DIM};

// =============================================================================
// Hyperparameters
// =============================================================================

pub struct DeepQConfig {
    pub hidden_size: usize,
    pub gamma: f64,
    pub epsilon_start: f64,
    pub epsilon_end: f64,
    /// Multiplicative per-episode decay.
    pub epsilon_decay: f64,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub tau: f64,
    pub max_grad_norm: f64,
    pub replay_capacity: usize,
    pub batch_size: usize,
    pub learn_start: usize,
    pub train_freq: u64,
}

impl Default for DeepQConfig {
    fn default() -> Self {
        Self {
            hidden_size: 256,
            gamma: 0.99,
            epsilon_start: 1.0,
            epsilon_end: 0.05,
            epsilon_decay: 0.995,
            learning_rate: 1e-4,
            weight_decay: 1e-5,
            tau: 0.005,
            max_grad_norm: 10.0,
            replay_capacity: 50_000,
            batch_size: 64,
            learn_start: 500,
            train_freq: 4,
        }
    }
}

// =============================================================================
// Q-Network (candle)
// =============================================================================

/// Two hidden layers: OBS_DIM features → hidden → hidden/2 → Action::COUNT
/// Q-values.
struct QNet {
    fc1: Linear,
    fc2: Linear,
    out: Linear,
}

impl QNet {
    fn new(vs: VarBuilder, hidden: usize) -> Result<Self> {
        let fc1 = candle_nn::linear(OBS_DIM, hidden, vs.pp("fc1"))?;
        let fc2 = candle_nn::linear(hidden, hidden / 2, vs.pp("fc2"))?;
        let out = candle_nn::linear(hidden / 2, Action::COUNT, vs.pp("out"))?;
        Ok(Self { fc1, fc2, out })
    }

    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.fc1.forward(x)?.relu()?;
        let h = self.fc2.forward(&h)?.relu()?;
        self.out.forward(&h)
    }
}

// =============================================================================
// Replay Buffer
// =============================================================================

#[derive(Clone)]
struct Transition {
    state: Features,
    action: usize,
    reward: f32,
    next_state: Features,
    done: bool,
}

struct ReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, t: Transition) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(t);
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Sample a random batch, return tensors ready for training.
    fn sample(&self, batch_size: usize, dev: &Device, rng: &mut SmallRng) -> Result<BatchTensors> {
        let len = self.buffer.len();
        assert!(len >= batch_size);

        let mut states = Vec::with_capacity(batch_size * OBS_DIM);
        let mut actions = Vec::with_capacity(batch_size);
        let mut rewards = Vec::with_capacity(batch_size);
        let mut next_states = Vec::with_capacity(batch_size * OBS_DIM);
        let mut not_dones = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            let idx = rng.random_range(0..len);
            let t = &self.buffer[idx];
            states.extend_from_slice(&t.state);
            actions.push(t.action as i64);
            rewards.push(t.reward);
            next_states.extend_from_slice(&t.next_state);
            not_dones.push(if t.done { 0.0f32 } else { 1.0f32 });
        }

        Ok(BatchTensors {
            states: Tensor::from_vec(states, (batch_size, OBS_DIM), dev)?,
            actions: Tensor::from_vec(actions, batch_size, dev)?,
            rewards: Tensor::from_vec(rewards, batch_size, dev)?,
            next_states: Tensor::from_vec(next_states, (batch_size, OBS_DIM), dev)?,
            not_dones: Tensor::from_vec(not_dones, batch_size, dev)?,
        })
    }
}

struct BatchTensors {
    states: Tensor,
    actions: Tensor,
    rewards: Tensor,
    next_states: Tensor,
    not_dones: Tensor,
}

fn clip_gradients(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<()> {
    if max_norm <= 0.0 {
        return Ok(());
    }
    let mut total_norm_sq = 0.0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            total_norm_sq += g.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let total_norm = total_norm_sq.sqrt();
    if total_norm > max_norm {
        let clip_coef = max_norm / (total_norm + 1e-6);
        for var in vars {
            if let Some(g) = grads.get(var.as_tensor()) {
                let clipped = (g * clip_coef)?;
                grads.insert(var.as_tensor(), clipped);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Deep-Q Agent
// =============================================================================

pub struct DeepQAgent {
    online_varmap: VarMap,
    target_varmap: VarMap,
    online_net: QNet,
    target_net: QNet,
    optimizer: AdamW,
    device: Device,
    gamma: f64,
    epsilon: f64,
    epsilon_end: f64,
    epsilon_decay: f64,
    tau: f64,
    max_grad_norm: f64,
    exploration_scale: f64,
    replay: ReplayBuffer,
    batch_size: usize,
    learn_start: usize,
    train_freq: u64,
    steps: u64,
    rng: SmallRng,
}

impl DeepQAgent {
    pub fn new(config: DeepQConfig, seed: u64) -> Result<Self> {
        let device = Device::Cpu;
        let online_varmap = VarMap::new();
        let target_varmap = VarMap::new();

        let online_vb = VarBuilder::from_varmap(&online_varmap, DType::F32, &device);
        let target_vb = VarBuilder::from_varmap(&target_varmap, DType::F32, &device);
        let online_net = QNet::new(online_vb, config.hidden_size)?;
        let target_net = QNet::new(target_vb, config.hidden_size)?;

        let opt_params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = AdamW::new(online_varmap.all_vars(), opt_params)?;

        let mut agent = Self {
            online_varmap,
            target_varmap,
            online_net,
            target_net,
            optimizer,
            device,
            gamma: config.gamma,
            epsilon: config.epsilon_start,
            epsilon_end: config.epsilon_end,
            epsilon_decay: config.epsilon_decay,
            tau: config.tau,
            max_grad_norm: config.max_grad_norm,
            exploration_scale: 1.0,
            replay: ReplayBuffer::new(config.replay_capacity),
            batch_size: config.batch_size,
            learn_start: config.learn_start,
            train_freq: config.train_freq,
            steps: 0,
            rng: SmallRng::seed_from_u64(seed),
        };
        agent.hard_update_target()?;
        Ok(agent)
    }

    fn effective_epsilon(&self) -> f64 {
        (self.epsilon * self.exploration_scale).clamp(0.0, 1.0)
    }

    fn train_step(&mut self) -> Result<()> {
        if self.replay.len() < self.learn_start.max(self.batch_size) {
            return Ok(());
        }
        self.steps += 1;
        if !self.steps.is_multiple_of(self.train_freq) {
            return Ok(());
        }

        let batch = self
            .replay
            .sample(self.batch_size, &self.device, &mut self.rng)?;

        // Online net: Q(s, a) for the actions we actually took.
        let q_all = self.online_net.forward(&batch.states)?;
        let actions_unsqueezed = batch.actions.unsqueeze(1)?;
        let q_values = q_all.gather(&actions_unsqueezed, 1)?.squeeze(1)?;

        // Double-DQN target: select with online, evaluate with target.
        let next_q_online = self.online_net.forward(&batch.next_states)?;
        let best_next = next_q_online.argmax(candle_core::D::Minus1)?.unsqueeze(1)?;
        let next_q_target = self.target_net.forward(&batch.next_states)?;
        let next_q = next_q_target
            .gather(&best_next.to_dtype(DType::I64)?, 1)?
            .squeeze(1)?;

        let discounted = next_q.affine(self.gamma, 0.0)?;
        let target = batch.rewards.add(&discounted.mul(&batch.not_dones)?)?;

        // Huber loss: where |d| < 1: 0.5*d^2, else |d| - 0.5.
        let diff = q_values.sub(&target.detach())?;
        let abs_diff = diff.abs()?;
        let ones = Tensor::ones_like(&abs_diff)?;
        let loss = abs_diff
            .lt(&ones)?
            .where_cond(
                &(diff.sqr()?.affine(0.5, 0.0)?),
                &(abs_diff.affine(1.0, -0.5)?),
            )?
            .mean_all()?;

        let mut grads = loss.backward()?;
        let vars = self.online_varmap.all_vars();
        clip_gradients(&mut grads, &vars, self.max_grad_norm)?;
        self.optimizer.step(&grads)?;

        self.soft_update_target()?;
        Ok(())
    }

    fn hard_update_target(&mut self) -> Result<()> {
        let online_data = self
            .online_varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("Failed to lock online varmap for hard update"))?;
        let mut target_data = self
            .target_varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("Failed to lock target varmap for hard update"))?;
        for (name, target_v) in target_data.iter_mut() {
            let online_v = online_data.get(name).ok_or_else(|| {
                anyhow::anyhow!("Missing var {name} in online varmap during hard update")
            })?;
            target_v.set(&online_v.as_tensor().detach())?;
        }
        Ok(())
    }

    /// Soft update: target = tau * online + (1-tau) * target.
    fn soft_update_target(&mut self) -> Result<()> {
        let tau = self.tau;
        let online_data = self
            .online_varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("Failed to lock online varmap for soft update"))?;
        let mut target_data = self
            .target_varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("Failed to lock target varmap for soft update"))?;
        for (name, target_v) in target_data.iter_mut() {
            let online_v = online_data.get(name).ok_or_else(|| {
                anyhow::anyhow!("Missing var {name} in online varmap during soft update")
            })?;
            let new_val = online_v
                .as_tensor()
                .affine(tau, 0.0)?
                .add(&target_v.as_tensor().affine(1.0 - tau, 0.0)?)?;
            target_v.set(&new_val.detach())?;
        }
        Ok(())
    }
}

impl Learner for DeepQAgent {
    fn choose_action(&mut self, obs: &Features) -> Result<usize> {
        if self.rng.random::<f64>() < self.effective_epsilon() {
            return Ok(self.rng.random_range(0..Action::COUNT));
        }
        let s = Tensor::from_slice(obs, (1, OBS_DIM), &self.device)?;
        let q = self.online_net.forward(&s)?;
        let action = q
            .argmax(candle_core::D::Minus1)?
            .squeeze(0)?
            .to_scalar::<u32>()? as usize;
        Ok(action)
    }

    fn update(
        &mut self,
        obs: &Features,
        action: usize,
        reward: f64,
        next: &Features,
        done: bool,
    ) -> Result<()> {
        self.replay.push(Transition {
            state: *obs,
            action,
            reward: reward as f32,
            next_state: *next,
            done,
        });
        self.train_step()
    }

    fn end_episode(&mut self) {
        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_end);
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.online_varmap
            .save(path)
            .with_context(|| format!("Failed to save weights: {}", path.display()))?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        self.online_varmap
            .load(path)
            .with_context(|| format!("Failed to load weights: {}", path.display()))?;
        self.hard_update_target()?;
        Ok(())
    }

    fn set_exploration_scale(&mut self, scale: f64) {
        self.exploration_scale = scale;
    }

    fn exploration(&self) -> f64 {
        self.effective_epsilon()
    }
}
