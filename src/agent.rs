use anyhow::{Context, Result};
use clap::ValueEnum;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use crate::action::Action;
use crate::obs::quadrant_offset;
use crate::obs_layout;
use crate::Features;

// =============================================================================
// Algorithm Roster
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Algo {
    #[value(name = "q_learning")]
    QLearning,
    #[value(name = "sarsa")]
    Sarsa,
    #[value(name = "expected_sarsa")]
    ExpectedSarsa,
    #[value(name = "double_q")]
    DoubleQ,
    #[value(name = "monte_carlo")]
    MonteCarlo,
    #[value(name = "random")]
    Random,
    #[value(name = "deep_q")]
    DeepQ,
}

impl Algo {
    /// Fixed roster trained side by side by the launcher, in port-rank order.
    pub const ROSTER: [Algo; 6] = [
        Algo::QLearning,
        Algo::Sarsa,
        Algo::ExpectedSarsa,
        Algo::DoubleQ,
        Algo::MonteCarlo,
        Algo::Random,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Algo::QLearning => "q_learning",
            Algo::Sarsa => "sarsa",
            Algo::ExpectedSarsa => "expected_sarsa",
            Algo::DoubleQ => "double_q",
            Algo::MonteCarlo => "monte_carlo",
            Algo::Random => "random",
            Algo::DeepQ => "deep_q",
        }
    }

    /// Extension of the weight artifact this algorithm saves.
    pub fn model_extension(self) -> &'static str {
        match self {
            Algo::DeepQ => "safetensors",
            _ => "bin",
        }
    }
}

impl std::fmt::Display for Algo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Build the learner for an algorithm. Deep-Q construction can fail when the
/// tensor device is unavailable.
pub fn make_learner(algo: Algo, seed: u64) -> Result<Box<dyn Learner>> {
    Ok(match algo {
        Algo::Random => Box::new(RandomAgent::new(seed)),
        Algo::DeepQ => Box::new(crate::dqn::DeepQAgent::new(
            crate::dqn::DeepQConfig::default(),
            seed,
        )?),
        tabular => Box::new(TabularAgent::new(tabular, seed)),
    })
}

// =============================================================================
// Learner Interface
// =============================================================================

pub trait Learner {
    fn choose_action(&mut self, obs: &Features) -> Result<usize>;
    fn update(
        &mut self,
        obs: &Features,
        action: usize,
        reward: f64,
        next: &Features,
        done: bool,
    ) -> Result<()>;
    /// Episode boundary: flush traces, decay exploration.
    fn end_episode(&mut self);
    fn save(&self, path: &Path) -> Result<()>;
    fn load(&mut self, path: &Path) -> Result<()>;
    /// Stage adaptation hint; learners may ignore it.
    fn set_exploration_scale(&mut self, scale: f64);
    fn exploration(&self) -> f64;
}

// =============================================================================
// Discretized State Key
// =============================================================================

/// (wood, stone, iron, diamond, tool bits, front occupancy, yaw bucket,
/// pitch bucket) — coarse enough that tables stay small, fine enough to
/// separate the decisions that matter per stage.
pub type StateKey = (u8, u8, u8, u8, u8, u8, u8, u8);

pub fn state_key(obs: &Features) -> StateKey {
    let count = |i: usize, cap: f32| obs[obs_layout::COUNTS + i].clamp(0.0, cap) as u8;
    let wood = count(0, 3.0);
    let stone = count(1, 3.0);
    let iron = count(2, 3.0);
    let diamond = count(3, 1.0);

    let mut tools = 0u8;
    for t in 0..5 {
        if obs[obs_layout::TOOLS + t] > 0.5 {
            tools |= 1 << t;
        }
    }

    // The projector stores the facing quadrant, not raw degrees.
    let yaw_bucket = (obs[obs_layout::POSE + 3] as u8) % 4;
    let pitch = obs[obs_layout::POSE + 4];
    let pitch_bucket = if pitch < -5.0 {
        0
    } else if pitch > 5.0 {
        2
    } else {
        1u8
    };

    // Occupancy of the faced cell at feet and head height.
    let (dx, dz) = quadrant_offset(yaw_bucket);
    let cell = |layer: usize| {
        let ix = (dx + 2) as usize + 5 * (dz + 2) as usize + 25 * layer;
        obs[obs_layout::GRID + ix] > 0.5
    };
    let front = cell(1) as u8 | (cell(2) as u8) << 1;

    (wood, stone, iron, diamond, tools, front, yaw_bucket, pitch_bucket)
}

// =============================================================================
// Tabular Agents
// =============================================================================

type QTable = HashMap<StateKey, [f64; Action::COUNT]>;

#[derive(Serialize, Deserialize)]
struct TabularSnapshot {
    q: QTable,
    q2: QTable,
    epsilon: f64,
}

pub struct TabularAgent {
    algo: Algo,
    q: QTable,
    /// Second table, used by Double-Q only.
    q2: QTable,
    pub alpha: f64,
    pub gamma: f64,
    epsilon: f64,
    epsilon_min: f64,
    epsilon_decay: f64,
    exploration_scale: f64,
    /// Action committed by the last on-policy update, consumed by the next
    /// `choose_action`.
    pending_action: Option<usize>,
    /// (state, action, reward) trace for first-visit Monte Carlo.
    trace: Vec<(StateKey, usize, f64)>,
    rng: SmallRng,
}

impl TabularAgent {
    pub fn new(algo: Algo, seed: u64) -> Self {
        debug_assert!(!matches!(algo, Algo::Random | Algo::DeepQ));
        Self {
            algo,
            q: HashMap::new(),
            q2: HashMap::new(),
            alpha: 0.1,
            gamma: 0.99,
            epsilon: 1.0,
            epsilon_min: 0.05,
            epsilon_decay: 0.995,
            exploration_scale: 1.0,
            pending_action: None,
            trace: Vec::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn table_len(&self) -> usize {
        self.q.len()
    }

    fn effective_epsilon(&self) -> f64 {
        (self.epsilon * self.exploration_scale).clamp(0.0, 1.0)
    }

    fn row(table: &QTable, key: &StateKey) -> [f64; Action::COUNT] {
        table.get(key).copied().unwrap_or([0.0; Action::COUNT])
    }

    /// Row seen by the policy: single table, or the sum for Double-Q.
    fn policy_row(&self, key: &StateKey) -> [f64; Action::COUNT] {
        let mut row = Self::row(&self.q, key);
        if self.algo == Algo::DoubleQ {
            let other = Self::row(&self.q2, key);
            for (a, b) in row.iter_mut().zip(other) {
                *a += b;
            }
        }
        row
    }

    fn argmax(row: &[f64; Action::COUNT]) -> usize {
        row.iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn policy_action(&mut self, key: &StateKey) -> usize {
        if self.rng.random::<f64>() < self.effective_epsilon() {
            self.rng.random_range(0..Action::COUNT)
        } else {
            Self::argmax(&self.policy_row(key))
        }
    }
}

impl Learner for TabularAgent {
    fn choose_action(&mut self, obs: &Features) -> Result<usize> {
        if let Some(a) = self.pending_action.take() {
            return Ok(a);
        }
        let key = state_key(obs);
        Ok(self.policy_action(&key))
    }

    fn update(
        &mut self,
        obs: &Features,
        action: usize,
        reward: f64,
        next: &Features,
        done: bool,
    ) -> Result<()> {
        let s = state_key(obs);
        let s_next = state_key(next);

        match self.algo {
            Algo::QLearning => {
                let best_next = if done {
                    0.0
                } else {
                    let row = Self::row(&self.q, &s_next);
                    row[Self::argmax(&row)]
                };
                let row = self.q.entry(s).or_insert([0.0; Action::COUNT]);
                row[action] += self.alpha * (reward + self.gamma * best_next - row[action]);
            }
            Algo::Sarsa => {
                let next_q = if done {
                    0.0
                } else {
                    let a_next = self.policy_action(&s_next);
                    self.pending_action = Some(a_next);
                    Self::row(&self.q, &s_next)[a_next]
                };
                let row = self.q.entry(s).or_insert([0.0; Action::COUNT]);
                row[action] += self.alpha * (reward + self.gamma * next_q - row[action]);
            }
            Algo::ExpectedSarsa => {
                let expected = if done {
                    0.0
                } else {
                    let row = Self::row(&self.q, &s_next);
                    let eps = self.effective_epsilon();
                    let best = row[Self::argmax(&row)];
                    let mean: f64 = row.iter().sum::<f64>() / Action::COUNT as f64;
                    (1.0 - eps) * best + eps * mean
                };
                let row = self.q.entry(s).or_insert([0.0; Action::COUNT]);
                row[action] += self.alpha * (reward + self.gamma * expected - row[action]);
            }
            Algo::DoubleQ => {
                // Select with one table, evaluate with the other.
                let flip = self.rng.random::<bool>();
                let next_q = if done {
                    0.0
                } else if flip {
                    let select = Self::row(&self.q, &s_next);
                    Self::row(&self.q2, &s_next)[Self::argmax(&select)]
                } else {
                    let select = Self::row(&self.q2, &s_next);
                    Self::row(&self.q, &s_next)[Self::argmax(&select)]
                };
                let table = if flip { &mut self.q } else { &mut self.q2 };
                let row = table.entry(s).or_insert([0.0; Action::COUNT]);
                row[action] += self.alpha * (reward + self.gamma * next_q - row[action]);
            }
            Algo::MonteCarlo => {
                self.trace.push((s, action, reward));
            }
            Algo::Random | Algo::DeepQ => unreachable!("not tabular"),
        }
        Ok(())
    }

    fn end_episode(&mut self) {
        if self.algo == Algo::MonteCarlo {
            // Backward pass for returns, forward pass for first visits.
            let mut returns = vec![0.0; self.trace.len()];
            let mut g = 0.0;
            for (i, (_, _, r)) in self.trace.iter().enumerate().rev() {
                g = r + self.gamma * g;
                returns[i] = g;
            }
            let mut visited: HashSet<(StateKey, usize)> = HashSet::new();
            for ((s, a, _), g) in self.trace.iter().zip(returns) {
                if !visited.insert((*s, *a)) {
                    continue;
                }
                let row = self.q.entry(*s).or_insert([0.0; Action::COUNT]);
                row[*a] += self.alpha * (g - row[*a]);
            }
            self.trace.clear();
        }
        self.pending_action = None;
        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_min);
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let snapshot = TabularSnapshot {
            q: self.q.clone(),
            q2: self.q2.clone(),
            epsilon: self.epsilon,
        };
        let file = File::create(path)
            .with_context(|| format!("Failed to create model file: {}", path.display()))?;
        let writer = std::io::BufWriter::new(file);
        bincode::serialize_into(writer, &snapshot)?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open model file: {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let snapshot: TabularSnapshot = bincode::deserialize_from(reader)?;
        self.q = snapshot.q;
        self.q2 = snapshot.q2;
        self.epsilon = snapshot.epsilon;
        Ok(())
    }

    fn set_exploration_scale(&mut self, scale: f64) {
        self.exploration_scale = scale;
    }

    fn exploration(&self) -> f64 {
        self.effective_epsilon()
    }
}

// =============================================================================
// Uniform-Random Baseline
// =============================================================================

pub struct RandomAgent {
    rng: SmallRng,
}

impl RandomAgent {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Learner for RandomAgent {
    fn choose_action(&mut self, _obs: &Features) -> Result<usize> {
        Ok(self.rng.random_range(0..Action::COUNT))
    }

    fn update(&mut self, _: &Features, _: usize, _: f64, _: &Features, _: bool) -> Result<()> {
        Ok(())
    }

    fn end_episode(&mut self) {}

    /// The baseline has no parameters; it still writes an empty artifact so
    /// every roster member leaves one behind.
    fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, b"")
            .with_context(|| format!("Failed to write model file: {}", path.display()))
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        std::fs::metadata(path)
            .with_context(|| format!("Failed to open model file: {}", path.display()))?;
        Ok(())
    }

    fn set_exploration_scale(&mut self, _scale: f64) {}

    fn exploration(&self) -> f64 {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs::{project, GRID_NAME};
    use crate::stage::{BlockKind, StageSpec};
    use crate::OBS_DIM;
    use serde_json::json;

    fn obs_with(wood: f32, quadrant: f32) -> Features {
        let mut f = [0f32; OBS_DIM];
        f[obs_layout::COUNTS] = wood;
        f[obs_layout::POSE + 3] = quadrant;
        f
    }

    #[test]
    fn state_key_buckets_counts_and_pose() {
        let key = state_key(&obs_with(7.0, 2.0));
        assert_eq!(key.0, 3); // wood capped
        assert_eq!(key.6, 2); // north bucket
        assert_eq!(key.7, 1); // level pitch

        let mut f = obs_with(0.0, 2.0);
        f[obs_layout::TOOLS] = 1.0;
        f[obs_layout::TOOLS + 2] = 1.0;
        assert_eq!(state_key(&f).4, 0b101);
    }

    #[test]
    fn projected_spawn_yaw_keeps_the_front_cell_visible() {
        // Stone in the north feet cell, agent facing north (yaw 180).
        let mut grid = vec!["air".to_string(); 75];
        grid[2 + 5 + 25] = "stone".to_string();
        let snap = json!({
            "Yaw": 180.0, "Pitch": 0.0, "Life": 20.0,
            GRID_NAME: grid,
        });
        let (f, info) = project(Some(&snap), StageSpec::get(2));
        assert_eq!(info.front_cell(), BlockKind::Stone);

        let key = state_key(&f);
        assert_eq!(key.6, 2, "yaw bucket must match the faced quadrant");
        assert_eq!(key.5 & 1, 1, "feet-level front occupancy bit");
    }

    #[test]
    fn q_learning_moves_toward_target() {
        let mut agent = TabularAgent::new(Algo::QLearning, 1);
        agent.alpha = 0.5;
        let s = obs_with(0.0, 0.0);
        let s2 = obs_with(1.0, 0.0);

        agent.update(&s, 3, 10.0, &s2, true).unwrap();
        let key = state_key(&s);
        // Terminal target is the bare reward: 0 + 0.5 * (10 - 0).
        assert_eq!(TabularAgent::row(&agent.q, &key)[3], 5.0);

        agent.update(&s, 3, 10.0, &s2, true).unwrap();
        assert_eq!(TabularAgent::row(&agent.q, &key)[3], 7.5);
    }

    #[test]
    fn q_learning_bootstraps_from_best_next() {
        let mut agent = TabularAgent::new(Algo::QLearning, 1);
        agent.alpha = 1.0;
        agent.gamma = 0.9;
        let s = obs_with(0.0, 0.0);
        let s2 = obs_with(1.0, 0.0);

        // Seed the next state's best action.
        agent.update(&s2, 0, 10.0, &s, true).unwrap();
        agent.update(&s, 1, 1.0, &s2, false).unwrap();
        let key = state_key(&s);
        assert!((TabularAgent::row(&agent.q, &key)[1] - (1.0 + 0.9 * 10.0)).abs() < 1e-9);
    }

    #[test]
    fn sarsa_commits_the_updated_next_action() {
        let mut agent = TabularAgent::new(Algo::Sarsa, 1);
        // Greedy so the committed action is deterministic.
        agent.epsilon = 0.0;
        let s = obs_with(0.0, 0.0);
        let s2 = obs_with(1.0, 0.0);
        // Make action 5 the greedy pick in s2.
        agent.update(&s2, 5, 100.0, &s, true).unwrap();

        agent.update(&s, 0, 1.0, &s2, false).unwrap();
        assert_eq!(agent.choose_action(&s2).unwrap(), 5);
        // Pending action is consumed exactly once.
        assert!(agent.pending_action.is_none());
    }

    #[test]
    fn double_q_splits_updates_across_tables() {
        let mut agent = TabularAgent::new(Algo::DoubleQ, 1);
        let s = obs_with(0.0, 0.0);
        let s2 = obs_with(1.0, 0.0);
        for _ in 0..50 {
            agent.update(&s, 2, 1.0, &s2, true).unwrap();
        }
        assert!(!agent.q.is_empty());
        assert!(!agent.q2.is_empty());
    }

    #[test]
    fn monte_carlo_first_visit_returns() {
        let mut agent = TabularAgent::new(Algo::MonteCarlo, 1);
        agent.alpha = 1.0;
        agent.gamma = 1.0;
        let s = obs_with(0.0, 0.0);
        let s2 = obs_with(1.0, 0.0);

        // Same (state, action) twice: only the first visit counts.
        agent.update(&s, 0, 1.0, &s2, false).unwrap();
        agent.update(&s2, 1, 2.0, &s, false).unwrap();
        agent.update(&s, 0, 3.0, &s2, true).unwrap();
        agent.end_episode();

        let key = state_key(&s);
        // G from the first visit: 1 + 2 + 3.
        assert_eq!(TabularAgent::row(&agent.q, &key)[0], 6.0);
        assert!(agent.trace.is_empty());
    }

    #[test]
    fn exploration_decays_and_scales() {
        let mut agent = TabularAgent::new(Algo::QLearning, 1);
        let before = agent.exploration();
        agent.end_episode();
        assert!(agent.exploration() < before);
        agent.set_exploration_scale(0.5);
        assert!((agent.exploration() - agent.epsilon * 0.5).abs() < 1e-12);
    }

    #[test]
    fn tabular_save_load_roundtrip() {
        let path = std::env::temp_dir().join(format!("pickaxe-agent-{}.bin", std::process::id()));
        let mut agent = TabularAgent::new(Algo::QLearning, 1);
        let s = obs_with(0.0, 0.0);
        let s2 = obs_with(1.0, 0.0);
        agent.update(&s, 3, 10.0, &s2, true).unwrap();
        agent.save(&path).unwrap();

        let mut restored = TabularAgent::new(Algo::QLearning, 2);
        restored.load(&path).unwrap();
        assert_eq!(restored.q, agent.q);
        assert_eq!(restored.epsilon, agent.epsilon);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn random_baseline_leaves_an_artifact() {
        let path = std::env::temp_dir().join(format!("pickaxe-rand-{}.bin", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let agent = RandomAgent::new(1);
        agent.save(&path).unwrap();
        assert!(path.exists());

        let mut restored = RandomAgent::new(2);
        restored.load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(restored.load(&path).is_err());
    }
}
