use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use crate::action::Action;
use crate::craft::{craft_request_valid, CraftEngine, CraftOutcome};
use crate::mission::build_mission_xml;
use crate::obs::{project, ObsInfo};
use crate::reward::{RewardConfig, RewardTracker, StepEvents};
use crate::sim::Simulator;
use crate::stage::StageSpec;
use crate::{Features, OBS_DIM};

// =============================================================================
// Environment Constants
// =============================================================================

pub struct EnvConfig {
    /// Pause after forwarding commands so the simulator produces a fresh
    /// snapshot.
    pub tick: Duration,
    pub craft_settle: Duration,
    /// Mission start retries after the initial attempt.
    pub start_retries: u32,
    pub start_backoff: Duration,
    /// Interval between first-snapshot polls after mission start. The wait
    /// itself is unbounded; the mission's own 120 s time cap ends it.
    pub first_obs_interval: Duration,
    pub pitch_threshold: f64,
    pub pitch_window: Duration,
    pub pitch_burst_gap: Duration,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(20),
            craft_settle: Duration::from_millis(150),
            start_retries: 3,
            start_backoff: Duration::from_millis(1500),
            first_obs_interval: Duration::from_millis(100),
            pitch_threshold: 5.0,
            pitch_window: Duration::from_secs(10),
            pitch_burst_gap: Duration::from_millis(10),
        }
    }
}

fn pause(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}

// =============================================================================
// Posture Corrector
// =============================================================================

/// Forces pitch back to horizontal after a sustained deviation; left alone,
/// policies learn to stare at the sky and never mine.
pub struct PitchGuard {
    threshold: f64,
    window: Duration,
    burst_gap: Duration,
    deviated_since: Option<Instant>,
}

impl PitchGuard {
    pub fn new(threshold: f64, window: Duration, burst_gap: Duration) -> Self {
        Self {
            threshold,
            window,
            burst_gap,
            deviated_since: None,
        }
    }

    pub fn reset(&mut self) {
        self.deviated_since = None;
    }

    /// Feed the current pitch; returns true when a correction burst fired
    /// this step.
    pub fn observe<S: Simulator>(&mut self, sim: &mut S, pitch: f64) -> Result<bool> {
        if pitch.abs() <= self.threshold {
            self.deviated_since = None;
            return Ok(false);
        }
        let since = *self.deviated_since.get_or_insert_with(Instant::now);
        if since.elapsed() < self.window {
            return Ok(false);
        }

        tracing::debug!(pitch, "pitch deviation exceeded window, correcting");
        sim.send_command("setPitch 0")?;
        sim.send_command("pitch 0")?;
        // Some simulator builds ignore the absolute set; nudge back in small
        // opposite-sign increments as a fallback.
        let nudge = if pitch > 0.0 { -0.03 } else { 0.03 };
        for _ in 0..20 {
            sim.send_command(&format!("pitch {nudge}"))?;
            pause(self.burst_gap);
        }
        sim.send_command("pitch 0")?;
        self.deviated_since = None;
        Ok(true)
    }
}

// =============================================================================
// Environment Adapter
// =============================================================================

pub struct StepResult {
    pub obs: Features,
    pub reward: f64,
    pub done: bool,
    /// The stage's terminal tool was crafted and verified this step.
    pub tool_crafted: bool,
    pub info: ObsInfo,
    pub total_reward: f64,
}

pub struct McEnv<S: Simulator> {
    pub sim: S,
    stage: &'static StageSpec,
    base_seed: u64,
    episode: u64,
    config: EnvConfig,
    reward_config: RewardConfig,
    tracker: RewardTracker,
    craft: CraftEngine,
    pitch: PitchGuard,
    last_obs: Features,
    last_info: ObsInfo,
    pub total_reward: f64,
    steps: u64,
    done: bool,
}

impl<S: Simulator> McEnv<S> {
    pub fn new(
        sim: S,
        stage: &'static StageSpec,
        base_seed: u64,
        config: EnvConfig,
        reward_config: RewardConfig,
    ) -> Self {
        let craft = CraftEngine::new(config.craft_settle);
        let pitch = PitchGuard::new(
            config.pitch_threshold,
            config.pitch_window,
            config.pitch_burst_gap,
        );
        Self {
            sim,
            stage,
            base_seed,
            episode: 0,
            config,
            reward_config,
            tracker: RewardTracker::default(),
            craft,
            pitch,
            last_obs: [0f32; OBS_DIM],
            last_info: ObsInfo::default(),
            total_reward: 0.0,
            steps: 0,
            done: true,
        }
    }

    pub fn stage(&self) -> &'static StageSpec {
        self.stage
    }

    /// Swap the stage consumed by the next `reset`; the running episode is
    /// unaffected.
    pub fn set_stage(&mut self, stage: &'static StageSpec) {
        self.stage = stage;
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn reward_breakdown(&self) -> crate::reward::RewardBreakdown {
        self.tracker.breakdown
    }

    pub fn reset(&mut self) -> Result<Features> {
        if self.sim.running() {
            pause(self.config.tick);
            self.sim.quit()?;
        }

        let seed = self.base_seed.wrapping_add(self.episode);
        self.episode += 1;
        let xml = build_mission_xml(self.stage, seed);

        let mut failures = 0u32;
        loop {
            match self.sim.start_mission(&xml) {
                Ok(()) => break,
                Err(err) if failures < self.config.start_retries => {
                    failures += 1;
                    tracing::warn!(attempt = failures, error = %err, "mission start rejected, retrying");
                    pause(self.config.start_backoff);
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("mission start failed after {} attempts", failures + 1)
                    });
                }
            }
        }

        let snapshot = loop {
            if !self.sim.running() {
                anyhow::bail!("mission ended before the first observation arrived");
            }
            if let Some(snap) = self.sim.latest_observation()? {
                break snap;
            }
            pause(self.config.first_obs_interval);
        };
        let snapshot = Some(snapshot);

        let (obs, info) = project(snapshot.as_ref(), self.stage);
        self.tracker.reset(&info);
        self.pitch.reset();
        self.total_reward = 0.0;
        self.steps = 0;
        self.done = false;
        self.last_obs = obs;
        self.last_info = info;

        tracing::debug!(stage = self.stage.id, seed, "mission session started");
        Ok(obs)
    }

    pub fn step(&mut self, action: Action) -> Result<StepResult> {
        // Terminal steps are idempotent.
        if self.done {
            return Ok(StepResult {
                obs: self.last_obs,
                reward: 0.0,
                done: true,
                tool_crafted: false,
                info: self.last_info.clone(),
                total_reward: self.total_reward,
            });
        }
        self.steps += 1;

        let pre = self.last_info.clone();
        let mut events = StepEvents::default();
        if let Some(tier) = action.craft_target() {
            if !craft_request_valid(&pre, tier) {
                events.invalid_craft = true;
            }
        }

        for cmd in action.commands(&pre) {
            self.sim.send_command(&cmd)?;
        }
        pause(self.config.tick);
        for cmd in action.stop_commands() {
            self.sim.send_command(&cmd)?;
        }

        let sim_reward = self.sim.drain_rewards()?;
        let snapshot = self.sim.latest_observation()?;
        let (mut obs, mut info) = project(snapshot.as_ref(), self.stage);

        if info.valid {
            events.pitch_corrected = self.pitch.observe(&mut self.sim, info.pitch)?;
        }

        let (outcome, refreshed) = self.craft.run(&mut self.sim, self.stage, &info)?;
        if let Some((fresh_obs, fresh_info)) = refreshed {
            obs = fresh_obs;
            info = fresh_info;
        }
        if matches!(outcome, CraftOutcome::Crafted(t) if t == self.stage.target_tool) {
            events.crafted_target = true;
        }

        let reward = self.tracker.attribute(
            &self.reward_config,
            self.stage,
            action,
            &pre,
            &info,
            sim_reward,
            events,
        );
        self.total_reward += reward;

        let done = events.crafted_target || info.has_target_tool || !self.sim.running();
        if done {
            self.done = true;
            if self.sim.running() {
                self.sim.quit()?;
                pause(self.config.tick);
            }
        }

        self.last_obs = obs;
        self.last_info = info.clone();
        Ok(StepResult {
            obs,
            reward,
            done,
            tool_crafted: events.crafted_target,
            info,
            total_reward: self.total_reward,
        })
    }

    pub fn close(&mut self) -> Result<()> {
        if self.sim.running() {
            self.sim.quit()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::testsim::ScriptedSim;
    use serde_json::{json, Value};

    fn instant_config() -> EnvConfig {
        EnvConfig {
            tick: Duration::ZERO,
            craft_settle: Duration::ZERO,
            start_backoff: Duration::ZERO,
            first_obs_interval: Duration::ZERO,
            pitch_window: Duration::ZERO,
            pitch_burst_gap: Duration::ZERO,
            ..Default::default()
        }
    }

    fn snapshot(items: &[(&str, u32)], pitch: f64) -> Value {
        let mut map = serde_json::Map::new();
        for (i, (item, size)) in items.iter().enumerate() {
            map.insert(format!("InventorySlot_{i}_item"), json!(item));
            map.insert(format!("InventorySlot_{i}_size"), json!(size));
        }
        map.insert("Yaw".into(), json!(180.0));
        map.insert("Pitch".into(), json!(pitch));
        map.insert("Life".into(), json!(20.0));
        Value::Object(map)
    }

    fn env(sim: ScriptedSim, stage: u8) -> McEnv<ScriptedSim> {
        McEnv::new(
            sim,
            StageSpec::get(stage),
            7,
            instant_config(),
            RewardConfig::default(),
        )
    }

    #[test]
    fn reset_retries_start_then_succeeds() {
        let mut sim = ScriptedSim::default();
        sim.fail_starts = 3;
        sim.push_obs(snapshot(&[], 0.0));
        let mut e = env(sim, 1);
        e.reset().unwrap();
        assert_eq!(e.sim.started_missions.len(), 1);
    }

    #[test]
    fn reset_raises_on_fourth_failure() {
        let mut sim = ScriptedSim::default();
        sim.fail_starts = 4;
        sim.push_obs(snapshot(&[], 0.0));
        let mut e = env(sim, 1);
        assert!(e.reset().is_err());
    }

    #[test]
    fn crafting_terminates_with_bonus() {
        let mut sim = ScriptedSim::default();
        // Reset and step both see three logs; the craft verification poll
        // then sees the finished tool.
        sim.push_obs(snapshot(&[("log", 3)], 0.0));
        sim.push_obs(snapshot(&[("log", 3)], 0.0));
        sim.push_obs(snapshot(&[("wooden_pickaxe", 1)], 0.0));
        let mut e = env(sim, 1);
        e.reset().unwrap();

        let step = e.step(Action::Forward).unwrap();
        assert!(step.done);
        assert!(step.tool_crafted);
        assert!(step.reward >= 10_000.0);
        // Session retired on success.
        assert!(!e.sim.running());
        assert!(e.sim.commands.iter().any(|c| c == "craft wooden_pickaxe"));
    }

    #[test]
    fn terminal_steps_are_idempotent() {
        let mut sim = ScriptedSim::default();
        sim.push_obs(snapshot(&[("log", 3)], 0.0));
        sim.push_obs(snapshot(&[("wooden_pickaxe", 1)], 0.0));
        let mut e = env(sim, 1);
        e.reset().unwrap();

        let first = e.step(Action::Forward).unwrap();
        assert!(first.done);
        let again = e.step(Action::Attack).unwrap();
        assert!(again.done);
        assert_eq!(again.reward, 0.0);
        assert_eq!(again.total_reward, first.total_reward);
    }

    #[test]
    fn mission_end_is_terminal_without_tool() {
        let mut sim = ScriptedSim::default();
        sim.push_obs(snapshot(&[], 0.0));
        let mut e = env(sim, 1);
        e.reset().unwrap();
        e.sim.end_mission();
        let step = e.step(Action::Forward).unwrap();
        assert!(step.done);
        assert!(!step.tool_crafted);
    }

    #[test]
    fn invalid_craft_action_is_charged() {
        let mut sim = ScriptedSim::default();
        // Stage 4 start: iron pickaxe granted, no diamonds.
        sim.push_obs(snapshot(&[("iron_pickaxe", 1)], 0.0));
        sim.push_obs(snapshot(&[("iron_pickaxe", 1)], 0.0));
        let mut e = env(sim, 4);
        e.reset().unwrap();
        let step = e.step(Action::CraftIronPickaxe).unwrap();
        assert_eq!(step.reward, -10.0);
        assert!(!step.done);
    }

    #[test]
    fn sustained_pitch_deviation_triggers_burst() {
        let mut sim = ScriptedSim::default();
        sim.push_obs(snapshot(&[], 0.0));
        sim.push_obs(snapshot(&[], 40.0));
        let mut e = env(sim, 1);
        e.reset().unwrap();

        let step = e.step(Action::PitchDown).unwrap();
        // Pitch command cost plus the correction penalty.
        assert_eq!(step.reward, -310.0);
        assert!(e.sim.commands.iter().any(|c| c == "setPitch 0"));
        assert!(e.sim.commands.iter().filter(|c| *c == "pitch -0.03").count() >= 20);
    }

    #[test]
    fn pitch_within_threshold_clears_timer() {
        let mut sim = ScriptedSim::default();
        let mut guard = PitchGuard::new(5.0, Duration::ZERO, Duration::ZERO);
        assert!(!guard.observe(&mut sim, 3.0).unwrap());
        assert!(sim.commands.is_empty());
        assert!(guard.observe(&mut sim, -12.0).unwrap());
    }

    #[test]
    fn corrector_holds_until_the_window_elapses() {
        let mut sim = ScriptedSim::default();
        let mut guard = PitchGuard::new(5.0, Duration::from_secs(10), Duration::ZERO);
        // Deviation starts the timer; nothing fires inside the window.
        assert!(!guard.observe(&mut sim, 40.0).unwrap());
        assert!(!guard.observe(&mut sim, 40.0).unwrap());
        assert!(sim.commands.is_empty());
        // Dipping back within threshold discards the timer entirely.
        assert!(!guard.observe(&mut sim, 1.0).unwrap());
        assert!(!guard.observe(&mut sim, 40.0).unwrap());
        assert!(sim.commands.is_empty());
    }

    #[test]
    fn first_observation_wait_outlasts_a_slow_arena_build() {
        let mut obs: Vec<Option<Value>> = vec![None; 400];
        obs.push(Some(snapshot(&[], 0.0)));
        let sim = ScriptedSim::with_obs(obs);
        let mut e = env(sim, 1);
        e.reset().unwrap();
        assert!(e.sim.queue.is_empty());
    }

    #[test]
    fn mission_death_during_warmup_raises() {
        let mut sim = ScriptedSim::default();
        sim.running_budget = Some(3);
        let mut e = env(sim, 1);
        assert!(e.reset().is_err());
    }

    #[test]
    fn missing_snapshot_yields_zero_shaping() {
        let mut sim = ScriptedSim::default();
        sim.push_obs(snapshot(&[], 0.0));
        let mut e = env(sim, 1);
        e.reset().unwrap();

        // Drop the snapshot for the next step.
        e.sim.current = None;
        let step = e.step(Action::Attack).unwrap();
        assert_eq!(step.reward, 0.0);
        assert!(!step.info.valid);
        assert!(!step.done);
    }
}
