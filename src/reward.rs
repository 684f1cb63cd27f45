use crate::action::Action;
use crate::obs::ObsInfo;
use crate::stage::{BlockKind, StageSpec, ToolTier};

// =============================================================================
// Reward Tuning Knobs
// =============================================================================

pub struct RewardConfig {
    /// Base for target-material acquisition; multiplied by stage id, delta,
    /// and stage difficulty.
    pub target_material_base: f64,
    /// Base for a tool-matched attack on the stage's target resource.
    pub correct_attack_base: f64,
    /// Penalty per tier gap when the held tool cannot break the front block.
    pub wrong_tier_penalties: [f64; 3],
    /// Attack into air, made worse in later stages.
    pub air_attack_base: f64,
    pub air_attack_stage_step: f64,
    pub wall_hit_penalty: f64,
    pub pitch_command_penalty: f64,
    pub pitch_correction_penalty: f64,
    pub invalid_craft_penalty: f64,
    /// Terminal craft bonus, stage-independent.
    pub craft_success_reward: f64,
    /// Attacking a material from a strictly earlier stage, indexed by
    /// stage 2 / 3 / 4+.
    pub stale_target_penalties: [f64; 3],
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            target_material_base: 500.0,
            correct_attack_base: 200.0,
            wrong_tier_penalties: [40.0, 50.0, 100.0],
            air_attack_base: -30.0,
            air_attack_stage_step: -5.0,
            wall_hit_penalty: -100.0,
            pitch_command_penalty: -10.0,
            pitch_correction_penalty: -300.0,
            invalid_craft_penalty: -10.0,
            craft_success_reward: 10_000.0,
            stale_target_penalties: [-10.0, -15.0, -20.0],
        }
    }
}

/// Per-source totals for the current episode, for debugging and metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RewardBreakdown {
    pub target_material: f64,
    pub correct_attack: f64,
    pub wrong_tier: f64,
    pub air_attack: f64,
    pub wall: f64,
    pub pitch_command: f64,
    pub pitch_correction: f64,
    pub invalid_craft: f64,
    pub craft_success: f64,
    pub stale_target: f64,
    pub simulator: f64,
}

/// Curriculum stage that first makes a material relevant.
fn material_stage(kind: BlockKind) -> Option<u8> {
    match kind {
        BlockKind::Log => Some(1),
        BlockKind::Stone => Some(2),
        BlockKind::IronOre => Some(3),
        BlockKind::DiamondOre => Some(4),
        _ => None,
    }
}

fn can_break(info: &ObsInfo, kind: BlockKind) -> bool {
    match kind.required_tier() {
        None => kind != BlockKind::Log || info.has_axe || info.best_pickaxe().is_some(),
        Some(need) => info.best_pickaxe().is_some_and(|best| best >= need),
    }
}

fn tier_gap(info: &ObsInfo, need: ToolTier) -> usize {
    match info.best_pickaxe() {
        Some(best) => (need as usize).saturating_sub(best as usize),
        None => need as usize + 1,
    }
}

// =============================================================================
// Reward Attribution
// =============================================================================

/// Owns the previous-step material counts; the only component entitled to
/// compare consecutive observations.
#[derive(Debug, Default)]
pub struct RewardTracker {
    prev_wood: u32,
    prev_stone: u32,
    prev_iron: u32,
    prev_diamond: u32,
    prev_has_target_tool: bool,
    pub breakdown: RewardBreakdown,
}

/// Step facts the attributor cannot derive from observations alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepEvents {
    pub invalid_craft: bool,
    pub crafted_target: bool,
    pub pitch_corrected: bool,
}

impl RewardTracker {
    pub fn reset(&mut self, info: &ObsInfo) {
        self.prev_wood = info.wood;
        self.prev_stone = info.stone;
        self.prev_iron = info.iron;
        self.prev_diamond = info.diamond;
        self.prev_has_target_tool = info.has_target_tool;
        self.breakdown = RewardBreakdown::default();
    }

    fn prev_count(&self, kind: BlockKind) -> u32 {
        match kind {
            BlockKind::Log => self.prev_wood,
            BlockKind::Stone => self.prev_stone,
            BlockKind::IronOre => self.prev_iron,
            BlockKind::DiamondOre => self.prev_diamond,
            _ => 0,
        }
    }

    /// Compute this step's scalar reward. `pre` is the observation the action
    /// was chosen from, `post` the one that followed it; `sim_reward` is the
    /// drained simulator-credited amount, passed through unscaled.
    pub fn attribute(
        &mut self,
        cfg: &RewardConfig,
        stage: &StageSpec,
        action: Action,
        pre: &ObsInfo,
        post: &ObsInfo,
        sim_reward: f64,
        events: StepEvents,
    ) -> f64 {
        let mut reward = sim_reward;
        self.breakdown.simulator += sim_reward;

        // Lost snapshot: pass the simulator reward through but add no
        // shaping; previous counts stay pinned for the next comparison.
        if !post.valid {
            return reward;
        }

        let m = stage.difficulty;
        let stage_id = stage.id as f64;

        let delta = post
            .count(stage.target_block)
            .saturating_sub(self.prev_count(stage.target_block));
        if delta > 0 {
            let r = cfg.target_material_base * stage_id * delta as f64 * m;
            reward += r;
            self.breakdown.target_material += r;
        }

        if action == Action::Attack {
            let front = pre.front_cell();
            match front {
                BlockKind::Air => {
                    let r = cfg.air_attack_base + cfg.air_attack_stage_step * (stage_id - 1.0);
                    reward += r;
                    self.breakdown.air_attack += r;
                }
                BlockKind::Wall => {
                    reward += cfg.wall_hit_penalty;
                    self.breakdown.wall += cfg.wall_hit_penalty;
                }
                _ => {
                    if front == stage.target_block && can_break(pre, front) {
                        let r = cfg.correct_attack_base * stage_id * m;
                        reward += r;
                        self.breakdown.correct_attack += r;
                    } else if !can_break(pre, front) {
                        let need = front.required_tier().unwrap_or(ToolTier::Wooden);
                        let gap = tier_gap(pre, need).clamp(1, 3);
                        let r = -cfg.wrong_tier_penalties[gap - 1];
                        reward += r;
                        self.breakdown.wrong_tier += r;
                    } else if material_stage(front).is_some_and(|s| s < stage.id) {
                        let idx = (stage.id.min(4) - 2) as usize;
                        let r = cfg.stale_target_penalties[idx];
                        reward += r;
                        self.breakdown.stale_target += r;
                    }
                }
            }
        } else if action == Action::Forward && pre.front_cell() == BlockKind::Wall {
            reward += cfg.wall_hit_penalty;
            self.breakdown.wall += cfg.wall_hit_penalty;
        }

        if action.is_pitch() {
            reward += cfg.pitch_command_penalty;
            self.breakdown.pitch_command += cfg.pitch_command_penalty;
        }
        if events.pitch_corrected {
            reward += cfg.pitch_correction_penalty;
            self.breakdown.pitch_correction += cfg.pitch_correction_penalty;
        }
        if events.invalid_craft {
            reward += cfg.invalid_craft_penalty;
            self.breakdown.invalid_craft += cfg.invalid_craft_penalty;
        }
        if events.crafted_target {
            reward += cfg.craft_success_reward;
            self.breakdown.craft_success += cfg.craft_success_reward;
        }

        self.prev_wood = post.wood;
        self.prev_stone = post.stone;
        self.prev_iron = post.iron;
        self.prev_diamond = post.diamond;
        self.prev_has_target_tool = post.has_target_tool;

        reward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageSpec;

    fn info() -> ObsInfo {
        ObsInfo {
            valid: true,
            grid: vec![BlockKind::Air; 75],
            yaw: 180.0,
            ..Default::default()
        }
    }

    fn with_front(mut i: ObsInfo, kind: BlockKind) -> ObsInfo {
        i.grid[2 + 5 + 25] = kind;
        i
    }

    #[test]
    fn target_material_scales_with_stage_and_delta() {
        let stage = StageSpec::get(1);
        let cfg = RewardConfig::default();
        let mut tracker = RewardTracker::default();
        let pre = info();
        tracker.reset(&pre);

        let mut post = info();
        post.wood = 2;
        let r = tracker.attribute(
            &cfg,
            stage,
            Action::Forward,
            &pre,
            &post,
            0.0,
            StepEvents::default(),
        );
        // 500 * stage 1 * delta 2 * difficulty 1.0
        assert_eq!(r, 1000.0);

        // Counts are carried: the same post again earns nothing.
        let r = tracker.attribute(
            &cfg,
            stage,
            Action::Forward,
            &pre,
            &post,
            0.0,
            StepEvents::default(),
        );
        assert_eq!(r, 0.0);
    }

    #[test]
    fn correct_attack_is_tier_matched_and_scaled() {
        let stage = StageSpec::get(3);
        let cfg = RewardConfig::default();
        let mut tracker = RewardTracker::default();

        let mut pre = with_front(info(), BlockKind::IronOre);
        pre.pickaxes[ToolTier::Stone as usize] = true;
        tracker.reset(&pre);

        let r = tracker.attribute(
            &cfg,
            stage,
            Action::Attack,
            &pre,
            &info(),
            0.0,
            StepEvents::default(),
        );
        // 200 * stage 3 * difficulty 1.6
        assert!((r - 960.0).abs() < 1e-9);
    }

    #[test]
    fn wrong_tier_attack_penalized_by_gap() {
        let stage = StageSpec::get(3);
        let cfg = RewardConfig::default();
        let mut tracker = RewardTracker::default();

        // Stone pickaxe against diamond ore: one tier short.
        let mut pre = with_front(info(), BlockKind::DiamondOre);
        pre.pickaxes[ToolTier::Stone as usize] = true;
        tracker.reset(&pre);
        let r = tracker.attribute(
            &cfg,
            stage,
            Action::Attack,
            &pre,
            &info(),
            0.0,
            StepEvents::default(),
        );
        assert_eq!(r, -40.0);

        // Bare hands against diamond ore: maximum gap.
        let pre = with_front(info(), BlockKind::DiamondOre);
        tracker.reset(&pre);
        let r = tracker.attribute(
            &cfg,
            stage,
            Action::Attack,
            &pre,
            &info(),
            0.0,
            StepEvents::default(),
        );
        assert_eq!(r, -100.0);
    }

    #[test]
    fn stale_material_attack_in_higher_stage() {
        let stage = StageSpec::get(2);
        let cfg = RewardConfig::default();
        let mut tracker = RewardTracker::default();
        let mut pre = with_front(info(), BlockKind::Log);
        pre.has_axe = true;
        tracker.reset(&pre);
        let r = tracker.attribute(
            &cfg,
            stage,
            Action::Attack,
            &pre,
            &info(),
            0.0,
            StepEvents::default(),
        );
        assert_eq!(r, -10.0);
    }

    #[test]
    fn air_and_wall_penalties() {
        let cfg = RewardConfig::default();
        let mut tracker = RewardTracker::default();
        let pre = info();
        tracker.reset(&pre);

        let r = tracker.attribute(
            &cfg,
            StageSpec::get(1),
            Action::Attack,
            &pre,
            &info(),
            0.0,
            StepEvents::default(),
        );
        assert_eq!(r, -30.0);
        let r = tracker.attribute(
            &cfg,
            StageSpec::get(4),
            Action::Attack,
            &pre,
            &info(),
            0.0,
            StepEvents::default(),
        );
        assert_eq!(r, -45.0);

        let walled = with_front(info(), BlockKind::Wall);
        tracker.reset(&walled);
        let r = tracker.attribute(
            &cfg,
            StageSpec::get(1),
            Action::Forward,
            &walled,
            &info(),
            0.0,
            StepEvents::default(),
        );
        assert_eq!(r, -100.0);
    }

    #[test]
    fn event_rewards_stack_on_base() {
        let cfg = RewardConfig::default();
        let mut tracker = RewardTracker::default();
        let pre = info();
        tracker.reset(&pre);

        let r = tracker.attribute(
            &cfg,
            StageSpec::get(2),
            Action::CraftStonePickaxe,
            &pre,
            &info(),
            0.0,
            StepEvents {
                invalid_craft: true,
                ..Default::default()
            },
        );
        assert_eq!(r, -10.0);

        let r = tracker.attribute(
            &cfg,
            StageSpec::get(1),
            Action::PitchUp,
            &pre,
            &info(),
            0.0,
            StepEvents {
                pitch_corrected: true,
                ..Default::default()
            },
        );
        assert_eq!(r, -310.0);

        let r = tracker.attribute(
            &cfg,
            StageSpec::get(1),
            Action::Forward,
            &pre,
            &info(),
            0.0,
            StepEvents {
                crafted_target: true,
                ..Default::default()
            },
        );
        assert_eq!(r, 10_000.0);
    }

    #[test]
    fn lost_snapshot_passes_simulator_reward_only() {
        let cfg = RewardConfig::default();
        let mut tracker = RewardTracker::default();
        let pre = info();
        tracker.reset(&pre);

        let invalid = ObsInfo::default();
        let r = tracker.attribute(
            &cfg,
            StageSpec::get(1),
            Action::PitchUp,
            &pre,
            &invalid,
            2.5,
            StepEvents::default(),
        );
        assert_eq!(r, 2.5);
    }
}
