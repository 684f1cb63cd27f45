use anyhow::Result;
use std::time::Duration;

use crate::obs::{project, ObsInfo};
use crate::sim::Simulator;
use crate::stage::{BlockKind, StageSpec, ToolTier};
use crate::Features;

/// Result of one auto-craft evaluation. At most one attempt per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CraftOutcome {
    /// Trigger condition not met this step.
    Idle,
    /// The craft sequence ran and the tool was verified present.
    Crafted(ToolTier),
    /// The sequence ran but verification failed; no same-step retry.
    Failed(ToolTier),
}

/// One rung of the tool tree: the pickaxe to craft, the material that gates
/// it, the required count, and the tool that must already be held.
#[derive(Debug, Clone, Copy)]
pub struct Rung {
    pub tool: ToolTier,
    pub material: BlockKind,
    pub required: u32,
    pub prereq: Option<ToolTier>,
}

const CHAIN: [Rung; 4] = [
    Rung {
        tool: ToolTier::Wooden,
        material: BlockKind::Log,
        required: 3,
        prereq: None,
    },
    Rung {
        tool: ToolTier::Stone,
        material: BlockKind::Stone,
        required: 3,
        prereq: Some(ToolTier::Wooden),
    },
    Rung {
        tool: ToolTier::Iron,
        material: BlockKind::IronOre,
        required: 3,
        prereq: Some(ToolTier::Stone),
    },
    Rung {
        tool: ToolTier::Diamond,
        material: BlockKind::DiamondOre,
        required: 1,
        prereq: Some(ToolTier::Iron),
    },
];

pub fn rung_for(tier: ToolTier) -> Rung {
    CHAIN[tier as usize]
}

/// Whether a craft request for `tier` would be valid given the current
/// inventory: tool absent, materials met, prerequisite held.
pub fn craft_request_valid(info: &ObsInfo, tier: ToolTier) -> bool {
    let rung = rung_for(tier);
    !info.has_pickaxe(rung.tool)
        && info.count(rung.material) >= rung.required
        && rung.prereq.is_none_or(|p| info.has_pickaxe(p))
}

/// Drives the multi-step craft sequence once the stage's trigger is met,
/// compressing the recipe graph into a single decision point.
pub struct CraftEngine {
    settle: Duration,
}

impl CraftEngine {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    /// The rung the engine would work on this step. Stages 1..4 only ever
    /// target their own rung; stage 5 climbs the whole chain, lowest
    /// missing tool first.
    pub fn active_rung(stage: &StageSpec, info: &ObsInfo) -> Option<Rung> {
        if stage.id == 5 {
            CHAIN.iter().copied().find(|r| !info.has_pickaxe(r.tool))
        } else {
            let rung = rung_for(stage.target_tool);
            (!info.has_pickaxe(rung.tool)).then_some(rung)
        }
    }

    /// Trigger condition: material count reached, prerequisite tool held
    /// (when one is required), target tool absent.
    pub fn trigger_ready(stage: &StageSpec, info: &ObsInfo) -> bool {
        if !info.valid {
            return false;
        }
        match Self::active_rung(stage, info) {
            Some(rung) => {
                info.count(rung.material) >= rung.required
                    && rung.prereq.is_none_or(|p| info.has_pickaxe(p))
            }
            None => false,
        }
    }

    fn settle(&self) {
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
    }

    /// Run the craft sequence for the active rung. Returns the outcome plus
    /// the freshly projected post-craft observation when the sequence ran.
    pub fn run<S: Simulator>(
        &self,
        sim: &mut S,
        stage: &StageSpec,
        info: &ObsInfo,
    ) -> Result<(CraftOutcome, Option<(Features, ObsInfo)>)> {
        if !Self::trigger_ready(stage, info) {
            return Ok((CraftOutcome::Idle, None));
        }
        let rung = Self::active_rung(stage, info).expect("trigger implies active rung");

        // Intermediate planks: four attempts cover the craftable log variants.
        if info.planks < 3 {
            for _ in 0..4 {
                sim.send_command("craft planks")?;
            }
            self.settle();
        }
        // Intermediate sticks: each craft yields a pair.
        if info.sticks < 2 {
            sim.send_command("craft stick")?;
            self.settle();
        }
        sim.send_command(&format!("craft {}", rung.tool.item_name()))?;
        self.settle();

        let snapshot = sim.latest_observation()?;
        let (features, fresh) = project(snapshot.as_ref(), stage);
        let outcome = if fresh.has_pickaxe(rung.tool) {
            CraftOutcome::Crafted(rung.tool)
        } else {
            tracing::warn!(
                stage = stage.id,
                tool = rung.tool.item_name(),
                "craft verification failed"
            );
            CraftOutcome::Failed(rung.tool)
        };
        Ok((outcome, Some((features, fresh))))
    }
}
