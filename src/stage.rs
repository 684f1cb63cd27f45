// =============================================================================
// Blocks and Tools
// =============================================================================

/// Block classes the agent cares about. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Air,
    Log,
    Stone,
    IronOre,
    DiamondOre,
    Wall,
    Other,
}

impl BlockKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "air" => BlockKind::Air,
            "log" | "log2" => BlockKind::Log,
            "stone" | "cobblestone" => BlockKind::Stone,
            "iron_ore" => BlockKind::IronOre,
            "diamond_ore" => BlockKind::DiamondOre,
            "bedrock" => BlockKind::Wall,
            _ => BlockKind::Other,
        }
    }

    /// World block name used in the mission drawing decorator.
    pub fn block_name(self) -> &'static str {
        match self {
            BlockKind::Air => "air",
            BlockKind::Log => "log",
            BlockKind::Stone => "stone",
            BlockKind::IronOre => "iron_ore",
            BlockKind::DiamondOre => "diamond_ore",
            BlockKind::Wall => "bedrock",
            BlockKind::Other => "dirt",
        }
    }

    /// Minimum pickaxe tier able to break this block, or None when any tool
    /// (or bare hands / an axe) will do.
    pub fn required_tier(self) -> Option<ToolTier> {
        match self {
            BlockKind::Stone => Some(ToolTier::Wooden),
            BlockKind::IronOre => Some(ToolTier::Stone),
            BlockKind::DiamondOre => Some(ToolTier::Iron),
            _ => None,
        }
    }
}

/// Pickaxe tiers, ordered by mining capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToolTier {
    Wooden,
    Stone,
    Iron,
    Diamond,
}

impl ToolTier {
    pub fn item_name(self) -> &'static str {
        match self {
            ToolTier::Wooden => "wooden_pickaxe",
            ToolTier::Stone => "stone_pickaxe",
            ToolTier::Iron => "iron_pickaxe",
            ToolTier::Diamond => "diamond_pickaxe",
        }
    }
}

// =============================================================================
// Stage Descriptors
// =============================================================================

/// `(min, max)` block counts drawn per resource when synthesizing an arena.
#[derive(Debug, Clone, Copy)]
pub struct DensityTable {
    pub log: (u32, u32),
    pub stone: (u32, u32),
    pub iron_ore: (u32, u32),
    pub diamond_ore: (u32, u32),
}

/// Immutable description of one curriculum stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub id: u8,
    pub name: &'static str,
    /// Pickaxe the stage must produce. Stage 5 targets the full chain and
    /// shares stage 4's terminal tool.
    pub target_tool: ToolTier,
    pub target_block: BlockKind,
    pub required_count: u32,
    pub prereq_tool: Option<ToolTier>,
    pub success_threshold: f64,
    pub min_episodes: u32,
    /// Difficulty multiplier applied to shaped base rewards.
    pub difficulty: f64,
    pub density: DensityTable,
    /// Items granted at spawn: `(item name, count)`.
    pub start_inventory: &'static [(&'static str, u32)],
}

const STAGES: [StageSpec; 5] = [
    StageSpec {
        id: 1,
        name: "wood",
        target_tool: ToolTier::Wooden,
        target_block: BlockKind::Log,
        required_count: 3,
        prereq_tool: None,
        success_threshold: 0.60,
        min_episodes: 100,
        difficulty: 1.0,
        density: DensityTable {
            log: (40, 60),
            stone: (15, 20),
            iron_ore: (5, 10),
            diamond_ore: (0, 0),
        },
        start_inventory: &[("diamond_axe", 1)],
    },
    StageSpec {
        id: 2,
        name: "stone",
        target_tool: ToolTier::Stone,
        target_block: BlockKind::Stone,
        required_count: 3,
        prereq_tool: Some(ToolTier::Wooden),
        success_threshold: 0.55,
        min_episodes: 100,
        difficulty: 1.3,
        density: DensityTable {
            log: (10, 15),
            stone: (30, 40),
            iron_ore: (8, 12),
            diamond_ore: (0, 0),
        },
        start_inventory: &[("wooden_pickaxe", 1)],
    },
    StageSpec {
        id: 3,
        name: "iron",
        target_tool: ToolTier::Iron,
        target_block: BlockKind::IronOre,
        required_count: 3,
        prereq_tool: Some(ToolTier::Stone),
        success_threshold: 0.50,
        min_episodes: 120,
        difficulty: 1.6,
        density: DensityTable {
            log: (5, 8),
            stone: (15, 20),
            iron_ore: (20, 30),
            diamond_ore: (2, 4),
        },
        start_inventory: &[("stone_pickaxe", 1)],
    },
    StageSpec {
        id: 4,
        name: "diamond",
        target_tool: ToolTier::Diamond,
        target_block: BlockKind::DiamondOre,
        required_count: 1,
        prereq_tool: Some(ToolTier::Iron),
        success_threshold: 0.45,
        min_episodes: 150,
        difficulty: 2.0,
        density: DensityTable {
            log: (3, 5),
            stone: (10, 15),
            iron_ore: (10, 15),
            diamond_ore: (3, 6),
        },
        start_inventory: &[("iron_pickaxe", 1)],
    },
    StageSpec {
        id: 5,
        name: "scratch",
        target_tool: ToolTier::Diamond,
        target_block: BlockKind::DiamondOre,
        required_count: 1,
        prereq_tool: None,
        success_threshold: 0.45,
        min_episodes: 200,
        difficulty: 2.0,
        density: DensityTable {
            log: (18, 22),
            stone: (23, 27),
            iron_ore: (18, 22),
            diamond_ore: (3, 5),
        },
        start_inventory: &[("diamond_axe", 1)],
    },
];

impl StageSpec {
    pub fn get(id: u8) -> &'static StageSpec {
        Self::try_get(id).unwrap_or_else(|| panic!("stage id out of range: {id}"))
    }

    pub fn try_get(id: u8) -> Option<&'static StageSpec> {
        (1..=5).contains(&id).then(|| &STAGES[(id - 1) as usize])
    }

    /// Stages 1..4, the promotion sequence. Stage 5 is a standalone
    /// full-chain mode configured directly.
    pub fn promotion_sequence() -> &'static [StageSpec] {
        &STAGES[..4]
    }

    pub fn all() -> &'static [StageSpec] {
        &STAGES
    }

    /// Per-stage learner hints: `(learning_rate_scale, exploration_scale,
    /// reward_multiplier)`. The learner may honor or ignore them.
    pub fn adaptation(&self) -> (f64, f64, f64) {
        match self.id {
            1 => (1.0, 1.0, 1.0),
            2 => (0.9, 0.8, 1.3),
            3 => (0.8, 0.6, 1.6),
            _ => (0.7, 0.5, 2.0),
        }
    }

    /// Suffix used for inter-stage weight artifacts.
    pub fn output_suffix(&self) -> String {
        format!("stage{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_lookup_matches_density_table() {
        let s1 = StageSpec::get(1);
        assert_eq!(s1.density.log, (40, 60));
        assert_eq!(s1.density.diamond_ore, (0, 0));

        let s3 = StageSpec::get(3);
        assert_eq!(s3.density.iron_ore, (20, 30));
        assert_eq!(s3.target_block, BlockKind::IronOre);
        assert_eq!(s3.prereq_tool, Some(ToolTier::Stone));
    }

    #[test]
    fn promotion_sequence_excludes_scratch_mode() {
        let seq = StageSpec::promotion_sequence();
        assert_eq!(seq.len(), 4);
        assert_eq!(seq.last().unwrap().id, 4);
    }

    #[test]
    fn thresholds_relax_with_stage() {
        let ts: Vec<f64> = StageSpec::promotion_sequence()
            .iter()
            .map(|s| s.success_threshold)
            .collect();
        assert_eq!(ts, vec![0.60, 0.55, 0.50, 0.45]);
    }

    #[test]
    fn tier_gates_match_tool_tree() {
        assert_eq!(BlockKind::Stone.required_tier(), Some(ToolTier::Wooden));
        assert_eq!(BlockKind::IronOre.required_tier(), Some(ToolTier::Stone));
        assert_eq!(BlockKind::DiamondOre.required_tier(), Some(ToolTier::Iron));
        assert_eq!(BlockKind::Log.required_tier(), None);
    }

    #[test]
    fn block_names_round_trip() {
        for kind in [
            BlockKind::Log,
            BlockKind::Stone,
            BlockKind::IronOre,
            BlockKind::DiamondOre,
            BlockKind::Wall,
        ] {
            assert_eq!(BlockKind::from_name(kind.block_name()), kind);
        }
        assert_eq!(BlockKind::from_name("log2"), BlockKind::Log);
        assert_eq!(BlockKind::from_name("cobblestone"), BlockKind::Stone);
    }
}
