use crate::obs::ObsInfo;
use crate::stage::{BlockKind, ToolTier};

/// Discrete action space. The cardinality and ordering are fixed across all
/// stages so that weights and Q-tables transfer between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    Forward = 0,
    Backward = 1,
    StrafeRight = 2,
    StrafeLeft = 3,
    TurnRight = 4,
    TurnLeft = 5,
    PitchUp = 6,
    PitchDown = 7,
    Attack = 8,
    CraftWoodenPickaxe = 9,
    CraftStonePickaxe = 10,
    CraftIronPickaxe = 11,
}

impl Action {
    pub const COUNT: usize = 12;

    pub fn from_index(i: usize) -> Self {
        assert!(i < Self::COUNT);
        // SAFETY: repr(u8) and bounds checked above.
        unsafe { std::mem::transmute(i as u8) }
    }

    /// The craft actions are virtual: they emit no simulator command and are
    /// handled by the auto-craft engine instead.
    pub fn is_craft(self) -> bool {
        self.craft_target().is_some()
    }

    pub fn craft_target(self) -> Option<ToolTier> {
        match self {
            Action::CraftWoodenPickaxe => Some(ToolTier::Wooden),
            Action::CraftStonePickaxe => Some(ToolTier::Stone),
            Action::CraftIronPickaxe => Some(ToolTier::Iron),
            _ => None,
        }
    }

    pub fn is_pitch(self) -> bool {
        matches!(self, Action::PitchUp | Action::PitchDown)
    }

    /// Simulator commands issued when the action is taken. Movement commands
    /// start continuous motion; [`Action::stop_commands`] ends it after the
    /// tick has been consumed.
    pub fn commands(self, info: &ObsInfo) -> Vec<String> {
        match self {
            Action::Forward => vec!["move 1".into()],
            Action::Backward => vec!["move -1".into()],
            Action::StrafeRight => vec!["strafe 1".into()],
            Action::StrafeLeft => vec!["strafe -1".into()],
            Action::TurnRight => vec!["turn 0.5".into()],
            Action::TurnLeft => vec!["turn -0.5".into()],
            Action::PitchUp => vec!["pitch -0.1".into()],
            Action::PitchDown => vec!["pitch 0.1".into()],
            Action::Attack => {
                let mut cmds = equip_for(info);
                cmds.push("attack 1".into());
                cmds
            }
            Action::CraftWoodenPickaxe
            | Action::CraftStonePickaxe
            | Action::CraftIronPickaxe => Vec::new(),
        }
    }

    /// Commands that cancel any continuous motion the action started.
    pub fn stop_commands(self) -> Vec<String> {
        match self {
            Action::Forward | Action::Backward => vec!["move 0".into()],
            Action::StrafeRight | Action::StrafeLeft => vec!["strafe 0".into()],
            Action::TurnRight | Action::TurnLeft => vec!["turn 0".into()],
            Action::PitchUp | Action::PitchDown => vec!["pitch 0".into()],
            Action::Attack => vec!["attack 0".into()],
            _ => Vec::new(),
        }
    }

    /// Coarse category used in the per-episode metrics.
    pub fn category(self) -> &'static str {
        match self {
            Action::Forward | Action::Backward | Action::StrafeRight | Action::StrafeLeft => {
                "move"
            }
            Action::TurnRight | Action::TurnLeft => "turn",
            Action::PitchUp | Action::PitchDown => "pitch",
            Action::Attack => "attack",
            _ => "craft",
        }
    }
}

/// Hotbar selection pair that equips the tool matched to the block directly
/// ahead: an axe for logs, an adequate-tier pickaxe for ores. Empty when the
/// matching tool is absent; the attack then proceeds with whatever is held.
pub fn equip_for(info: &ObsInfo) -> Vec<String> {
    let front = info.front_cell();
    let slot = match front {
        BlockKind::Log => info
            .hotbar
            .iter()
            .position(|s| s.as_deref().is_some_and(|i| i.ends_with("_axe"))),
        BlockKind::Stone | BlockKind::IronOre | BlockKind::DiamondOre => {
            let need = front.required_tier().unwrap_or(ToolTier::Wooden);
            info.best_pickaxe()
                .filter(|&best| best >= need)
                .and_then(|best| info.hotbar_slot(best.item_name()))
        }
        _ => None,
    };
    match slot {
        Some(n) => vec![format!("hotbar.{} 1", n + 1), format!("hotbar.{} 0", n + 1)],
        None => Vec::new(),
    }
}
