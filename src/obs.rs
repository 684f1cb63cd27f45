use serde_json::Value;

use crate::stage::{BlockKind, StageSpec, ToolTier};
use crate::{obs_layout, Features, OBS_DIM};

pub const GRID_NAME: &str = "surroundings5x5";
pub const INVENTORY_SLOTS: usize = 45;
pub const HOTBAR_SLOTS: usize = 9;

/// Per-step info record consumed by the reward attributor, the auto-craft
/// engine, and episode termination. Never exposed to the learner.
#[derive(Debug, Clone, Default)]
pub struct ObsInfo {
    /// False when no snapshot was available this step.
    pub valid: bool,
    pub wood: u32,
    pub stone: u32,
    pub iron: u32,
    pub diamond: u32,
    /// Craft intermediates, tracked separately from the wood count.
    pub planks: u32,
    pub sticks: u32,
    /// Presence flags indexed by [`ToolTier`] order: wooden, stone, iron, diamond.
    pub pickaxes: [bool; 4],
    pub has_golden_pickaxe: bool,
    pub has_axe: bool,
    pub has_target_tool: bool,
    pub x: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub life: f64,
    pub ticks_alive: f64,
    /// Classified neighborhood grid (75 cells) in simulator scan order,
    /// empty when the snapshot lacked it.
    pub grid: Vec<BlockKind>,
    pub hotbar: [Option<String>; HOTBAR_SLOTS],
}

impl ObsInfo {
    pub fn has_pickaxe(&self, tier: ToolTier) -> bool {
        self.pickaxes[tier as usize]
    }

    pub fn best_pickaxe(&self) -> Option<ToolTier> {
        [
            ToolTier::Diamond,
            ToolTier::Iron,
            ToolTier::Stone,
            ToolTier::Wooden,
        ]
        .into_iter()
        .find(|&t| self.has_pickaxe(t))
    }

    pub fn count(&self, kind: BlockKind) -> u32 {
        match kind {
            BlockKind::Log => self.wood,
            BlockKind::Stone => self.stone,
            BlockKind::IronOre => self.iron,
            BlockKind::DiamondOre => self.diamond,
            _ => 0,
        }
    }

    /// Cell directly ahead of the agent. The feet-level cell wins when
    /// occupied (flat ores sit at ground level); otherwise the head-level
    /// cell (tall log columns).
    pub fn front_cell(&self) -> BlockKind {
        if self.grid.len() != obs_layout::GRID_LEN {
            return BlockKind::Air;
        }
        let (dx, dz) = facing_offset(self.yaw);
        let cell = |layer: usize| {
            let ix = (dx + 2) as usize;
            let iz = (dz + 2) as usize;
            self.grid[ix + 5 * iz + 25 * layer]
        };
        // Layer 1 is feet height, layer 2 is head height.
        let feet = cell(1);
        if feet != BlockKind::Air {
            feet
        } else {
            cell(2)
        }
    }

    /// Hotbar slot (0-based) holding the named item, if any.
    pub fn hotbar_slot(&self, item: &str) -> Option<usize> {
        self.hotbar
            .iter()
            .position(|s| s.as_deref() == Some(item))
    }
}

/// Quantized facing direction. Minecraft yaw: 0 = south (+z), 90 = west
/// (-x), 180 = north (-z), 270 = east (+x).
pub fn facing_quadrant(yaw: f64) -> u8 {
    (((yaw.rem_euclid(360.0) + 45.0) / 90.0) as u32 % 4) as u8
}

/// Grid offset of the faced neighbor for a quadrant from [`facing_quadrant`].
pub fn quadrant_offset(quadrant: u8) -> (i32, i32) {
    match quadrant % 4 {
        0 => (0, 1),
        1 => (-1, 0),
        2 => (0, -1),
        _ => (1, 0),
    }
}

pub fn facing_offset(yaw: f64) -> (i32, i32) {
    quadrant_offset(facing_quadrant(yaw))
}

fn clampf(v: f64) -> f32 {
    if v.is_finite() {
        v.clamp(-100.0, 100.0) as f32
    } else {
        0.0
    }
}

fn item_category(item: &str) -> Option<&'static str> {
    match item {
        "log" | "log2" => Some("wood"),
        "stone" | "cobblestone" => Some("stone"),
        "iron_ore" | "iron_ingot" => Some("iron"),
        "diamond" => Some("diamond"),
        "planks" => Some("planks"),
        "stick" => Some("sticks"),
        _ => None,
    }
}

fn add_item(info: &mut ObsInfo, item: &str, qty: u32) {
    match item_category(item) {
        Some("wood") => info.wood += qty,
        Some("stone") => info.stone += qty,
        Some("iron") => info.iron += qty,
        Some("diamond") => info.diamond += qty,
        Some("planks") => info.planks += qty,
        Some("sticks") => info.sticks += qty,
        _ => {}
    }
    match item {
        "wooden_pickaxe" => info.pickaxes[ToolTier::Wooden as usize] = true,
        "stone_pickaxe" => info.pickaxes[ToolTier::Stone as usize] = true,
        "iron_pickaxe" => info.pickaxes[ToolTier::Iron as usize] = true,
        "diamond_pickaxe" => info.pickaxes[ToolTier::Diamond as usize] = true,
        "golden_pickaxe" => info.has_golden_pickaxe = true,
        s if s.ends_with("_axe") => info.has_axe = true,
        _ => {}
    }
}

fn read_inventory(snapshot: &Value, info: &mut ObsInfo) {
    let mut any_flat = false;
    for i in 0..INVENTORY_SLOTS {
        let item_key = format!("InventorySlot_{i}_item");
        let size_key = format!("InventorySlot_{i}_size");
        if let Some(item) = snapshot.get(&item_key).and_then(Value::as_str) {
            any_flat = true;
            if item == "air" {
                continue;
            }
            let qty = snapshot
                .get(&size_key)
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            add_item(info, item, qty);
            if i < HOTBAR_SLOTS {
                info.hotbar[i] = Some(item.to_string());
            }
        }
    }
    if any_flat {
        return;
    }
    // List-form fallback used by some simulator builds.
    if let Some(list) = snapshot.get("inventory").and_then(Value::as_array) {
        for (i, entry) in list.iter().enumerate() {
            let Some(item) = entry.get("type").and_then(Value::as_str) else {
                continue;
            };
            if item == "air" {
                continue;
            }
            let qty = entry
                .get("quantity")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            add_item(info, item, qty);
            if i < HOTBAR_SLOTS {
                info.hotbar[i] = Some(item.to_string());
            }
        }
    }
}

/// Project the latest simulator snapshot into the fixed-width feature vector
/// and the info record. A missing snapshot maps to all zeros with
/// `info.valid == false`.
pub fn project(snapshot: Option<&Value>, stage: &StageSpec) -> (Features, ObsInfo) {
    let mut f = [0f32; OBS_DIM];
    let mut info = ObsInfo::default();

    let Some(snap) = snapshot else {
        return (f, info);
    };
    info.valid = true;

    if let Some(grid) = snap.get(GRID_NAME).and_then(Value::as_array) {
        info.grid = grid
            .iter()
            .map(|v| BlockKind::from_name(v.as_str().unwrap_or("air")))
            .collect();
        for (i, kind) in info.grid.iter().enumerate().take(obs_layout::GRID_LEN) {
            f[obs_layout::GRID + i] = if *kind == BlockKind::Air { 0.0 } else { 1.0 };
        }
    }

    read_inventory(snap, &mut info);

    f[obs_layout::COUNTS] = clampf(info.wood as f64);
    f[obs_layout::COUNTS + 1] = clampf(info.stone as f64);
    f[obs_layout::COUNTS + 2] = clampf(info.iron as f64);
    f[obs_layout::COUNTS + 3] = clampf(info.diamond as f64);

    for tier in 0..4 {
        f[obs_layout::TOOLS + tier] = if info.pickaxes[tier] { 1.0 } else { 0.0 };
    }
    f[obs_layout::TOOLS + 4] = if info.has_golden_pickaxe { 1.0 } else { 0.0 };

    info.x = snap.get("XPos").and_then(Value::as_f64).unwrap_or(0.0);
    let y = snap.get("YPos").and_then(Value::as_f64).unwrap_or(0.0);
    info.z = snap.get("ZPos").and_then(Value::as_f64).unwrap_or(0.0);
    info.yaw = snap.get("Yaw").and_then(Value::as_f64).unwrap_or(0.0);
    info.pitch = snap.get("Pitch").and_then(Value::as_f64).unwrap_or(0.0);
    info.life = snap.get("Life").and_then(Value::as_f64).unwrap_or(20.0);
    info.ticks_alive = snap.get("TimeAlive").and_then(Value::as_f64).unwrap_or(0.0);

    f[obs_layout::POSE] = clampf(info.x);
    f[obs_layout::POSE + 1] = clampf(y);
    f[obs_layout::POSE + 2] = clampf(info.z);
    // Raw degrees would not survive the feature clamp; the quadrant does,
    // and it is what the learners discretize on anyway.
    f[obs_layout::POSE + 3] = facing_quadrant(info.yaw) as f32;
    f[obs_layout::POSE + 4] = clampf(info.pitch);
    f[obs_layout::VITALS] = clampf(info.life);
    f[obs_layout::VITALS + 1] = clampf(info.ticks_alive);

    info.has_target_tool = info.has_pickaxe(stage.target_tool);

    debug_assert!(f.iter().all(|v| v.is_finite() && v.abs() <= 100.0));
    (f, info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageSpec;
    use serde_json::json;

    fn grid_of(fill: &str) -> Vec<String> {
        vec![fill.to_string(); 75]
    }

    fn base_snapshot() -> Value {
        json!({
            "XPos": 0.5, "YPos": 4.0, "ZPos": 0.5,
            "Yaw": 180.0, "Pitch": 0.0,
            "Life": 20.0, "TimeAlive": 120,
            GRID_NAME: grid_of("air"),
        })
    }

    #[test]
    fn projection_has_fixed_width_and_is_clamped() {
        let mut snap = base_snapshot();
        snap["XPos"] = json!(1.0e9);
        snap["Pitch"] = json!(-540.0);
        snap["TimeAlive"] = json!(4_000_000u64);
        let (f, info) = project(Some(&snap), StageSpec::get(1));
        assert_eq!(f.len(), OBS_DIM);
        assert!(f.iter().all(|v| (-100.0..=100.0).contains(v)));
        assert!(info.valid);
    }

    #[test]
    fn missing_snapshot_is_all_zeros_and_invalid() {
        let (f, info) = project(None, StageSpec::get(2));
        assert!(f.iter().all(|v| *v == 0.0));
        assert!(!info.valid);
        assert!(!info.has_target_tool);
    }

    #[test]
    fn inventory_categories_merge_variants() {
        let mut snap = base_snapshot();
        snap["InventorySlot_0_item"] = json!("log");
        snap["InventorySlot_0_size"] = json!(2);
        snap["InventorySlot_1_item"] = json!("log2");
        snap["InventorySlot_1_size"] = json!(1);
        snap["InventorySlot_2_item"] = json!("cobblestone");
        snap["InventorySlot_2_size"] = json!(4);
        snap["InventorySlot_3_item"] = json!("iron_ingot");
        snap["InventorySlot_3_size"] = json!(2);
        snap["InventorySlot_4_item"] = json!("iron_ore");
        snap["InventorySlot_4_size"] = json!(1);
        snap["InventorySlot_5_item"] = json!("planks");
        snap["InventorySlot_5_size"] = json!(6);
        let (f, info) = project(Some(&snap), StageSpec::get(1));
        assert_eq!(info.wood, 3);
        assert_eq!(info.stone, 4);
        assert_eq!(info.iron, 3);
        assert_eq!(info.planks, 6);
        // Planks are craft intermediates, not wood.
        assert_eq!(f[obs_layout::COUNTS], 3.0);
    }

    #[test]
    fn list_inventory_fallback() {
        let mut snap = base_snapshot();
        snap["inventory"] = json!([
            {"type": "log", "quantity": 3},
            {"type": "wooden_pickaxe", "quantity": 1},
        ]);
        let (f, info) = project(Some(&snap), StageSpec::get(1));
        assert_eq!(info.wood, 3);
        assert!(info.has_pickaxe(ToolTier::Wooden));
        assert_eq!(f[obs_layout::TOOLS], 1.0);
    }

    #[test]
    fn target_tool_flag_tracks_stage() {
        let mut snap = base_snapshot();
        snap["InventorySlot_0_item"] = json!("wooden_pickaxe");
        let (_, info1) = project(Some(&snap), StageSpec::get(1));
        assert!(info1.has_target_tool);
        let (_, info2) = project(Some(&snap), StageSpec::get(2));
        assert!(!info2.has_target_tool);
    }

    #[test]
    fn front_cell_follows_yaw() {
        let mut grid = grid_of("air");
        // Feet layer (layer 1), cell one step north (-z) of center:
        // x offset 0 -> ix 2, z offset -1 -> iz 1.
        grid[2 + 5 * 1 + 25 * 1] = "iron_ore".to_string();
        let mut snap = base_snapshot();
        snap[GRID_NAME] = json!(grid);
        snap["Yaw"] = json!(180.0);
        let (_, info) = project(Some(&snap), StageSpec::get(3));
        assert_eq!(info.front_cell(), BlockKind::IronOre);

        snap["Yaw"] = json!(0.0);
        let (_, info) = project(Some(&snap), StageSpec::get(3));
        assert_eq!(info.front_cell(), BlockKind::Air);
    }

    #[test]
    fn tall_log_is_seen_at_head_height() {
        let mut grid = grid_of("air");
        // Head layer (layer 2), one step north.
        grid[2 + 5 * 1 + 25 * 2] = "log".to_string();
        let mut snap = base_snapshot();
        snap[GRID_NAME] = json!(grid);
        let (_, info) = project(Some(&snap), StageSpec::get(1));
        assert_eq!(info.front_cell(), BlockKind::Log);
    }

    #[test]
    fn hotbar_slots_are_recorded() {
        let mut snap = base_snapshot();
        snap["InventorySlot_0_item"] = json!("diamond_axe");
        snap["InventorySlot_1_item"] = json!("wooden_pickaxe");
        let (_, info) = project(Some(&snap), StageSpec::get(1));
        assert_eq!(info.hotbar_slot("wooden_pickaxe"), Some(1));
        assert_eq!(info.hotbar_slot("stone_pickaxe"), None);
        assert!(info.has_axe);
    }
}
