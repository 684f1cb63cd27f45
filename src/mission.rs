use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::fmt::Write;

use crate::stage::{BlockKind, StageSpec};

// =============================================================================
// Arena Geometry
// =============================================================================

pub const ARENA_MIN: i32 = -10;
pub const ARENA_MAX: i32 = 10;
pub const FLOOR_Y: i32 = 3;
pub const GROUND_Y: i32 = 4;
pub const WALL_TOP_Y: i32 = 10;
pub const SPAWN_CLEARANCE: i32 = 3;
pub const MISSION_TIME_LIMIT_MS: u32 = 120_000;

/// One generated resource block. `height` is the extra column above ground
/// (only non-zero for logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: i32,
    pub z: i32,
    pub kind: BlockKind,
    pub height: u32,
}

fn stage_rng(stage: &StageSpec, seed: u64) -> SmallRng {
    // Mix the stage id in so adjacent stages with the same seed still get
    // distinct worlds, while (stage, seed) stays fully deterministic.
    SmallRng::seed_from_u64(
        seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(stage.id as u64),
    )
}

/// Sample resource positions for a stage. Interior cells only, one block
/// class per `(x, z)` column, nothing within Manhattan distance 3 of spawn.
pub fn place_resources(stage: &StageSpec, seed: u64) -> Vec<Placement> {
    let mut rng = stage_rng(stage, seed);
    let mut occupied: HashSet<(i32, i32)> = HashSet::new();
    let mut out = Vec::new();

    let table = [
        (BlockKind::Log, stage.density.log),
        (BlockKind::Stone, stage.density.stone),
        (BlockKind::IronOre, stage.density.iron_ore),
        (BlockKind::DiamondOre, stage.density.diamond_ore),
    ];

    for (kind, (min, max)) in table {
        if max == 0 {
            continue;
        }
        let count = rng.random_range(min..=max);
        for _ in 0..count {
            loop {
                let x = rng.random_range(ARENA_MIN + 1..=ARENA_MAX - 1);
                let z = rng.random_range(ARENA_MIN + 1..=ARENA_MAX - 1);
                if occupied.contains(&(x, z)) {
                    continue;
                }
                if x.abs() + z.abs() <= SPAWN_CLEARANCE {
                    continue;
                }
                let height = if kind == BlockKind::Log {
                    // Heavy bias toward flat placement.
                    [0u32, 0, 1, 1, 2][rng.random_range(0..5)]
                } else {
                    0
                };
                occupied.insert((x, z));
                out.push(Placement { x, z, kind, height });
                break;
            }
        }
    }
    out
}

// =============================================================================
// Mission XML
// =============================================================================

/// Render the full mission description for `(stage, seed)`. Repeated calls
/// with the same arguments yield byte-identical documents.
pub fn build_mission_xml(stage: &StageSpec, seed: u64) -> String {
    let placements = place_resources(stage, seed);

    let mut draw = String::new();
    // Indestructible floor and four-walled enclosure.
    let _ = write!(
        draw,
        r#"<DrawCuboid x1="{lo}" y1="{fy}" z1="{lo}" x2="{hi}" y2="{fy}" z2="{hi}" type="bedrock"/>"#,
        lo = ARENA_MIN,
        hi = ARENA_MAX,
        fy = FLOOR_Y,
    );
    for (x1, z1, x2, z2) in [
        (ARENA_MIN, ARENA_MIN, ARENA_MIN, ARENA_MAX),
        (ARENA_MAX, ARENA_MIN, ARENA_MAX, ARENA_MAX),
        (ARENA_MIN, ARENA_MIN, ARENA_MAX, ARENA_MIN),
        (ARENA_MIN, ARENA_MAX, ARENA_MAX, ARENA_MAX),
    ] {
        let _ = write!(
            draw,
            r#"<DrawCuboid x1="{x1}" y1="{y1}" z1="{z1}" x2="{x2}" y2="{y2}" z2="{z2}" type="bedrock"/>"#,
            y1 = GROUND_Y,
            y2 = WALL_TOP_Y,
        );
    }
    for p in &placements {
        for dy in 0..=p.height {
            let _ = write!(
                draw,
                r#"<DrawBlock x="{x}" y="{y}" z="{z}" type="{ty}"/>"#,
                x = p.x,
                y = GROUND_Y + dy as i32,
                z = p.z,
                ty = p.kind.block_name(),
            );
        }
    }

    let mut inventory = String::new();
    for (slot, (item, _count)) in stage.start_inventory.iter().enumerate() {
        let _ = write!(inventory, r#"<InventoryItem slot="{slot}" type="{item}"/>"#);
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="no" ?>
<Mission xmlns="http://ProjectMalmo.microsoft.com" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <About><Summary>Tool progression stage {id} ({name}), seed {seed}</Summary></About>
  <ServerSection>
    <ServerInitialConditions>
      <Time><StartTime>6000</StartTime><AllowPassageOfTime>false</AllowPassageOfTime></Time>
      <Weather>clear</Weather>
      <AllowSpawning>false</AllowSpawning>
    </ServerInitialConditions>
    <ServerHandlers>
      <FlatWorldGenerator generatorString="3;7,2;1;"/>
      <DrawingDecorator>{draw}</DrawingDecorator>
      <ServerQuitFromTimeUp timeLimitMs="{time_limit}"/>
      <ServerQuitWhenAnyAgentFinishes/>
    </ServerHandlers>
  </ServerSection>
  <AgentSection mode="Survival">
    <Name>PickaxeBot</Name>
    <AgentStart>
      <Placement x="0.5" y="{ground}" z="0.5" yaw="180" pitch="0"/>
      <Inventory>{inventory}</Inventory>
    </AgentStart>
    <AgentHandlers>
      <ObservationFromFullStats/>
      <ObservationFromFullInventory flat="true"/>
      <ObservationFromHotBar/>
      <ObservationFromGrid>
        <Grid name="surroundings5x5"><min x="-2" y="-1" z="-2"/><max x="2" y="1" z="2"/></Grid>
      </ObservationFromGrid>
      <ObservationFromNearbyEntities><Range name="entities" xrange="5" yrange="3" zrange="5"/></ObservationFromNearbyEntities>
      <ObservationFromRecentCommands/>
      <ContinuousMovementCommands turnSpeedDegs="180"/>
      <DiscreteMovementCommands/>
      <SimpleCraftCommands/>
      <InventoryCommands/>
      <MissionQuitCommands/>
      <RewardForCollectingItem>
        <Item type="log" reward="20"/>
        <Item type="cobblestone" reward="20"/>
        <Item type="iron_ore" reward="25"/>
        <Item type="diamond" reward="50"/>
      </RewardForCollectingItem>
      <RewardForTouchingBlockType>
        <Block type="{target}" reward="5" behaviour="onceOnly"/>
      </RewardForTouchingBlockType>
      <RewardForSendingCommand reward="-1"/>
    </AgentHandlers>
  </AgentSection>
</Mission>
"#,
        id = stage.id,
        name = stage.name,
        seed = seed,
        draw = draw,
        time_limit = MISSION_TIME_LIMIT_MS,
        ground = GROUND_Y,
        inventory = inventory,
        target = stage.target_block.block_name(),
    )
}
