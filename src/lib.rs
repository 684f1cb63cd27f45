pub const OBS_DIM: usize = 117;
pub type Features = [f32; OBS_DIM];

/// Layout of the feature vector. The same offsets hold in every stage so
/// that weights and Q-tables transfer across the curriculum.
pub mod obs_layout {
    /// 5x5x3 neighborhood occupancy grid, flattened (x fastest, then z, then y).
    pub const GRID: usize = 0;
    pub const GRID_LEN: usize = 75;
    /// Inventory counts: wood, stone, iron, diamond.
    pub const COUNTS: usize = 75;
    /// Pickaxe presence flags: wooden, stone, iron, diamond, golden.
    pub const TOOLS: usize = 79;
    /// Agent pose: x, y, z, facing quadrant (0..4), pitch.
    pub const POSE: usize = 84;
    /// Vitals: life, ticks alive.
    pub const VITALS: usize = 89;
    /// First zero-padded index.
    pub const PAD: usize = 91;
}

pub mod action;
pub mod agent;
pub mod craft;
pub mod curriculum;
pub mod dqn;
pub mod env;
pub mod launcher;
pub mod metrics;
pub mod mission;
pub mod obs;
pub mod reward;
pub mod sim;
pub mod stage;
pub mod train;

pub use action::Action;
pub use agent::{Algo, Learner, RandomAgent, TabularAgent};
pub use craft::{CraftEngine, CraftOutcome};
pub use curriculum::{Curriculum, CurriculumCheckpoint, StageProgress};
pub use dqn::{DeepQAgent, DeepQConfig};
pub use env::{EnvConfig, McEnv, PitchGuard, StepResult};
pub use mission::build_mission_xml;
pub use obs::{ObsInfo, project};
pub use reward::{RewardBreakdown, RewardConfig, RewardTracker, StepEvents};
pub use sim::{Simulator, TcpSimulator};
pub use stage::{BlockKind, StageSpec, ToolTier};
