use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::PathBuf;

use crate::stage::StageSpec;

/// Ring size for the recent-outcome window.
pub const SUCCESS_HISTORY: usize = 50;
pub const CHECKPOINT_FILE: &str = "curriculum_checkpoint.json";

/// Fraction of `min_episodes` that must complete before promotion is even
/// considered.
const MIN_EPISODE_FRACTION: f64 = 0.3;
/// Slack added to the threshold when falling back to the overall rate.
const OVERALL_SLACK: f64 = 0.05;

// =============================================================================
// Per-Stage Progress
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageProgress {
    pub episodes: u32,
    pub successes: u32,
    pub total_reward: f64,
    /// Last `SUCCESS_HISTORY` outcomes, oldest first.
    pub history: VecDeque<u8>,
}

impl StageProgress {
    fn record(&mut self, success: bool, total_reward: f64) {
        self.episodes += 1;
        if success {
            self.successes += 1;
        }
        self.total_reward += total_reward;
        if self.history.len() == SUCCESS_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(success as u8);
    }

    pub fn recent_success_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let wins: u32 = self.history.iter().map(|&v| v as u32).sum();
        wins as f64 / self.history.len() as f64
    }

    pub fn overall_success_rate(&self) -> f64 {
        if self.episodes == 0 {
            return 0.0;
        }
        self.successes as f64 / self.episodes as f64
    }
}

// =============================================================================
// Checkpoint Record
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumCheckpoint {
    pub current_stage: u8,
    pub total_episodes: u64,
    pub promoted: [bool; 4],
    pub stages: BTreeMap<u8, StageProgress>,
}

// =============================================================================
// Curriculum Controller
// =============================================================================

pub struct Curriculum {
    current: u8,
    total_episodes: u64,
    /// Latch per promotion-sequence stage; a stage promotes at most once.
    promoted: [bool; 4],
    stages: BTreeMap<u8, StageProgress>,
    dir: PathBuf,
}

impl Curriculum {
    pub fn new(start_stage: u8, dir: impl Into<PathBuf>) -> Self {
        // Validates the id.
        let _ = StageSpec::get(start_stage);
        Self {
            current: start_stage,
            total_episodes: 0,
            promoted: [false; 4],
            stages: BTreeMap::new(),
            dir: dir.into(),
        }
    }

    /// Resume from a checkpoint in `dir` when one exists, otherwise start
    /// fresh at `start_stage`. A checkpoint that cannot be read or parsed is
    /// treated as absent: the run restarts from `start_stage` with no history
    /// rather than aborting.
    pub fn resume(start_stage: u8, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(CHECKPOINT_FILE);
        if !path.exists() {
            return Self::new(start_stage, dir);
        }
        let record = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                serde_json::from_str::<CurriculumCheckpoint>(&raw).map_err(|e| e.to_string())
            });
        let record = match record {
            Ok(r) if StageSpec::try_get(r.current_stage).is_some() => r,
            Ok(r) => {
                tracing::warn!(
                    path = %path.display(),
                    stage = r.current_stage,
                    "checkpoint names an unknown stage, restarting fresh"
                );
                return Self::new(start_stage, dir);
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "checkpoint unreadable, restarting fresh"
                );
                return Self::new(start_stage, dir);
            }
        };
        tracing::info!(
            stage = record.current_stage,
            total_episodes = record.total_episodes,
            "resuming curriculum from checkpoint"
        );
        Self {
            current: record.current_stage,
            total_episodes: record.total_episodes,
            promoted: record.promoted,
            stages: record.stages,
            dir,
        }
    }

    pub fn stage(&self) -> &'static StageSpec {
        StageSpec::get(self.current)
    }

    pub fn total_episodes(&self) -> u64 {
        self.total_episodes
    }

    pub fn progress(&self) -> StageProgress {
        self.stages.get(&self.current).cloned().unwrap_or_default()
    }

    pub fn log_episode(&mut self, success: bool, total_reward: f64) {
        self.total_episodes += 1;
        self.stages
            .entry(self.current)
            .or_default()
            .record(success, total_reward);
    }

    /// Promotion check for the current stage.
    ///
    /// Returns `(should_advance, reason_message)`.
    pub fn should_advance(&self) -> (bool, Option<String>) {
        // Stage 4 is the end of the sequence; stage 5 is standalone.
        if self.current >= 4 {
            return (false, None);
        }
        if self.promoted[(self.current - 1) as usize] {
            return (false, None);
        }
        let stage = self.stage();
        let progress = match self.stages.get(&self.current) {
            Some(p) => p,
            None => return (false, None),
        };
        let min = (MIN_EPISODE_FRACTION * stage.min_episodes as f64).ceil() as u32;
        if progress.episodes < min {
            return (false, None);
        }

        let recent = progress.recent_success_rate();
        let overall = progress.overall_success_rate();
        if recent >= stage.success_threshold {
            (
                true,
                Some(format!(
                    "recent success rate {recent:.2} >= {:.2}",
                    stage.success_threshold
                )),
            )
        } else if overall >= stage.success_threshold + OVERALL_SLACK {
            (
                true,
                Some(format!(
                    "overall success rate {overall:.2} >= {:.2}",
                    stage.success_threshold + OVERALL_SLACK
                )),
            )
        } else {
            (false, None)
        }
    }

    /// Latch the promotion and move to the next stage. Returns the new stage.
    pub fn advance(&mut self) -> &'static StageSpec {
        assert!(self.current < 4, "no promotion beyond stage 4");
        self.promoted[(self.current - 1) as usize] = true;
        self.current += 1;
        tracing::info!(stage = self.current, "curriculum promoted");
        self.stage()
    }

    fn to_checkpoint(&self) -> CurriculumCheckpoint {
        CurriculumCheckpoint {
            current_stage: self.current,
            total_episodes: self.total_episodes,
            promoted: self.promoted,
            stages: self.stages.clone(),
        }
    }

    /// Whole-file atomic rewrite; crash-safe at episode boundaries.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join(CHECKPOINT_FILE);
        let tmp = self.dir.join(format!("{CHECKPOINT_FILE}.tmp"));
        let json = serde_json::to_string_pretty(&self.to_checkpoint())?;
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write checkpoint: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace checkpoint: {}", path.display()))?;
        Ok(())
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }
}
