use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::action::Action;
use crate::agent::Algo;
use crate::stage::StageSpec;

pub const METRICS_DIR: &str = "resultados";

/// Step counts grouped by command family.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionCounts {
    pub movement: u64,
    pub turn: u64,
    pub pitch: u64,
    pub attack: u64,
    pub craft: u64,
}

impl ActionCounts {
    pub fn record(&mut self, action: Action) {
        match action.category() {
            "move" => self.movement += 1,
            "turn" => self.turn += 1,
            "pitch" => self.pitch += 1,
            "attack" => self.attack += 1,
            _ => self.craft += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EpisodeRecord {
    pub episode: u64,
    pub steps: u64,
    pub success: bool,
    pub wood: u32,
    pub stone: u32,
    pub iron: u32,
    pub diamond: u32,
    pub total_reward: f64,
    pub exploration: f64,
    pub actions: ActionCounts,
}

impl EpisodeRecord {
    fn reward_per_step(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            self.total_reward / self.steps as f64
        }
    }
}

/// Appends one CSV row per episode to
/// `resultados/{algo}_{stage_suffix}_metrics.csv`.
pub struct MetricsWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl MetricsWriter {
    pub fn create(dir: &Path, algo: Algo, stage: &StageSpec) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("{}_{}_metrics.csv", algo.label(), stage.output_suffix()));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(
            out,
            "episode,steps,success,wood,stone,iron,diamond,total_reward,reward_per_step,exploration,moves,turns,pitches,attacks,crafts"
        )?;
        Ok(Self { path, out })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, rec: &EpisodeRecord) -> Result<()> {
        writeln!(
            self.out,
            "{},{},{},{},{},{},{},{:.2},{:.4},{:.4},{},{},{},{},{}",
            rec.episode,
            rec.steps,
            rec.success as u8,
            rec.wood,
            rec.stone,
            rec.iron,
            rec.diamond,
            rec.total_reward,
            rec.reward_per_step(),
            rec.exploration,
            rec.actions.movement,
            rec.actions.turn,
            rec.actions.pitch,
            rec.actions.attack,
            rec.actions.craft,
        )?;
        // Rows survive a crash mid-run.
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_action_categories() {
        let mut counts = ActionCounts::default();
        counts.record(Action::Forward);
        counts.record(Action::StrafeLeft);
        counts.record(Action::TurnRight);
        counts.record(Action::PitchUp);
        counts.record(Action::Attack);
        counts.record(Action::CraftWoodenPickaxe);
        assert_eq!(counts.movement, 2);
        assert_eq!(counts.turn, 1);
        assert_eq!(counts.pitch, 1);
        assert_eq!(counts.attack, 1);
        assert_eq!(counts.craft, 1);
    }

    #[test]
    fn rows_append_under_header() {
        let dir = std::env::temp_dir().join(format!("pickaxe-metrics-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let mut w = MetricsWriter::create(&dir, Algo::QLearning, StageSpec::get(1)).unwrap();
        w.append(&EpisodeRecord {
            episode: 1,
            steps: 10,
            success: true,
            wood: 3,
            total_reward: 10_500.0,
            exploration: 0.9,
            ..Default::default()
        })
        .unwrap();
        w.append(&EpisodeRecord {
            episode: 2,
            steps: 0,
            ..Default::default()
        })
        .unwrap();

        let raw = std::fs::read_to_string(w.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("episode,steps,success"));
        assert!(lines[1].starts_with("1,10,1,3,"));
        // Zero steps must not divide by zero.
        assert!(lines[2].contains(",0.0000,"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
