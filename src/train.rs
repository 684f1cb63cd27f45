use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::action::Action;
use crate::agent::{make_learner, Algo, Learner};
use crate::curriculum::Curriculum;
use crate::env::{EnvConfig, McEnv};
use crate::metrics::{ActionCounts, EpisodeRecord, MetricsWriter, METRICS_DIR};
use crate::reward::RewardConfig;
use crate::sim::{Simulator, TcpSimulator};
use crate::stage::StageSpec;

#[derive(Parser)]
pub struct TrainArgs {
    #[arg(long, value_enum)]
    pub algorithm: Algo,
    /// Starting stage; promotions move past it, stage 5 stays put.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub stage: u8,
    #[arg(long, default_value_t = 200)]
    pub episodes: u64,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    #[arg(long, default_value_t = 10001)]
    pub port: u16,
    /// Previous-stage weights to warm-start from.
    #[arg(long)]
    pub load_model: Option<PathBuf>,
    #[arg(long, default_value = "curriculum_logs")]
    pub checkpoint_dir: PathBuf,
    #[arg(long, default_value = "models")]
    pub model_dir: PathBuf,
    #[arg(long, default_value = METRICS_DIR)]
    pub metrics_dir: PathBuf,
    /// Local per-episode step guard; the mission time cap is the real limit.
    #[arg(long, default_value_t = 2000)]
    pub max_steps: u64,
}

/// Weight artifact path for one (algorithm, stage) pair.
pub fn model_path(dir: &Path, algo: Algo, stage: &StageSpec) -> PathBuf {
    dir.join(format!(
        "{}_{}_model.{}",
        algo.label(),
        stage.output_suffix(),
        algo.model_extension()
    ))
}

pub struct EpisodeStats {
    pub steps: u64,
    pub success: bool,
    pub total_reward: f64,
    pub actions: ActionCounts,
    pub collected: (u32, u32, u32, u32),
}

/// One full episode: reset, act until terminal, feed every transition back
/// to the learner.
pub fn run_episode<S: Simulator>(
    env: &mut McEnv<S>,
    learner: &mut dyn Learner,
    max_steps: u64,
) -> Result<EpisodeStats> {
    let mut obs = env.reset()?;
    let mut actions = ActionCounts::default();
    let mut success = false;
    let mut collected = (0, 0, 0, 0);
    let mut steps = 0u64;

    loop {
        let idx = learner.choose_action(&obs)?;
        let action = Action::from_index(idx);
        let step = env.step(action)?;
        learner.update(&obs, idx, step.reward, &step.obs, step.done)?;
        actions.record(action);
        steps += 1;
        obs = step.obs;

        if step.done {
            success = step.tool_crafted || step.info.has_target_tool;
            collected = (
                step.info.wood,
                step.info.stone,
                step.info.iron,
                step.info.diamond,
            );
            break;
        }
        if steps >= max_steps {
            env.close()?;
            break;
        }
    }

    Ok(EpisodeStats {
        steps,
        success,
        total_reward: env.total_reward,
        actions,
        collected,
    })
}

pub fn train(args: &TrainArgs) -> Result<()> {
    eprintln!("═══════════════════════════════════════════════════════════");
    eprintln!(
        "  TRAINING — {} on stage {} (port {})",
        args.algorithm, args.stage, args.port
    );
    eprintln!("═══════════════════════════════════════════════════════════");

    let sim = TcpSimulator::connect(args.port)
        .with_context(|| format!("Failed to reach simulator on port {}", args.port))?;
    let mut curriculum = Curriculum::resume(args.stage, &args.checkpoint_dir);
    let mut stage = curriculum.stage();

    let mut learner = make_learner(args.algorithm, args.seed)?;
    if let Some(path) = &args.load_model {
        learner.load(path)?;
        eprintln!("Warm-started from {}", path.display());
    }
    learner.set_exploration_scale(stage.adaptation().1);

    let mut env = McEnv::new(
        sim,
        stage,
        args.seed,
        EnvConfig::default(),
        RewardConfig::default(),
    );
    let mut metrics = MetricsWriter::create(&args.metrics_dir, args.algorithm, stage)?;

    let t_start = Instant::now();
    for episode in 1..=args.episodes {
        let stats = run_episode(&mut env, learner.as_mut(), args.max_steps)?;
        learner.end_episode();
        curriculum.log_episode(stats.success, stats.total_reward);
        curriculum.save()?;

        metrics.append(&EpisodeRecord {
            episode: curriculum.total_episodes(),
            steps: stats.steps,
            success: stats.success,
            wood: stats.collected.0,
            stone: stats.collected.1,
            iron: stats.collected.2,
            diamond: stats.collected.3,
            total_reward: stats.total_reward,
            exploration: learner.exploration(),
            actions: stats.actions,
        })?;

        if episode % 10 == 0 {
            let progress = curriculum.progress();
            tracing::info!(
                algo = %args.algorithm,
                stage = stage.id,
                episode,
                recent_rate = format!("{:.2}", progress.recent_success_rate()),
                total_reward = format!("{:.1}", stats.total_reward),
                exploration = format!("{:.3}", learner.exploration()),
                elapsed_s = t_start.elapsed().as_secs(),
                "training progress"
            );
        }

        let (advance, reason) = curriculum.should_advance();
        if advance {
            let artifact = model_path(&args.model_dir, args.algorithm, stage);
            learner.save(&artifact)?;
            eprintln!("═══════════════════════════════════════════════════════════");
            eprintln!(
                "  PROMOTED: stage {} cleared ({})",
                stage.id,
                reason.unwrap_or_default()
            );
            eprintln!("  weights saved to {}", artifact.display());
            eprintln!("═══════════════════════════════════════════════════════════");

            stage = curriculum.advance();
            curriculum.save()?;
            env.set_stage(stage);
            learner.set_exploration_scale(stage.adaptation().1);
            metrics = MetricsWriter::create(&args.metrics_dir, args.algorithm, stage)?;
        }
    }

    let artifact = model_path(&args.model_dir, args.algorithm, stage);
    learner.save(&artifact)?;
    env.close()?;
    eprintln!(
        "Done: {} episodes, final stage {}, weights at {}",
        args.episodes,
        stage.id,
        artifact.display()
    );
    Ok(())
}

// =============================================================================
// Evaluation
// =============================================================================

#[derive(Parser)]
pub struct EvalArgs {
    #[arg(long, value_enum)]
    pub algorithm: Algo,
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub stage: u8,
    #[arg(long, default_value_t = 10)]
    pub episodes: u64,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    #[arg(long, default_value_t = 10001)]
    pub port: u16,
    #[arg(long)]
    pub model: PathBuf,
    #[arg(long, default_value_t = 2000)]
    pub max_steps: u64,
}

pub struct EvalStats {
    pub episodes: u64,
    pub success_rate: f64,
    pub avg_reward: f64,
    pub avg_steps: f64,
}

pub fn run_eval<S: Simulator>(
    env: &mut McEnv<S>,
    learner: &mut dyn Learner,
    episodes: u64,
    max_steps: u64,
) -> Result<EvalStats> {
    // Greedy policy throughout.
    learner.set_exploration_scale(0.0);

    let episodes = episodes.max(1);
    let mut successes = 0u64;
    let mut total_reward = 0.0;
    let mut total_steps = 0u64;
    for _ in 0..episodes {
        let mut obs = env.reset()?;
        let mut steps = 0u64;
        loop {
            let idx = learner.choose_action(&obs)?;
            let step = env.step(Action::from_index(idx))?;
            steps += 1;
            obs = step.obs;
            if step.done {
                if step.tool_crafted || step.info.has_target_tool {
                    successes += 1;
                }
                break;
            }
            if steps >= max_steps {
                env.close()?;
                break;
            }
        }
        total_reward += env.total_reward;
        total_steps += steps;
    }

    Ok(EvalStats {
        episodes,
        success_rate: successes as f64 / episodes as f64,
        avg_reward: total_reward / episodes as f64,
        avg_steps: total_steps as f64 / episodes as f64,
    })
}

pub fn eval(args: &EvalArgs) -> Result<()> {
    let sim = TcpSimulator::connect(args.port)
        .with_context(|| format!("Failed to reach simulator on port {}", args.port))?;
    let stage = StageSpec::get(args.stage);
    let mut learner = make_learner(args.algorithm, args.seed)?;
    learner.load(&args.model)?;

    let mut env = McEnv::new(
        sim,
        stage,
        args.seed,
        EnvConfig::default(),
        RewardConfig::default(),
    );
    let stats = run_eval(&mut env, learner.as_mut(), args.episodes, args.max_steps)?;

    eprintln!("═══════════════════════════════════════════════════════════");
    eprintln!("  EVAL — {} on stage {}", args.algorithm, stage.id);
    eprintln!("  episodes:     {}", stats.episodes);
    eprintln!("  success rate: {:.2}", stats.success_rate);
    eprintln!("  avg reward:   {:.1}", stats.avg_reward);
    eprintln!("  avg steps:    {:.1}", stats.avg_steps);
    eprintln!("═══════════════════════════════════════════════════════════");
    Ok(())
}
