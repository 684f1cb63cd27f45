use anyhow::{Context, Result};
use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::Algo;
use crate::stage::StageSpec;
use crate::train::model_path;

pub const BASE_PORT: u16 = 10001;

#[derive(Parser)]
pub struct LaunchArgs {
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub stage: u8,
    #[arg(long, default_value_t = 200)]
    pub episodes: u64,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// First simulator port; each algorithm gets base + rank.
    #[arg(long, default_value_t = BASE_PORT)]
    pub base_port: u16,
    #[arg(long, default_value = "models")]
    pub model_dir: PathBuf,
    #[arg(long, default_value = "launcher_logs")]
    pub log_dir: PathBuf,
}

pub fn port_for(base: u16, rank: usize) -> u16 {
    base + rank as u16
}

/// Previous-stage weights for warm-starting, when the artifact exists.
pub fn warm_start_path(model_dir: &Path, algo: Algo, stage: &StageSpec) -> Option<PathBuf> {
    if stage.id <= 1 {
        return None;
    }
    let prev = StageSpec::get(stage.id - 1);
    let path = model_path(model_dir, algo, prev);
    path.exists().then_some(path)
}

struct Worker {
    algo: Algo,
    port: u16,
    child: Child,
    exit_code: Option<i32>,
}

fn spawn_worker(
    exe: &Path,
    args: &LaunchArgs,
    stage: &StageSpec,
    algo: Algo,
    rank: usize,
) -> Result<Worker> {
    let port = port_for(args.base_port, rank);
    let log_path = args
        .log_dir
        .join(format!("{}_{}.log", algo.label(), stage.output_suffix()));
    let log = File::create(&log_path)
        .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;
    let err_log = log.try_clone()?;

    let mut cmd = Command::new(exe);
    cmd.arg("train")
        .arg("--algorithm")
        .arg(algo.label())
        .arg("--stage")
        .arg(stage.id.to_string())
        .arg("--episodes")
        .arg(args.episodes.to_string())
        .arg("--seed")
        .arg((args.seed + rank as u64).to_string())
        .arg("--port")
        .arg(port.to_string())
        .arg("--model-dir")
        .arg(&args.model_dir)
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err_log));
    if let Some(weights) = warm_start_path(&args.model_dir, algo, stage) {
        cmd.arg("--load-model").arg(&weights);
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn trainer for {}", algo.label()))?;
    tracing::info!(algo = algo.label(), port, pid = child.id(), "spawned trainer");
    Ok(Worker {
        algo,
        port,
        child,
        exit_code: None,
    })
}

/// One trainer per roster algorithm, each on its own port; exit is success
/// only when every child exited zero.
pub fn launch(args: &LaunchArgs) -> Result<()> {
    let stage = StageSpec::get(args.stage);
    std::fs::create_dir_all(&args.log_dir)
        .with_context(|| format!("Failed to create {}", args.log_dir.display()))?;
    let exe = std::env::current_exe().context("Failed to locate own executable")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))?;

    let mut workers = Vec::with_capacity(Algo::ROSTER.len());
    for (rank, algo) in Algo::ROSTER.into_iter().enumerate() {
        workers.push(spawn_worker(&exe, args, stage, algo, rank)?);
    }
    eprintln!(
        "Launched {} trainers on stage {} (ports {}..={})",
        workers.len(),
        stage.id,
        args.base_port,
        port_for(args.base_port, workers.len() - 1),
    );

    let poll = Duration::from_secs(2);
    let mut last_logged = usize::MAX;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            eprintln!("Interrupt received, terminating trainers");
            for w in &mut workers {
                if w.exit_code.is_none() {
                    let _ = w.child.kill();
                    let _ = w.child.wait();
                }
            }
            anyhow::bail!("interrupted");
        }

        let mut finished = 0;
        for w in &mut workers {
            if w.exit_code.is_none() {
                if let Some(status) = w.child.try_wait()? {
                    let code = status.code().unwrap_or(-1);
                    w.exit_code = Some(code);
                    tracing::info!(algo = w.algo.label(), port = w.port, code, "trainer exited");
                }
            }
            if w.exit_code.is_some() {
                finished += 1;
            }
        }
        if finished != last_logged {
            tracing::info!(finished, total = workers.len(), "trainer completion");
            last_logged = finished;
        }
        if finished == workers.len() {
            break;
        }
        std::thread::sleep(poll);
    }

    let failed: Vec<String> = workers
        .iter()
        .filter(|w| w.exit_code != Some(0))
        .map(|w| format!("{} (code {:?})", w.algo.label(), w.exit_code))
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("trainers failed: {}", failed.join(", "));
    }
    eprintln!("All {} trainers completed successfully", workers.len());
    Ok(())
}
