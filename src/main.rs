// =============================================================================
// Minecraft Tool-Progression Curriculum — RL Training Harness
// =============================================================================
// Build & Run:
//   cargo build --release
//   cargo run --release -- train --algorithm q_learning --stage 1 --port 10001
//   cargo run --release -- launch --stage 1 --episodes 200
//   cargo run --release -- eval --algorithm q_learning --stage 2 \
//       --model models/q_learning_stage2_model.bin

use anyhow::Result;
use clap::{Parser, Subcommand};

use pickaxe_rl::launcher::{launch, LaunchArgs};
use pickaxe_rl::train::{eval, train, EvalArgs, TrainArgs};

#[derive(Parser)]
#[command(name = "pickaxe-rl", about = "Minecraft tool-progression curriculum RL harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train one algorithm against one simulator port
    Train(TrainArgs),
    /// Train the whole algorithm roster in parallel child processes
    Launch(LaunchArgs),
    /// Evaluate saved weights with a greedy policy
    Eval(EvalArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Train(args) => train(args),
        Commands::Launch(args) => launch(args),
        Commands::Eval(args) => eval(args),
    }
}
