//! Training CLI: simulate, learn, and export the policy table.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use blackjack_core::GameConfig;
use blackjack_dqn::config::DqnConfig;
use blackjack_dqn::export::PolicyTable;
use blackjack_dqn::trainer::DqnTrainer;

/// File name prefix for the exported table formats.
const EXPORT_PREFIX: &str = "blackjack_policy";

#[derive(Parser)]
#[command(name = "blackjack-trainer")]
#[command(about = "Card-counting blackjack DQN: training and policy-table export")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
enum Commands {
    /// Train a policy from scratch, then export weights and policy table.
    Train {
        /// YAML config file (game + dqn sections); defaults apply if omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of episodes (overrides config).
        #[arg(long)]
        episodes: Option<u64>,
        /// Output directory for weights and table formats.
        #[arg(short, long, default_value = "exports")]
        output: PathBuf,
        /// Greedy-evaluation hands per progress report (0 disables).
        #[arg(long, default_value_t = 500)]
        eval_hands: u32,
    },
    /// Rebuild the policy table from a saved safetensors checkpoint.
    Export {
        /// YAML config file; must match the checkpoint's architecture.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Safetensors checkpoint written by `train`.
        #[arg(short, long)]
        weights: PathBuf,
        /// Output directory for the table formats.
        #[arg(short, long, default_value = "exports")]
        output: PathBuf,
    },
}

/// Combined configuration file: table rules plus training hyperparameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TrainingConfig {
    game: GameConfig,
    dqn: DqnConfig,
}

impl TrainingConfig {
    fn load(path: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Ok(serde_yaml::from_str(&content)?)
            }
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            episodes,
            output,
            eval_hands,
        } => run_train(config.as_deref(), episodes, &output, eval_hands),
        Commands::Export {
            config,
            weights,
            output,
        } => run_export(config.as_deref(), &weights, &output),
    }
}

// ---------------------------------------------------------------------------
// Train
// ---------------------------------------------------------------------------

#[allow(clippy::cast_precision_loss)]
fn run_train(
    config_path: Option<&Path>,
    episodes_override: Option<u64>,
    output: &Path,
    eval_hands: u32,
) -> Result<(), Box<dyn Error>> {
    let mut config = TrainingConfig::load(config_path)?;
    if let Some(episodes) = episodes_override {
        config.dqn.num_episodes = episodes;
    }
    let episodes = config.dqn.num_episodes;
    let mut trainer = DqnTrainer::new(config.game, config.dqn)?;

    let pb = ProgressBar::new(episodes);
    pb.set_style(
        ProgressStyle::with_template(
            "{elapsed_precise} {bar:40.cyan/blue} {pos}/{len} {msg}",
        )?
        .progress_chars("##-"),
    );

    let report_every = (episodes / 50).max(1);
    let start = Instant::now();
    let mut window_reward = 0.0f64;
    let mut smoothed_loss = 0.0f32;

    for episode in 1..=episodes {
        let outcome = trainer.run_episode()?;
        window_reward += f64::from(outcome.reward);
        if let Some(loss) = outcome.loss {
            smoothed_loss = if smoothed_loss == 0.0 {
                loss
            } else {
                0.9 * smoothed_loss + 0.1 * loss
            };
        }

        if episode % report_every == 0 {
            let avg_reward = window_reward / report_every as f64;
            window_reward = 0.0;
            let eval = if eval_hands > 0 {
                format!(" evalR={:.3}", trainer.evaluate(eval_hands)?)
            } else {
                String::new()
            };
            let eps_per_sec = episode as f64 / start.elapsed().as_secs_f64();
            pb.set_message(format!(
                "avgR={avg_reward:.3}{eval} loss={smoothed_loss:.4} steps={} replay={} ep/s={eps_per_sec:.0}",
                trainer.steps(),
                trainer.replay_len(),
            ));
        }
        pb.inc(1);
    }
    pb.finish();

    std::fs::create_dir_all(output)?;
    let weights_path = output.join(format!("{EXPORT_PREFIX}.safetensors"));
    trainer.save_weights(&weights_path)?;
    write_table(&trainer, output)?;
    println!(
        "trained {episodes} episodes in {:.1}s; artifacts in {}",
        start.elapsed().as_secs_f64(),
        output.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

fn run_export(
    config_path: Option<&Path>,
    weights: &Path,
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let config = TrainingConfig::load(config_path)?;
    let mut trainer = DqnTrainer::new(config.game, config.dqn)?;
    trainer.load_weights(weights)?;

    std::fs::create_dir_all(output)?;
    write_table(&trainer, output)?;
    println!("exported policy table to {}", output.display());
    Ok(())
}

/// Build the table from the trainer's policy network and write all three
/// formats next to each other.
fn write_table(trainer: &DqnTrainer, output: &Path) -> Result<(), Box<dyn Error>> {
    let table = PolicyTable::from_network(trainer.policy(), trainer.encoder(), trainer.device())?;
    table.write_binary(output.join(format!("{EXPORT_PREFIX}.bin")))?;
    table.write_csv(output.join(format!("{EXPORT_PREFIX}.csv")))?;
    table.write_c_header(output.join(format!("{EXPORT_PREFIX}.h")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
