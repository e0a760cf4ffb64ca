//! Integration tests: a miniature end-to-end training run.
//!
//! These exercise the full pipeline: episode rollout -> replay -> gradient
//! updates -> checkpoint -> policy table export. Hyperparameters are scaled
//! down so the run finishes in test time; nothing here asserts play quality,
//! only that the pipeline holds its contracts.

use blackjack_core::GameConfig;
use blackjack_dqn::config::{DqnConfig, Exploration, PerConfig};
use blackjack_dqn::export::PolicyTable;
use blackjack_dqn::trainer::DqnTrainer;

/// Training config small enough for an integration test.
fn smoke_config(seed: u64) -> DqnConfig {
    DqnConfig {
        num_episodes: 200,
        batch_size: 32,
        replay_capacity: 5_000,
        warmup: 64,
        target_sync_steps: 25,
        updates_per_episode: 1,
        hidden_dim: 32,
        exploration: Exploration::Noisy { sigma_init: 0.5 },
        per: PerConfig {
            beta_frames: 200,
            ..PerConfig::default()
        },
        seed,
        ..DqnConfig::default()
    }
}

#[test]
fn train_checkpoint_and_export() {
    let game = GameConfig::default();
    let config = smoke_config(42);
    let episodes = config.num_episodes;
    let mut trainer = DqnTrainer::new(game, config).unwrap();

    let mut total_reward = 0.0f32;
    for _ in 0..episodes {
        let outcome = trainer.run_episode().unwrap();
        assert!(outcome.reward.is_finite());
        total_reward += outcome.reward;
    }

    assert!(trainer.steps() > 0, "training must have started");
    // Naturals end a round with no decision point, so not every episode
    // logs a transition; the bulk of them do.
    assert!(
        trainer.replay_len() >= 150,
        "expected most episodes to log transitions, got {}",
        trainer.replay_len()
    );
    // Per-hand rewards are clipped to the unit stake.
    let mean = total_reward / 200.0;
    assert!((-1.0..=1.0).contains(&mean), "mean reward {mean} out of range");

    // Checkpoint, then rebuild the table from the restored weights: both
    // tables must be byte-identical.
    let dir = std::env::temp_dir().join("blackjack_dqn_smoke");
    std::fs::create_dir_all(&dir).unwrap();
    let weights = dir.join("policy.safetensors");
    trainer.save_weights(&weights).unwrap();

    let table =
        PolicyTable::from_network(trainer.policy(), trainer.encoder(), trainer.device()).unwrap();

    let mut restored = DqnTrainer::new(GameConfig::default(), smoke_config(99)).unwrap();
    restored.load_weights(&weights).unwrap();
    let restored_table =
        PolicyTable::from_network(restored.policy(), restored.encoder(), restored.device())
            .unwrap();

    assert_eq!(
        table, restored_table,
        "a checkpoint round-trip must reproduce the exported table"
    );

    // All three formats materialize; the binary one round-trips.
    let bin = dir.join("policy.bin");
    table.write_binary(&bin).unwrap();
    assert_eq!(PolicyTable::load_binary(&bin).unwrap(), table);
    table.write_csv(dir.join("policy.csv")).unwrap();
    table.write_c_header(dir.join("policy.h")).unwrap();

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn greedy_eval_runs_after_training() {
    let mut trainer = DqnTrainer::new(GameConfig::default(), smoke_config(7)).unwrap();
    for _ in 0..120 {
        trainer.run_episode().unwrap();
    }
    let mean = trainer.evaluate(100).unwrap();
    // An untrained-to-barely-trained policy still cannot do better than
    // blackjack allows or worse than losing every doubled hand.
    assert!((-2.0..=1.5).contains(&mean), "eval reward {mean} out of range");
}
