//! End-to-end training integration tests
//!
//! Drives the full pipeline — iterator, worker pool, barrier reduction,
//! accumulation, optimizer — on a small deterministic corpus and checks the
//! step-count and convergence contracts.

use std::sync::Arc;
use tejer::model::{Model, ModelConfig};
use tejer::optim::{Adam, Sgd};
use tejer::train::{BatchIterator, ThreadedTrainer, TrainConfig};

/// 128 tokens with exact next-token structure: t[i+1] = (t[i] + 17) mod 31
fn fixed_corpus() -> Arc<[u32]> {
    (0..128u64).map(|i| ((i * 17) % 31) as u32).collect()
}

fn two_layer_model(seed: u64) -> Model {
    Model::new(&ModelConfig::new(32, 16, 32, 2), seed).unwrap()
}

#[test]
fn test_epoch_applies_one_update_per_batch() {
    let iterator = BatchIterator::new(fixed_corpus(), 4, 8, false, false).unwrap();
    assert_eq!(iterator.num_batches(), 30); // ceil((128 - 8) / 4)

    let mut trainer = ThreadedTrainer::new(
        two_layer_model(42),
        iterator,
        Box::new(Adam::default_params(5e-3)),
        TrainConfig::new().with_num_threads(4),
    )
    .unwrap();

    trainer.run_epoch().unwrap();
    assert_eq!(trainer.metrics().batches, 30);
    assert_eq!(trainer.metrics().optimizer_steps, 30);

    // Every window covered exactly once
    let rows: usize = trainer
        .stats()
        .workers
        .iter()
        .map(|w| w.rows_processed)
        .sum();
    assert_eq!(rows, 120);

    trainer.shutdown().unwrap();
}

#[test]
fn test_loss_decreases_over_epochs_on_persistent_system() {
    // One system reused across epochs; the pool is spawned once
    let iterator = BatchIterator::new(fixed_corpus(), 4, 8, false, false).unwrap();
    let mut trainer = ThreadedTrainer::new(
        two_layer_model(42),
        iterator,
        Box::new(Adam::default_params(5e-3)),
        TrainConfig::new().with_num_threads(4),
    )
    .unwrap();

    let losses: Vec<f32> = (0..5).map(|_| trainer.run_epoch().unwrap()).collect();
    assert_eq!(trainer.metrics().optimizer_steps, 150);
    assert_eq!(trainer.metrics().losses, losses);

    for window in losses.windows(2) {
        assert!(
            window[1] < window[0] + 1e-3,
            "loss increased: {losses:?}"
        );
    }
    assert!(
        losses[4] < losses[0] - 0.2,
        "no meaningful improvement: {losses:?}"
    );

    // The pool itself persisted: every worker saw all 150 steps
    for worker in &trainer.stats().workers {
        assert_eq!(worker.batches_processed, 150);
        assert_eq!(worker.rows_skipped, 0);
    }

    trainer.shutdown().unwrap();
}

#[test]
fn test_accumulation_window_reduces_update_count() {
    let iterator = BatchIterator::new(fixed_corpus(), 4, 8, false, false).unwrap();
    let mut trainer = ThreadedTrainer::new(
        two_layer_model(7),
        iterator,
        Box::new(Adam::default_params(5e-3)),
        TrainConfig::new().with_num_threads(4).with_accumulation_steps(3),
    )
    .unwrap();

    trainer.run_epoch().unwrap();
    // 30 batches with a window of 3 -> exactly 10 updates
    assert_eq!(trainer.metrics().batches, 30);
    assert_eq!(trainer.metrics().optimizer_steps, 10);
    assert!(trainer.grads().is_all_zero());

    trainer.shutdown().unwrap();
}

#[test]
fn test_worker_counts_match_request() {
    for requested in [0usize, 1, 3] {
        let iterator = BatchIterator::new(fixed_corpus(), 4, 8, false, false).unwrap();
        let trainer = ThreadedTrainer::new(
            two_layer_model(1),
            iterator,
            Box::new(Sgd::new(0.1)),
            TrainConfig::new().with_num_threads(requested),
        )
        .unwrap();
        assert_eq!(trainer.num_workers(), requested.max(1));
        trainer.shutdown().unwrap();
    }
}

#[test]
fn test_thread_count_does_not_change_training_result() {
    let run = |threads: usize| -> Vec<f32> {
        let iterator = BatchIterator::new(fixed_corpus(), 4, 8, false, false).unwrap();
        let mut trainer = ThreadedTrainer::new(
            two_layer_model(11),
            iterator,
            Box::new(Sgd::new(0.1)),
            TrainConfig::new().with_num_threads(threads),
        )
        .unwrap();
        trainer.run_epoch().unwrap();
        let model = trainer.model();
        let snapshot = {
            let guard = model.read().unwrap();
            guard.param_groups().iter().flat_map(|g| g.iter().copied()).collect()
        };
        trainer.shutdown().unwrap();
        snapshot
    };

    let single = run(1);
    let eight = run(8);
    assert_eq!(single.len(), eight.len());
    for (a, b) in single.iter().zip(eight.iter()) {
        // Differences can only come from float reduction order
        assert!((a - b).abs() < 1e-4, "diverged: {a} vs {b}");
    }
}

#[test]
fn test_shuffled_training_still_converges() {
    let iterator = BatchIterator::new(fixed_corpus(), 4, 8, true, false)
        .unwrap()
        .with_seed(3);
    let mut trainer = ThreadedTrainer::new(
        two_layer_model(3),
        iterator,
        Box::new(Adam::default_params(5e-3)),
        TrainConfig::new().with_num_threads(2).with_max_grad_norm(5.0),
    )
    .unwrap();

    let first = trainer.run_epoch().unwrap();
    for _ in 0..3 {
        trainer.run_epoch().unwrap();
    }
    let last = trainer.run_epoch().unwrap();
    assert!(last < first, "shuffled run did not improve: {first} -> {last}");

    trainer.shutdown().unwrap();
}
