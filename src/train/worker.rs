//! Worker thread: per-step compute into a private gradient partial
//!
//! Each worker owns a private `GradientBuffers` partial and a stats block,
//! both behind uncontended mutexes: the worker touches them only between
//! receiving a `Step` command and arriving at the barrier, the coordinator
//! only after the barrier and before the next dispatch. The barrier is the
//! sole ordering primitive making the worker's gradient writes visible to
//! the coordinator.

use crate::model::{BatchOutcome, GradientBuffers, Model};
use crate::train::Batch;
use std::ops::Range;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex, PoisonError, RwLock};

/// Command sent from the coordinator to one worker
pub(crate) enum Command {
    /// Process `rows` of `batch`, then arrive at the barrier
    Step { batch: Arc<Batch>, rows: Range<usize> },
    /// Exit the worker loop (no barrier arrival)
    Stop,
}

/// Lifecycle event sent from a worker to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    /// The worker is alive and parked waiting for its first command
    Ready(usize),
    /// The worker loop has exited
    Exited(usize),
}

/// Running statistics for one worker
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Steps this worker participated in
    pub batches_processed: usize,
    /// Windows processed across the run
    pub rows_processed: usize,
    /// Windows skipped by the non-finite guard
    pub rows_skipped: usize,
    /// Sum of per-window losses across the run
    pub loss_sum: f64,
    step_loss: f64,
    step_rows: usize,
}

impl WorkerStats {
    fn record(&mut self, outcome: BatchOutcome) {
        self.batches_processed += 1;
        self.rows_processed += outcome.rows;
        self.rows_skipped += outcome.skipped;
        self.loss_sum += outcome.loss_sum;
        self.step_loss = outcome.loss_sum;
        self.step_rows = outcome.rows;
    }

    /// Drain the most recent step's (loss sum, row count)
    pub(crate) fn take_step(&mut self) -> (f64, usize) {
        let step = (self.step_loss, self.step_rows);
        self.step_loss = 0.0;
        self.step_rows = 0;
        step
    }

    /// Average per-window loss across the run
    #[must_use]
    pub fn average_loss(&self) -> f32 {
        if self.rows_processed == 0 {
            return 0.0;
        }
        (self.loss_sum / self.rows_processed as f64) as f32
    }
}

/// Shared slot through which one worker and the coordinator exchange
/// gradients and statistics
pub(crate) struct WorkerSlot {
    pub index: usize,
    pub grads: Mutex<GradientBuffers>,
    pub stats: Mutex<WorkerStats>,
}

/// Everything a worker thread needs, moved into the thread at spawn
pub(crate) struct WorkerContext {
    pub index: usize,
    pub model: Arc<RwLock<Model>>,
    pub slot: Arc<WorkerSlot>,
    pub barrier: Arc<Barrier>,
    pub commands: Receiver<Command>,
    pub events: Sender<WorkerEvent>,
}

/// Worker loop.
///
/// Signals `Ready` once, then blocks on the command channel. For every
/// `Step`: zero the private partial, run forward+backward over the assigned
/// rows (gradient contributions scaled by `1 / batch_rows`), record stats,
/// and arrive at the barrier. `Stop` (or a hung-up channel) exits the loop,
/// signalling `Exited` on the way out.
pub(crate) fn run(ctx: WorkerContext) {
    let _ = ctx.events.send(WorkerEvent::Ready(ctx.index));

    while let Ok(command) = ctx.commands.recv() {
        match command {
            Command::Step { batch, rows } => {
                let outcome = {
                    let model = ctx.model.read().unwrap_or_else(PoisonError::into_inner);
                    let mut grads = ctx
                        .slot
                        .grads
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    grads.zero_all();
                    process_rows(&model, &batch, rows, &mut grads)
                };
                {
                    let mut stats = ctx
                        .slot
                        .stats
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    stats.record(outcome);
                }
                ctx.barrier.wait();
            }
            Command::Stop => break,
        }
    }

    let _ = ctx.events.send(WorkerEvent::Exited(ctx.index));
}

/// Forward+backward over a contiguous row range of one batch
fn process_rows(
    model: &Model,
    batch: &Batch,
    rows: Range<usize>,
    grads: &mut GradientBuffers,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    if batch.batch_size() == 0 {
        return outcome;
    }
    let scale = 1.0 / (batch.seq_len as f32 * batch.batch_size() as f32);

    for row in rows {
        match model.accumulate_window(batch.input(row), batch.target(row), scale, grads) {
            Some(loss) => {
                outcome.loss_sum += f64::from(loss);
                outcome.rows += 1;
            }
            None => outcome.skipped += 1,
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelConfig;

    #[test]
    fn test_worker_stats_record_and_take_step() {
        let mut stats = WorkerStats::default();
        stats.record(BatchOutcome {
            loss_sum: 3.0,
            rows: 2,
            skipped: 1,
        });
        assert_eq!(stats.batches_processed, 1);
        assert_eq!(stats.rows_processed, 2);
        assert_eq!(stats.rows_skipped, 1);
        assert_eq!(stats.take_step(), (3.0, 2));
        // Drained: a second take yields nothing
        assert_eq!(stats.take_step(), (0.0, 0));
        // Running totals survive the drain
        assert_eq!(stats.rows_processed, 2);
        assert!((stats.average_loss() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_process_rows_covers_assigned_range_only() {
        let config = ModelConfig::new(8, 4, 6, 1);
        let model = Model::new(&config, 4).unwrap();
        let batch = Batch::new(
            vec![0, 1, 2, 1, 2, 3, 2, 3, 4, 3, 4, 5],
            vec![1, 2, 3, 2, 3, 4, 3, 4, 5, 4, 5, 6],
            4,
            3,
        );

        let mut grads = GradientBuffers::zeros(&config).unwrap();
        let outcome = process_rows(&model, &batch, 1..3, &mut grads);
        assert_eq!(outcome.rows, 2);
        assert_eq!(outcome.skipped, 0);
        assert!(outcome.loss_sum > 0.0);
        assert!(!grads.is_all_zero());

        let mut empty = GradientBuffers::zeros(&config).unwrap();
        let outcome = process_rows(&model, &batch, 2..2, &mut empty);
        assert_eq!(outcome.rows, 0);
        assert!(empty.is_all_zero());
    }

    #[test]
    fn test_partial_ranges_sum_to_whole_batch() {
        use approx::assert_abs_diff_eq;

        let config = ModelConfig::new(8, 4, 6, 2);
        let model = Model::new(&config, 9).unwrap();
        let batch = Batch::new(
            vec![0, 1, 2, 1, 2, 3, 2, 3, 4, 3, 4, 5],
            vec![1, 2, 3, 2, 3, 4, 3, 4, 5, 4, 5, 6],
            4,
            3,
        );

        let mut whole = GradientBuffers::zeros(&config).unwrap();
        process_rows(&model, &batch, 0..4, &mut whole);

        let mut merged = GradientBuffers::zeros(&config).unwrap();
        for range in [0..1, 1..3, 3..4] {
            let mut part = GradientBuffers::zeros(&config).unwrap();
            process_rows(&model, &batch, range, &mut part);
            merged.accumulate(&part);
        }

        for (a, b) in whole.group_views().iter().zip(merged.group_views().iter()) {
            for (x, y) in a.iter().zip(b.iter()) {
                assert_abs_diff_eq!(*x, *y, epsilon = 1e-5);
            }
        }
    }
}
