//! Threaded training system: worker pool lifecycle and the epoch loop
//!
//! The coordinator (the caller's thread) owns the pool. Per step it draws a
//! batch, partitions its rows across the workers via per-worker command
//! channels, arrives at the shared `N+1`-party barrier, and — once every
//! worker has flushed its backward pass — reduces the per-worker partials
//! into the accumulated gradient buffers and runs the optimizer/accumulation
//! routine. Workers can never start the next step early: the next command is
//! only sent after the update completes.

use crate::error::{Result, TrainError};
use crate::model::{GradientBuffers, Model};
use crate::optim::{apply_update, Accumulation, Optimizer};
use crate::train::callback::{CallbackAction, CallbackContext, CallbackManager, TrainerCallback};
use crate::train::worker::{self, Command, WorkerContext, WorkerEvent, WorkerSlot, WorkerStats};
use crate::train::{BatchIterator, MetricsTracker, TrainConfig};
use std::ops::Range;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Barrier, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Bounded wait for all workers to report ready after spawn
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
/// Bounded wait for all workers to exit at teardown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct WorkerHandle {
    sender: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

/// Aggregated trainer statistics
#[derive(Debug, Clone)]
pub struct TrainerStats {
    /// Run-level counters and loss history
    pub metrics: MetricsTracker,
    /// Per-worker running statistics
    pub workers: Vec<WorkerStats>,
}

/// Data-parallel trainer over a fixed pool of worker threads.
///
/// Owns every piece of shared state: the model (read by workers during
/// compute, written by the coordinator during updates), the barrier, the
/// accumulated gradient buffers, the optimizer and the batch iterator.
/// Construction spawns the pool and returns only once every worker is
/// parked waiting for work; teardown is bounded and runs on every exit
/// path, including construction failures.
pub struct ThreadedTrainer {
    model: Arc<RwLock<Model>>,
    iterator: BatchIterator,
    config: TrainConfig,
    optimizer: Box<dyn Optimizer>,
    accumulation: Accumulation,
    grads: GradientBuffers,
    barrier: Arc<Barrier>,
    slots: Vec<Arc<WorkerSlot>>,
    workers: Vec<WorkerHandle>,
    events: Receiver<WorkerEvent>,
    callbacks: CallbackManager,
    metrics: MetricsTracker,
    started: Instant,
    epoch: usize,
    joined: bool,
}

impl ThreadedTrainer {
    /// Construct the trainer and spawn its worker pool.
    ///
    /// `num_threads` is clamped to at least 1 and exactly that many workers
    /// are spawned. Fails with [`TrainError::InvalidArgument`] for a
    /// non-positive learning rate or tokens outside the model's vocabulary,
    /// [`TrainError::ThreadCreation`] when a spawn fails (already-spawned
    /// workers are stopped and joined first), and
    /// [`TrainError::Synchronization`] when the pool does not report ready
    /// within a bounded wait.
    pub fn new(
        model: Model,
        iterator: BatchIterator,
        optimizer: Box<dyn Optimizer>,
        config: TrainConfig,
    ) -> Result<Self> {
        if optimizer.lr() <= 0.0 {
            return Err(TrainError::InvalidArgument(format!(
                "learning rate must be positive, got {}",
                optimizer.lr()
            )));
        }
        let vocab = model.config().vocab_size;
        if let Some(&bad) = iterator.tokens().iter().find(|&&t| t as usize >= vocab) {
            return Err(TrainError::InvalidArgument(format!(
                "token {bad} outside model vocabulary of {vocab}"
            )));
        }

        let num_threads = config.effective_threads();
        let accumulation = Accumulation::new(config.accumulation_steps);
        let grads = GradientBuffers::zeros(model.config())?;

        let slots: Vec<Arc<WorkerSlot>> = (0..num_threads)
            .map(|index| {
                Ok(Arc::new(WorkerSlot {
                    index,
                    grads: Mutex::new(GradientBuffers::zeros(model.config())?),
                    stats: Mutex::new(WorkerStats::default()),
                }))
            })
            .collect::<Result<_>>()?;

        let model = Arc::new(RwLock::new(model));
        let barrier = Arc::new(Barrier::new(num_threads + 1));
        let (event_tx, event_rx) = mpsc::channel();

        let mut workers: Vec<WorkerHandle> = Vec::with_capacity(num_threads);
        for index in 0..num_threads {
            let (command_tx, command_rx) = mpsc::channel();
            let ctx = WorkerContext {
                index,
                model: Arc::clone(&model),
                slot: Arc::clone(&slots[index]),
                barrier: Arc::clone(&barrier),
                commands: command_rx,
                events: event_tx.clone(),
            };
            let spawned = thread::Builder::new()
                .name(format!("tejer-worker-{index}"))
                .spawn(move || worker::run(ctx));
            match spawned {
                Ok(handle) => workers.push(WorkerHandle {
                    sender: command_tx,
                    thread: Some(handle),
                }),
                Err(source) => {
                    // Tear down the partially constructed pool before
                    // reporting the failure
                    let _ = stop_workers(&mut workers, &event_rx);
                    return Err(TrainError::ThreadCreation { index, source });
                }
            }
        }
        drop(event_tx);

        // Rendezvous: construction returns only once every worker is alive
        // and parked on its command channel
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        let mut ready = 0usize;
        while ready < num_threads {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match event_rx.recv_timeout(remaining) {
                Ok(WorkerEvent::Ready(_)) => ready += 1,
                Ok(WorkerEvent::Exited(_)) => {}
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = stop_workers(&mut workers, &event_rx);
                    return Err(TrainError::Synchronization(format!(
                        "only {ready} of {num_threads} workers became ready within {STARTUP_TIMEOUT:?}"
                    )));
                }
            }
        }

        Ok(Self {
            model,
            iterator,
            config,
            optimizer,
            accumulation,
            grads,
            barrier,
            slots,
            workers,
            events: event_rx,
            callbacks: CallbackManager::new(),
            metrics: MetricsTracker::new(),
            started: Instant::now(),
            epoch: 0,
            joined: false,
        })
    }

    /// Number of worker threads in the pool
    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Current learning rate
    pub fn lr(&self) -> f32 {
        self.optimizer.lr()
    }

    /// Set learning rate
    pub fn set_lr(&mut self, lr: f32) {
        self.optimizer.set_lr(lr);
    }

    /// Register a callback
    pub fn add_callback<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.add(callback);
    }

    /// Run-level metrics
    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    /// Read access to the model (e.g. for evaluation between epochs)
    pub fn model(&self) -> Arc<RwLock<Model>> {
        Arc::clone(&self.model)
    }

    /// Accumulated gradient buffers (zero outside an accumulation window)
    pub fn grads(&self) -> &GradientBuffers {
        &self.grads
    }

    /// Run one epoch over the batch iterator; returns the average
    /// per-window loss.
    ///
    /// Resets the iterator (reshuffling if enabled), then repeats the step
    /// protocol until exhaustion. Gradients left in an unfinished
    /// accumulation window carry over into the next epoch.
    pub fn run_epoch(&mut self) -> Result<f32> {
        self.iterator.reset();
        self.epoch += 1;
        let steps_per_epoch = self.iterator.num_batches();

        let mut epoch_loss = 0.0f64;
        let mut epoch_rows = 0usize;
        let mut step = 0usize;

        let begin_ctx = self.context(step, steps_per_epoch, 0.0);
        if self.callbacks.on_epoch_begin(&begin_ctx) == CallbackAction::Stop {
            return Ok(0.0);
        }

        while let Some(batch) = self.iterator.next_batch() {
            let rows = batch.batch_size();
            let batch = Arc::new(batch);

            // Dispatch: every worker gets its (possibly empty) row range.
            // Channel delivery happens-before worker compute.
            for (handle, range) in self
                .workers
                .iter()
                .zip(partition(rows, self.workers.len()))
            {
                handle
                    .sender
                    .send(Command::Step {
                        batch: Arc::clone(&batch),
                        rows: range,
                    })
                    .map_err(|_| {
                        TrainError::Synchronization(
                            "worker command channel disconnected mid-epoch".into(),
                        )
                    })?;
            }

            // Rendezvous: all backward passes are flushed after release
            self.barrier.wait();

            // Reduce partials and drain per-step statistics; workers are
            // parked on their channels, so these locks are uncontended
            let mut step_loss = 0.0f64;
            let mut step_rows = 0usize;
            for slot in &self.slots {
                let partial = slot.grads.lock().unwrap_or_else(PoisonError::into_inner);
                self.grads.accumulate(&partial);
                let mut stats = slot.stats.lock().unwrap_or_else(PoisonError::into_inner);
                let (loss, rows) = stats.take_step();
                step_loss += loss;
                step_rows += rows;
            }
            epoch_loss += step_loss;
            epoch_rows += step_rows;
            step += 1;
            self.metrics.increment_batch();

            // Optimizer/accumulation routine, exactly once per release
            let applied = {
                let mut model = self.model.write().unwrap_or_else(PoisonError::into_inner);
                apply_update(
                    self.optimizer.as_mut(),
                    &mut self.accumulation,
                    &mut model,
                    &mut self.grads,
                    self.config.max_grad_norm,
                )
            };
            if applied {
                self.metrics.increment_optimizer_step();
            }

            let loss = if step_rows > 0 {
                (step_loss / step_rows as f64) as f32
            } else {
                0.0
            };
            let ctx = self.context(step, steps_per_epoch, loss);
            if self.callbacks.on_step_end(&ctx) == CallbackAction::Stop {
                break;
            }
        }

        let avg_loss = if epoch_rows > 0 {
            (epoch_loss / epoch_rows as f64) as f32
        } else {
            0.0
        };
        self.metrics.record_epoch(avg_loss);
        let end_ctx = self.context(step, steps_per_epoch, avg_loss);
        self.callbacks.on_epoch_end(&end_ctx);

        Ok(avg_loss)
    }

    /// Aggregated statistics snapshot
    pub fn stats(&self) -> TrainerStats {
        TrainerStats {
            metrics: self.metrics.clone(),
            workers: self
                .slots
                .iter()
                .map(|slot| {
                    slot.stats
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone()
                })
                .collect(),
        }
    }

    /// Print a human-readable statistics summary
    pub fn print_stats(&self) {
        let stats = self.stats();
        println!("Training statistics:");
        println!(
            "  epochs: {}  batches: {}  optimizer steps: {}",
            stats.metrics.epochs, stats.metrics.batches, stats.metrics.optimizer_steps
        );
        if let Some(loss) = stats.metrics.last_loss() {
            println!("  last epoch loss: {loss:.4}");
        }
        for (slot, worker) in self.slots.iter().zip(stats.workers.iter()) {
            println!(
                "  worker {:2}: {} batches, {} rows ({} skipped), avg loss {:.4}",
                slot.index,
                worker.batches_processed,
                worker.rows_processed,
                worker.rows_skipped,
                worker.average_loss()
            );
        }
    }

    /// Stop the pool and join every worker within a bounded wait.
    ///
    /// A worker that fails to exit in time is reported as
    /// [`TrainError::Synchronization`] and treated as a resource leak; the
    /// wait is not retried.
    pub fn shutdown(mut self) -> Result<()> {
        self.joined = true;
        stop_workers(&mut self.workers, &self.events)
    }

    fn context(&self, step: usize, steps_per_epoch: usize, loss: f32) -> CallbackContext {
        CallbackContext {
            epoch: self.epoch,
            step,
            steps_per_epoch,
            global_step: self.metrics.optimizer_steps,
            loss,
            lr: self.optimizer.lr(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

impl Drop for ThreadedTrainer {
    fn drop(&mut self) {
        if !self.joined {
            let _ = stop_workers(&mut self.workers, &self.events);
        }
    }
}

/// Signal `Stop` to every worker, await their exit events within a bounded
/// wait, then join the handles.
fn stop_workers(workers: &mut [WorkerHandle], events: &Receiver<WorkerEvent>) -> Result<()> {
    for handle in workers.iter() {
        // A worker that already exited has dropped its receiver; that is
        // fine, its Exited event is in flight or consumed below
        let _ = handle.sender.send(Command::Stop);
    }

    let expected = workers.iter().filter(|w| w.thread.is_some()).count();
    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    let mut exited = 0usize;
    let mut timed_out = false;
    while exited < expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(WorkerEvent::Exited(_)) => exited += 1,
            Ok(WorkerEvent::Ready(_)) => {}
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
        }
    }
    if timed_out {
        return Err(TrainError::Synchronization(format!(
            "{} of {expected} workers did not exit within {SHUTDOWN_TIMEOUT:?}; \
             leaking their threads",
            expected - exited
        )));
    }

    let mut panicked = 0usize;
    for handle in workers.iter_mut() {
        if let Some(thread) = handle.thread.take() {
            if thread.join().is_err() {
                panicked += 1;
            }
        }
    }
    if panicked > 0 {
        return Err(TrainError::Synchronization(format!(
            "{panicked} worker thread(s) panicked"
        )));
    }
    Ok(())
}

/// Partition `total` rows into `parts` contiguous half-open ranges covering
/// every row exactly once, sizes differing by at most one.
pub(crate) fn partition(total: usize, parts: usize) -> Vec<Range<usize>> {
    debug_assert!(parts > 0);
    let base = total / parts;
    let extra = total % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0usize;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}
