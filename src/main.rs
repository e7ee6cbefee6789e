//! tejer CLI
//!
//! Single-command training entry point for the tejer library.
//!
//! # Usage
//!
//! ```bash
//! # Train on a byte-level corpus
//! tejer --data corpus.txt --threads 8 --epochs 5
//!
//! # Train on a deterministic synthetic stream
//! tejer --synthetic-tokens 8192 --optimizer sgd --lr 0.1
//!
//! # Load engine settings from JSON instead of flags
//! tejer --data corpus.txt --config train.json
//! ```

use clap::{Parser, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tejer::model::{Model, ModelConfig};
use tejer::optim::{Adam, Optimizer, Sgd};
use tejer::train::{BatchIterator, ProgressCallback, ThreadedTrainer, TrainConfig};
use tejer::TrainError;

/// tejer: threaded data-parallel trainer
#[derive(Parser, Debug)]
#[command(name = "tejer")]
#[command(version)]
#[command(about = "Threaded data-parallel training over a token stream")]
struct Cli {
    /// Byte-level corpus file (each byte is one token); omit for a
    /// synthetic stream
    #[arg(long)]
    data: Option<PathBuf>,

    /// Length of the synthetic stream used when no corpus is given
    #[arg(long, default_value_t = 8192)]
    synthetic_tokens: usize,

    /// Worker thread count
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Windows per batch
    #[arg(long, default_value_t = 8)]
    batch_size: usize,

    /// Window length
    #[arg(long, default_value_t = 32)]
    seq_len: usize,

    /// Epochs to run
    #[arg(long, default_value_t = 3)]
    epochs: usize,

    /// Learning rate
    #[arg(long, default_value_t = 1e-3)]
    lr: f32,

    /// Gradient accumulation window
    #[arg(long, default_value_t = 1)]
    accumulation_steps: usize,

    /// Global-norm gradient clipping
    #[arg(long)]
    max_grad_norm: Option<f32>,

    /// Update rule
    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    optimizer: OptimizerKind,

    /// Shuffle window order each epoch
    #[arg(long)]
    shuffle: bool,

    /// Drop a final short batch instead of emitting it
    #[arg(long)]
    drop_last: bool,

    /// Model/shuffle seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// JSON file with engine settings (overrides threads/accumulation/clip)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OptimizerKind {
    Adam,
    Sgd,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let tokens: Arc<[u32]> = match &cli.data {
        Some(path) => {
            let bytes = fs::read(path)?;
            if bytes.is_empty() {
                return Err(Box::new(TrainError::InvalidArgument(format!(
                    "corpus {} is empty",
                    path.display()
                ))));
            }
            bytes.iter().map(|&b| u32::from(b)).collect()
        }
        None => synthetic_stream(cli.synthetic_tokens, cli.seed),
    };

    let vocab = tokens.iter().copied().max().unwrap_or(0) as usize + 1;
    let model_config = ModelConfig::new(vocab.max(2), 32, 64, 2);
    let model = Model::new(&model_config, cli.seed)?;

    let iterator = BatchIterator::new(
        tokens,
        cli.batch_size,
        cli.seq_len,
        cli.shuffle,
        cli.drop_last,
    )?
    .with_seed(cli.seed);

    let train_config = match &cli.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => {
            let config = TrainConfig::new()
                .with_num_threads(cli.threads)
                .with_accumulation_steps(cli.accumulation_steps);
            match cli.max_grad_norm {
                Some(max_norm) => config.with_max_grad_norm(max_norm),
                None => config,
            }
        }
    };

    let optimizer: Box<dyn Optimizer> = match cli.optimizer {
        OptimizerKind::Adam => Box::new(Adam::default_params(cli.lr)),
        OptimizerKind::Sgd => Box::new(Sgd::new(cli.lr)),
    };

    println!(
        "Training: {} params, {} workers, {} batches/epoch",
        model.num_params(),
        train_config.effective_threads(),
        iterator.num_batches()
    );

    let mut trainer = ThreadedTrainer::new(model, iterator, optimizer, train_config)?;
    trainer.add_callback(ProgressCallback::default());

    for _ in 0..cli.epochs {
        trainer.run_epoch()?;
    }

    trainer.print_stats();
    trainer.shutdown()?;
    Ok(())
}

/// Deterministic token stream with learnable next-token structure
fn synthetic_stream(len: usize, seed: u64) -> Arc<[u32]> {
    let period = 61u64;
    (0..len as u64)
        .map(|i| ((i.wrapping_add(seed).wrapping_mul(17)) % period) as u32)
        .collect()
}
