//! Windowed batch iteration over a token stream

use super::Batch;
use crate::error::{Result, TrainError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

const DEFAULT_SHUFFLE_SEED: u64 = 0x7e7e_0001;

/// Iterates a shared, read-only token stream as batches of (input, target)
/// windows.
///
/// A window starting at `s` has inputs `tokens[s..s+seq_len]` and targets
/// `tokens[s+1..s+seq_len+1]`, so `usable = tokens.len() - seq_len` start
/// positions exist. Each batch consumes up to `batch_size` starts; with
/// `shuffle` the start order is a seeded permutation, reshuffled on every
/// [`reset`](Self::reset). With `drop_last` a final short batch is dropped
/// instead of emitted.
///
/// The iterator never mutates or copies the underlying token buffer; it is
/// created once per run, reset once per epoch.
pub struct BatchIterator {
    tokens: Arc<[u32]>,
    batch_size: usize,
    seq_len: usize,
    cursor: usize,
    shuffle: bool,
    drop_last: bool,
    order: Vec<usize>,
    seed: u64,
    epoch: u64,
}

impl BatchIterator {
    /// Create an iterator over `tokens`.
    ///
    /// Fails with [`TrainError::InvalidArgument`] if `batch_size` or
    /// `seq_len` is zero, or if fewer than `seq_len + 1` tokens are
    /// available (not even one window fits).
    pub fn new(
        tokens: Arc<[u32]>,
        batch_size: usize,
        seq_len: usize,
        shuffle: bool,
        drop_last: bool,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainError::InvalidArgument(
                "batch_size must be positive".into(),
            ));
        }
        if seq_len == 0 {
            return Err(TrainError::InvalidArgument("seq_len must be positive".into()));
        }
        if tokens.len() < seq_len + 1 {
            return Err(TrainError::InvalidArgument(format!(
                "token stream too short: {} tokens, need at least seq_len + 1 = {}",
                tokens.len(),
                seq_len + 1
            )));
        }

        let usable = tokens.len() - seq_len;
        let order = if shuffle {
            let mut order: Vec<usize> = (0..usable).collect();
            let mut rng = StdRng::seed_from_u64(DEFAULT_SHUFFLE_SEED);
            order.shuffle(&mut rng);
            order
        } else {
            Vec::new()
        };

        Ok(Self {
            tokens,
            batch_size,
            seq_len,
            cursor: 0,
            shuffle,
            drop_last,
            order,
            seed: DEFAULT_SHUFFLE_SEED,
            epoch: 0,
        })
    }

    /// Fix the shuffle seed (the default is a constant, so epochs are
    /// reproducible either way)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.epoch = 0;
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(seed);
            self.order.shuffle(&mut rng);
        }
        self
    }

    /// Number of usable window start positions
    #[must_use]
    pub fn usable_windows(&self) -> usize {
        self.tokens.len() - self.seq_len
    }

    /// Batches produced per epoch
    #[must_use]
    pub fn num_batches(&self) -> usize {
        let usable = self.usable_windows();
        let full = usable / self.batch_size;
        if !self.drop_last && usable % self.batch_size != 0 {
            full + 1
        } else {
            full
        }
    }

    /// Window length
    #[must_use]
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Configured batch size
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Shared view of the underlying token stream
    pub fn tokens(&self) -> &Arc<[u32]> {
        &self.tokens
    }

    /// Rewind to the start of the stream for a new epoch.
    ///
    /// Reshuffles the start order in place when shuffling is enabled; with
    /// `shuffle = false` the next epoch reproduces the previous batch
    /// sequence exactly. No reallocation of the token buffer.
    pub fn reset(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.epoch += 1;
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            self.order.shuffle(&mut rng);
        }
    }

    /// Produce the next batch, or `None` when the epoch is exhausted.
    ///
    /// A final batch with fewer than `batch_size` windows is emitted unless
    /// `drop_last` is set.
    pub fn next_batch(&mut self) -> Option<Batch> {
        let usable = self.usable_windows();
        let remaining = usable - self.cursor;
        if remaining == 0 {
            return None;
        }
        if remaining < self.batch_size && self.drop_last {
            self.cursor = usable;
            return None;
        }

        let rows = remaining.min(self.batch_size);
        let mut input_ids = Vec::with_capacity(rows * self.seq_len);
        let mut target_ids = Vec::with_capacity(rows * self.seq_len);
        for r in 0..rows {
            let start = if self.shuffle {
                self.order[self.cursor + r]
            } else {
                self.cursor + r
            };
            input_ids.extend_from_slice(&self.tokens[start..start + self.seq_len]);
            target_ids.extend_from_slice(&self.tokens[start + 1..start + self.seq_len + 1]);
        }
        self.cursor += rows;

        Some(Batch::new(input_ids, target_ids, rows, self.seq_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stream(n: usize) -> Arc<[u32]> {
        (0..n as u32).collect()
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(BatchIterator::new(stream(100), 0, 8, false, false).is_err());
        assert!(BatchIterator::new(stream(100), 4, 0, false, false).is_err());
        // 8 tokens with seq_len 8 leaves no room for a target shift
        assert!(BatchIterator::new(stream(8), 1, 8, false, false).is_err());
        // seq_len + 1 tokens is exactly one window
        assert!(BatchIterator::new(stream(9), 1, 8, false, false).is_ok());
    }

    #[test]
    fn test_windows_are_shifted_by_one() {
        let mut iter = BatchIterator::new(stream(12), 2, 4, false, false).unwrap();
        let batch = iter.next_batch().unwrap();
        assert_eq!(batch.input(0), &[0, 1, 2, 3]);
        assert_eq!(batch.target(0), &[1, 2, 3, 4]);
        assert_eq!(batch.input(1), &[1, 2, 3, 4]);
        assert_eq!(batch.target(1), &[2, 3, 4, 5]);
    }

    #[test]
    fn test_num_batches_formula() {
        // 128 tokens, seq 8 -> 120 usable starts; batch 4 -> 30 batches
        let iter = BatchIterator::new(stream(128), 4, 8, false, false).unwrap();
        assert_eq!(iter.usable_windows(), 120);
        assert_eq!(iter.num_batches(), 30);

        // 10 usable starts, batch 4 -> 2 full + 1 partial
        let iter = BatchIterator::new(stream(18), 4, 8, false, false).unwrap();
        assert_eq!(iter.num_batches(), 3);
        let iter = BatchIterator::new(stream(18), 4, 8, false, true).unwrap();
        assert_eq!(iter.num_batches(), 2);
    }

    #[test]
    fn test_partial_final_batch() {
        let mut iter = BatchIterator::new(stream(18), 4, 8, false, false).unwrap();
        let sizes: Vec<usize> = std::iter::from_fn(|| iter.next_batch())
            .map(|b| b.batch_size())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert!(iter.next_batch().is_none());
    }

    #[test]
    fn test_drop_last_discards_partial() {
        let mut iter = BatchIterator::new(stream(18), 4, 8, false, true).unwrap();
        let sizes: Vec<usize> = std::iter::from_fn(|| iter.next_batch())
            .map(|b| b.batch_size())
            .collect();
        assert_eq!(sizes, vec![4, 4]);
    }

    #[test]
    fn test_reset_reproduces_identical_batches() {
        let mut iter = BatchIterator::new(stream(64), 4, 8, false, false).unwrap();
        let first: Vec<Batch> = std::iter::from_fn(|| iter.next_batch()).collect();
        iter.reset();
        let second: Vec<Batch> = std::iter::from_fn(|| iter.next_batch()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_shuffle_covers_every_start_exactly_once() {
        let mut iter = BatchIterator::new(stream(40), 4, 8, true, false).unwrap();
        let mut starts: Vec<u32> = Vec::new();
        while let Some(batch) = iter.next_batch() {
            for r in 0..batch.batch_size() {
                starts.push(batch.input(r)[0]);
            }
        }
        starts.sort_unstable();
        let expected: Vec<u32> = (0..32).collect();
        assert_eq!(starts, expected);
    }

    #[test]
    fn test_shuffle_reset_reshuffles() {
        let mut iter = BatchIterator::new(stream(64), 8, 8, true, false)
            .unwrap()
            .with_seed(9);
        let first: Vec<u32> = iter.next_batch().unwrap().input_ids.clone();
        iter.reset();
        let second: Vec<u32> = iter.next_batch().unwrap().input_ids.clone();
        // 56 usable starts; two independent permutations agreeing on the
        // first 8 is vanishingly unlikely
        assert_ne!(first, second);
    }

    #[test]
    fn test_same_seed_same_order() {
        let make = || {
            BatchIterator::new(stream(64), 8, 8, true, false)
                .unwrap()
                .with_seed(21)
        };
        let mut a = make();
        let mut b = make();
        assert_eq!(a.next_batch(), b.next_batch());
    }

    proptest! {
        #[test]
        fn prop_batch_count_matches_iteration(
            count in 10usize..200,
            batch_size in 1usize..9,
            seq_len in 1usize..9,
            drop_last in proptest::bool::ANY,
        ) {
            prop_assume!(count >= seq_len + 1);
            let mut iter =
                BatchIterator::new(stream(count), batch_size, seq_len, false, drop_last).unwrap();
            let mut produced = 0usize;
            let mut rows = 0usize;
            while let Some(batch) = iter.next_batch() {
                produced += 1;
                rows += batch.batch_size();
            }
            prop_assert_eq!(produced, iter.num_batches());

            let usable = count - seq_len;
            let expected_rows = if drop_last {
                usable - usable % batch_size
            } else {
                usable
            };
            prop_assert_eq!(rows, expected_rows);
        }

        #[test]
        fn prop_reset_is_deterministic_without_shuffle(
            count in 10usize..100,
            batch_size in 1usize..6,
            seq_len in 1usize..6,
        ) {
            prop_assume!(count >= seq_len + 1);
            let mut iter =
                BatchIterator::new(stream(count), batch_size, seq_len, false, false).unwrap();
            let first: Vec<Batch> = std::iter::from_fn(|| iter.next_batch()).collect();
            iter.reset();
            let second: Vec<Batch> = std::iter::from_fn(|| iter.next_batch()).collect();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_shuffled_epoch_is_a_permutation(
            count in 12usize..80,
            batch_size in 1usize..6,
            seed in 0u64..1000,
        ) {
            let seq_len = 4usize;
            prop_assume!(count >= seq_len + 1);
            let mut iter = BatchIterator::new(stream(count), batch_size, seq_len, true, false)
                .unwrap()
                .with_seed(seed);
            let mut starts: Vec<u32> = Vec::new();
            while let Some(batch) = iter.next_batch() {
                for r in 0..batch.batch_size() {
                    starts.push(batch.input(r)[0]);
                }
            }
            starts.sort_unstable();
            let expected: Vec<u32> = (0..(count - seq_len) as u32).collect();
            prop_assert_eq!(starts, expected);
        }
    }
}
