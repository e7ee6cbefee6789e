//! Batch data structure

/// A batch of (input, target) token windows for next-token training.
///
/// Token ids are stored flattened (`batch_size x seq_len`); targets are the
/// inputs shifted by one position in the source stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Input token IDs (batch_size x seq_len flattened)
    pub input_ids: Vec<u32>,
    /// Target token IDs (batch_size x seq_len flattened)
    pub target_ids: Vec<u32>,
    /// Number of windows in this batch
    pub batch_size: usize,
    /// Window length
    pub seq_len: usize,
}

impl Batch {
    /// Create a batch from flattened id buffers
    pub fn new(input_ids: Vec<u32>, target_ids: Vec<u32>, batch_size: usize, seq_len: usize) -> Self {
        debug_assert_eq!(input_ids.len(), batch_size * seq_len);
        debug_assert_eq!(target_ids.len(), batch_size * seq_len);
        Self {
            input_ids,
            target_ids,
            batch_size,
            seq_len,
        }
    }

    /// Input window for one row
    pub fn input(&self, row: usize) -> &[u32] {
        let start = row * self.seq_len;
        &self.input_ids[start..start + self.seq_len]
    }

    /// Target window for one row
    pub fn target(&self, row: usize) -> &[u32] {
        let start = row * self.seq_len;
        &self.target_ids[start..start + self.seq_len]
    }

    /// Number of windows
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Total number of tokens in the batch
    #[must_use]
    pub fn num_tokens(&self) -> usize {
        self.batch_size * self.seq_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_row_accessors() {
        let batch = Batch::new(vec![1, 2, 3, 4, 5, 6], vec![2, 3, 4, 5, 6, 7], 2, 3);
        assert_eq!(batch.input(0), &[1, 2, 3]);
        assert_eq!(batch.target(0), &[2, 3, 4]);
        assert_eq!(batch.input(1), &[4, 5, 6]);
        assert_eq!(batch.target(1), &[5, 6, 7]);
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.num_tokens(), 6);
    }
}
