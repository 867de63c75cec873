use std::collections::VecDeque;

use crate::error::EtlResult;
use crate::source::BatchSource;
use crate::types::Batch;

/// Source replaying a fixed list of batches.
#[derive(Debug, Clone, Default)]
pub struct MemoryBatchSource {
    batches: VecDeque<Batch>,
}

impl MemoryBatchSource {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl BatchSource for MemoryBatchSource {
    async fn next_batch(&mut self) -> EtlResult<Option<Batch>> {
        Ok(self.batches.pop_front())
    }
}
