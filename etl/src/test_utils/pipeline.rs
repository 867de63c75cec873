use config::shared::MergeConfig;

use crate::pipeline::MergePipeline;
use crate::store::checkpoint::memory::MemoryCheckpointStore;
use crate::store::target::memory::MemoryTargetStore;
use crate::test_utils::table::customers_schema;

pub type MemoryPipeline = MergePipeline<MemoryTargetStore, MemoryCheckpointStore>;

/// Handles to the stores of a pipeline built by [`memory_pipeline`].
///
/// Both stores share their state with the pipeline, so they can be inspected after each
/// batch or handed to a new pipeline to simulate a restart.
#[derive(Debug, Clone)]
pub struct MemoryStores {
    pub target: MemoryTargetStore,
    pub checkpoints: MemoryCheckpointStore,
}

impl MemoryStores {
    /// Creates empty stores over the `customers` fixture table.
    pub fn customers() -> Self {
        Self {
            target: MemoryTargetStore::new(customers_schema()),
            checkpoints: MemoryCheckpointStore::new(),
        }
    }

    /// Starts a pipeline over these stores, as a process restart would.
    pub async fn start(&self, config: MergeConfig) -> MemoryPipeline {
        MergePipeline::new(config, self.target.clone(), self.checkpoints.clone())
            .await
            .expect("failed to start merge pipeline")
    }
}

/// Creates fresh `customers` stores and a pipeline over them.
pub async fn memory_pipeline(config: MergeConfig) -> (MemoryPipeline, MemoryStores) {
    let stores = MemoryStores::customers();
    let pipeline = stores.start(config).await;

    (pipeline, stores)
}
