use anyhow::Context;
use etl::pipeline::{MergePipeline, RunSummary};
use etl::source::directory::DirectoryBatchSource;
use etl::store::checkpoint::file::FileCheckpointStore;
use etl::store::target::file::JsonFileTargetStore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::{MergerServiceConfig, TableConfig};

/// Runs one merge pipeline per configured table and waits for all of them.
///
/// A failing table does not stop the others. The first failure is returned once every
/// table has finished.
pub async fn start_merger_with_config(config: MergerServiceConfig) -> anyhow::Result<()> {
    let mut tables = JoinSet::new();
    for table in config.tables {
        tables.spawn(async move {
            let name = table.name.clone();
            (name, merge_table(table).await)
        });
    }

    let mut first_error = None;
    while let Some(joined) = tables.join_next().await {
        let (name, result) = joined.context("merge task panicked")?;
        match result {
            Ok(summary) => info!(
                table = %name,
                applied = summary.batches_applied,
                skipped = summary.batches_skipped,
                schema_skipped = summary.batches_schema_skipped,
                rejected = summary.records_rejected,
                last_committed = ?summary.last_committed.map(|o| o.value()),
                "table merged"
            ),
            Err(err) => {
                error!(table = %name, "table merge failed: {err:#}");
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn merge_table(table: TableConfig) -> anyhow::Result<RunSummary> {
    for path in [&table.target_path, &table.checkpoint_path] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create `{}`", parent.display()))?;
        }
    }

    let target = JsonFileTargetStore::open(&table.target_path, table.initial_schema())
        .await
        .with_context(|| format!("failed to open target `{}`", table.target_path.display()))?;
    let checkpoints = FileCheckpointStore::new(&table.checkpoint_path);

    let mut pipeline = MergePipeline::new(table.merge, target, checkpoints).await?;
    let mut source = DirectoryBatchSource::open(&table.batches_dir)
        .await
        .with_context(|| format!("failed to list batches in `{}`", table.batches_dir.display()))?;

    info!(
        table = %table.name,
        pending_batches = source.remaining(),
        committed = ?pipeline.checkpoints().committed_offset().map(|o| o.value()),
        "starting table merge"
    );

    let summary = pipeline.run(&mut source).await?;

    Ok(summary)
}
