//! Merge service binary.
//!
//! Loads the table configuration, installs tracing and merges every table's pending batch
//! files into its target, resuming from the stored checkpoints.

use clap::Parser;
use telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::config::{MergerServiceConfig, load_merger_config};
use crate::core::start_merger_with_config;

mod config;
mod core;

/// Merges batch files into target tables with upsert or SCD2 semantics.
#[derive(Parser, Debug)]
#[command(name = "merger")]
struct Args {
    /// Only merge the table with this name.
    #[arg(long)]
    table: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut merger_config = load_merger_config()?;
    if let Some(table) = &args.table {
        merger_config.select_table(table)?;
    }

    init_tracing(::config::Environment::load()?, "merger=info,etl=info")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(merger_config))
}

async fn async_main(merger_config: MergerServiceConfig) -> anyhow::Result<()> {
    info!(tables = merger_config.tables.len(), "starting merger");

    if let Err(err) = start_merger_with_config(merger_config).await {
        error!("{err:#}");
        return Err(err);
    }

    info!("merger finished");

    Ok(())
}
