use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, bail};
use config::shared::MergeConfig;
use config::{Config, load_config};
use etl::types::{ColumnSchema, TableSchema};
use serde::Deserialize;

/// Configuration of the merge service: one entry per target table.
#[derive(Debug, Clone, Deserialize)]
pub struct MergerServiceConfig {
    pub tables: Vec<TableConfig>,
}

impl Config for MergerServiceConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Directory holding one `*.json` file per batch.
    pub batches_dir: PathBuf,
    pub target_path: PathBuf,
    pub checkpoint_path: PathBuf,
    /// Schema of the target table when its file does not exist yet.
    pub columns: Vec<ColumnSchema>,
    pub merge: MergeConfig,
}

impl TableConfig {
    pub fn initial_schema(&self) -> TableSchema {
        TableSchema::new(self.name.clone(), self.columns.clone())
    }
}

impl MergerServiceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tables.is_empty() {
            bail!("at least one table must be configured");
        }

        let mut names = HashSet::new();
        let mut targets = HashSet::new();
        for table in &self.tables {
            if !names.insert(table.name.as_str()) {
                bail!("table `{}` is configured more than once", table.name);
            }
            if !targets.insert(&table.target_path) {
                bail!(
                    "table `{}` shares its target file `{}` with another table",
                    table.name,
                    table.target_path.display()
                );
            }
            if table.columns.is_empty() {
                bail!("table `{}` has no columns", table.name);
            }
            for column in table
                .merge
                .partition_by
                .iter()
                .chain([&table.merge.order_by.column])
            {
                if !table.columns.iter().any(|c| &c.name == column) {
                    bail!(
                        "table `{}` references unknown column `{column}` in its merge settings",
                        table.name
                    );
                }
            }

            table
                .merge
                .validate()
                .with_context(|| format!("invalid merge settings for table `{}`", table.name))?;
        }

        Ok(())
    }

    /// Keeps only the table called `name`.
    pub fn select_table(&mut self, name: &str) -> anyhow::Result<()> {
        self.tables.retain(|table| table.name == name);
        if self.tables.is_empty() {
            bail!("table `{name}` is not configured");
        }

        Ok(())
    }
}

/// Loads and validates the service configuration.
pub fn load_merger_config() -> anyhow::Result<MergerServiceConfig> {
    let config = load_config::<MergerServiceConfig>().context("failed to load configuration")?;
    config.validate()?;

    Ok(config)
}
