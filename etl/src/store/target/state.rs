use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, EtlResult};
use crate::merge::RowMutation;
use crate::types::{BusinessKey, Cell, ColumnSchema, Offset, TableSchema, TargetRow, TargetSnapshot};
use crate::{bail, etl_error};

/// Full contents of a target table, shared by the provided stores.
#[derive(Debug, Clone)]
pub(crate) struct TableState {
    pub(crate) schema: TableSchema,
    pub(crate) generation: u64,
    pub(crate) applied_offset: Option<Offset>,
    rows: HashMap<BusinessKey, Vec<TargetRow>>,
}

/// Histories of the keys touched by a plan, as they look once the plan is applied.
pub(crate) type StagedRows = HashMap<BusinessKey, Vec<TargetRow>>;

impl TableState {
    pub(crate) fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            generation: 0,
            applied_offset: None,
            rows: HashMap::new(),
        }
    }

    pub(crate) fn snapshot(&self, keys: &HashSet<BusinessKey>) -> TargetSnapshot {
        let rows = keys
            .iter()
            .filter_map(|key| self.rows.get_key_value(key))
            .map(|(key, history)| (key.clone(), history.clone()))
            .collect();

        TargetSnapshot::new(self.generation, rows)
    }

    pub(crate) fn current_keys(&self) -> HashSet<BusinessKey> {
        self.rows
            .iter()
            .filter(|(_, history)| history.iter().any(TargetRow::is_current))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub(crate) fn history(&self, key: &BusinessKey) -> &[TargetRow] {
        self.rows.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = &TargetRow> {
        self.rows.values().flatten()
    }

    /// Appends a nullable column, back-filling existing rows with nulls.
    ///
    /// Adding a column that already exists with the same type is a no-op.
    pub(crate) fn add_column(&mut self, column: ColumnSchema) -> EtlResult<bool> {
        if let Some(existing) = self.schema.column(&column.name) {
            if existing.typ == column.typ {
                return Ok(false);
            }
            bail!(
                ErrorKind::SchemaError,
                "Column already exists with another type",
                format!(
                    "column '{}' is {} in table '{}'",
                    column.name, existing.typ, self.schema.name
                )
            );
        }

        self.schema.columns.push(ColumnSchema {
            nullable: true,
            ..column
        });
        for row in self.rows.values_mut().flatten() {
            row.values.push(Cell::Null);
        }
        self.generation += 1;

        Ok(true)
    }

    /// Computes the effect of `mutations` without modifying the table.
    ///
    /// Fails without side effects when any mutation does not fit the current rows.
    pub(crate) fn stage(&self, mutations: Vec<RowMutation>) -> EtlResult<StagedRows> {
        let mut staged: StagedRows = HashMap::new();
        let width = self.schema.columns.len();

        for mutation in mutations {
            let key = mutation.key().clone();
            let history = staged
                .entry(key)
                .or_insert_with_key(|key| self.rows.get(key).cloned().unwrap_or_default());

            match mutation {
                RowMutation::Insert(row) => {
                    check_width(&row, width)?;
                    if row.is_current() && history.iter().any(TargetRow::is_current) {
                        bail!(
                            ErrorKind::InvalidState,
                            "Insert would create a second current row",
                            format!("key {} already has a current row", row.key)
                        );
                    }
                    history.push(row);
                }
                RowMutation::Overwrite { key, values } => {
                    let Some(row) = history.iter_mut().find(|row| row.is_current()) else {
                        bail!(
                            ErrorKind::InvalidState,
                            "Overwrite of a missing row",
                            format!("key {key} has no current row")
                        );
                    };
                    if values.len() != width {
                        bail!(
                            ErrorKind::InvalidData,
                            "Row width does not match the target schema",
                            format!("key {key} has {} values for {width} columns", values.len())
                        );
                    }
                    row.values = values;
                }
                RowMutation::Delete { key } => {
                    if history.is_empty() {
                        bail!(
                            ErrorKind::InvalidState,
                            "Delete of a missing row",
                            format!("key {key} is not stored")
                        );
                    }
                    history.clear();
                }
                RowMutation::CloseVersion {
                    key,
                    version,
                    effective_to,
                } => {
                    let validity = history
                        .iter_mut()
                        .filter_map(|row| row.validity.as_mut())
                        .find(|validity| validity.version == version && validity.is_current)
                        .ok_or_else(|| {
                            etl_error!(
                                ErrorKind::InvalidState,
                                "Close of a version that is not current",
                                format!("key {key} has no current version {version}")
                            )
                        })?;
                    validity.effective_to = Some(effective_to);
                    validity.is_current = false;
                }
                RowMutation::ReplaceHistory { rows, .. } => {
                    for row in &rows {
                        check_width(row, width)?;
                    }
                    *history = rows;
                }
            }
        }

        Ok(staged)
    }

    /// Installs staged histories and records `offset` as the last applied one.
    pub(crate) fn install(&mut self, staged: StagedRows, offset: Offset) {
        for (key, mut history) in staged {
            if history.is_empty() {
                self.rows.remove(&key);
            } else {
                history.sort_by_key(|row| row.version().unwrap_or(0));
                self.rows.insert(key, history);
            }
        }

        self.generation += 1;
        self.applied_offset = Some(offset);
    }
}

fn check_width(row: &TargetRow, width: usize) -> EtlResult<()> {
    if row.values.len() != width {
        bail!(
            ErrorKind::InvalidData,
            "Row width does not match the target schema",
            format!("key {} has {} values for {width} columns", row.key, row.values.len())
        );
    }

    Ok(())
}

/// On-disk layout of a table.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TableFile {
    schema: TableSchema,
    generation: u64,
    applied_offset: Option<Offset>,
    rows: Vec<TargetRow>,
}

impl From<&TableState> for TableFile {
    fn from(state: &TableState) -> Self {
        let mut rows: Vec<TargetRow> = state.rows().cloned().collect();
        rows.sort_by(|a, b| {
            a.key
                .to_string()
                .cmp(&b.key.to_string())
                .then(a.version().cmp(&b.version()))
        });

        Self {
            schema: state.schema.clone(),
            generation: state.generation,
            applied_offset: state.applied_offset,
            rows,
        }
    }
}

impl From<TableFile> for TableState {
    fn from(file: TableFile) -> Self {
        let mut rows: HashMap<BusinessKey, Vec<TargetRow>> = HashMap::new();
        for row in file.rows {
            rows.entry(row.key.clone()).or_default().push(row);
        }
        for history in rows.values_mut() {
            history.sort_by_key(|row| row.version().unwrap_or(0));
        }

        Self {
            schema: file.schema,
            generation: file.generation,
            applied_offset: file.applied_offset,
            rows,
        }
    }
}
