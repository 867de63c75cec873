//! Pure stages turning a batch into a mutation plan.
//!
//! A batch flows through [`SchemaReconciler`], [`Deduplicator`] and [`ChangeClassifier`] and
//! ends in either a [`MergePlanner`] (upsert tables) or an [`Scd2Applier`] (history tables).
//! None of these stages touch storage.

mod classify;
mod dedup;
mod mutation;
mod planner;
mod reconcile;
mod scd2;

pub use classify::{ChangeClassifier, ChangeSet, ColumnMapping, Update};
pub use dedup::{Deduplicator, Record, deduplicate};
pub use mutation::{MutationCounts, MutationPlan, OutOfOrderRecord, RowMutation};
pub use planner::MergePlanner;
pub use reconcile::{SchemaPlan, SchemaReconciler};
pub use scd2::Scd2Applier;
