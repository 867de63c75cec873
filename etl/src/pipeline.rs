use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use config::shared::{MergeConfig, MergeMode, SchemaErrorPolicy};
use futures::future::try_join_all;
use metrics::{counter, gauge, histogram};
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::checkpoint::{CheckpointManager, RecoveryAction, batch_content_hash};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::failpoints::{MERGE_AFTER_APPLY_BEFORE_COMMIT, etl_fail_point};
use crate::merge::{
    ChangeClassifier, ChangeSet, ColumnMapping, Deduplicator, MergePlanner, MutationPlan,
    OutOfOrderRecord, Record, Scd2Applier, SchemaReconciler,
};
use crate::metrics::{
    ERROR_KIND_LABEL, ETL_MERGE_BATCH_DURATION_SECONDS, ETL_MERGE_BATCHES_TOTAL,
    ETL_MERGE_COMMITTED_OFFSET, ETL_MERGE_ERRORS_TOTAL, ETL_MERGE_OUT_OF_ORDER_TOTAL,
    ETL_MERGE_ROWS_TOTAL, ETL_MERGE_STORAGE_CONFLICTS_TOTAL, MUTATION_KIND_LABEL, OUTCOME_LABEL,
    TABLE_NAME_LABEL,
};
use crate::source::BatchSource;
use crate::store::checkpoint::CheckpointStore;
use crate::store::target::{ApplyOutcome, AtomicCommit, TargetStore};
use crate::types::{Batch, BusinessKey, Cell, ColumnType, Offset, TargetSnapshot};
use crate::workers::policy::{RetryDirective, build_error_handling_policy};

/// Batches smaller than this are classified inline even when more workers are configured.
pub const PARALLEL_CLASSIFICATION_MIN_RECORDS: usize = 256;

/// What happened to the mutations of an applied batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub offset: Offset,
    /// Rows in the batch as received.
    pub records_received: usize,
    /// Rows dropped because a later row of the same key won.
    pub duplicates_dropped: usize,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: usize,
    pub deleted: u64,
    pub backfilled: u64,
    /// Records rejected as out of order. The rest of the batch was applied.
    pub rejected: Vec<OutOfOrderRecord>,
    /// Columns added to the target before the batch was applied.
    pub added_columns: Vec<String>,
    /// Apply attempts, including the ones that hit a storage conflict.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The batch was merged and its offset committed.
    Applied(BatchReport),
    /// The offset was already committed. Nothing was read or written.
    Skipped { offset: Offset },
    /// The batch failed schema reconciliation and its offset was committed without changes.
    SchemaSkipped { offset: Offset },
}

impl BatchOutcome {
    pub fn offset(&self) -> Offset {
        match self {
            BatchOutcome::Applied(report) => report.offset,
            BatchOutcome::Skipped { offset } | BatchOutcome::SchemaSkipped { offset } => *offset,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            BatchOutcome::Applied(_) => "applied",
            BatchOutcome::Skipped { .. } => "skipped",
            BatchOutcome::SchemaSkipped { .. } => "schema_skipped",
        }
    }
}

/// Totals of one [`MergePipeline::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches_applied: usize,
    pub batches_skipped: usize,
    pub batches_schema_skipped: usize,
    pub records_rejected: usize,
    pub last_committed: Option<Offset>,
}

impl RunSummary {
    fn record(&mut self, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Applied(report) => {
                self.batches_applied += 1;
                self.records_rejected += report.rejected.len();
            }
            BatchOutcome::Skipped { .. } => self.batches_skipped += 1,
            BatchOutcome::SchemaSkipped { .. } => self.batches_schema_skipped += 1,
        }
    }
}

struct PlannedBatch {
    plan: MutationPlan,
    unchanged: usize,
    generation: u64,
}

/// Merges batches into one target table, in offset order.
///
/// A pipeline owns its target and its checkpoint. Every batch goes through schema
/// reconciliation, deduplication, classification and planning before its mutations are
/// handed to the target in one atomic apply, bracketed by a two-phase checkpoint.
#[derive(Debug)]
pub struct MergePipeline<T, C> {
    table: String,
    config: Arc<MergeConfig>,
    target: T,
    checkpoints: CheckpointManager<C>,
}

impl<T, C> MergePipeline<T, C>
where
    T: TargetStore + Send + Sync,
    C: CheckpointStore + Send + Sync,
{
    /// Validates `config`, loads the checkpoint and reconciles it with the target.
    pub async fn new(config: MergeConfig, target: T, checkpoint_store: C) -> EtlResult<Self> {
        config.validate()?;

        let table = target.schema().await?.name;
        let mut checkpoints = CheckpointManager::load(checkpoint_store).await?;
        let action = checkpoints.recover(&target).await?;

        info!(
            table = %table,
            mode = %config.mode,
            committed = ?checkpoints.committed_offset().map(|o| o.value()),
            recovered = action != RecoveryAction::Clean,
            "initialized merge pipeline"
        );

        Ok(Self {
            table,
            config: Arc::new(config),
            target,
            checkpoints,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn checkpoints(&self) -> &CheckpointManager<C> {
        &self.checkpoints
    }

    /// Gives access to operator actions such as [`CheckpointManager::reset_to`].
    pub fn checkpoints_mut(&mut self) -> &mut CheckpointManager<C> {
        &mut self.checkpoints
    }

    /// Drains `source`, applying each batch under the configured error policy.
    ///
    /// Stops at the first batch that fails for good and returns its error. Every batch
    /// before it stays committed.
    pub async fn run<S>(&mut self, source: &mut S) -> EtlResult<RunSummary>
    where
        S: BatchSource,
    {
        let mut summary = RunSummary::default();

        while let Some(batch) = source.next_batch().await? {
            let outcome = self.process_with_policy(batch).await?;
            summary.record(&outcome);
        }
        summary.last_committed = self.checkpoints.committed_offset();

        info!(
            table = %self.table,
            applied = summary.batches_applied,
            skipped = summary.batches_skipped,
            schema_skipped = summary.batches_schema_skipped,
            rejected = summary.records_rejected,
            last_committed = ?summary.last_committed.map(|o| o.value()),
            "merge run completed"
        );

        Ok(summary)
    }

    /// Processes one batch with the current time as processing time.
    pub async fn process_batch(&mut self, batch: Batch) -> EtlResult<BatchOutcome> {
        self.process_batch_at(batch, Utc::now()).await
    }

    /// Processes one batch.
    ///
    /// `processing_time` closes versions of deleted keys and stands in for null ordering
    /// values in history mode.
    pub async fn process_batch_at(
        &mut self,
        batch: Batch,
        processing_time: DateTime<Utc>,
    ) -> EtlResult<BatchOutcome> {
        let offset = batch.offset;
        let started = Instant::now();

        // A pending entry left by an interrupted batch must be settled before the next
        // offset can be staged.
        if self.checkpoints.pending().is_some() {
            self.checkpoints.recover(&self.target).await?;
        }

        if self.checkpoints.has_committed(offset) {
            self.warn_on_replay_mismatch(&batch);
            debug!(table = %self.table, %offset, "skipping committed batch");

            return self.finish(Ok(BatchOutcome::Skipped { offset }), started);
        }

        info!(table = %self.table, %offset, rows = batch.len(), "processing batch");

        let result = match self.config.batch_time_budget() {
            Some(budget) => {
                match tokio::time::timeout(budget, self.merge(batch, processing_time)).await {
                    Ok(result) => result,
                    Err(_) => Err(etl_error!(
                        ErrorKind::BatchTimeout,
                        "Batch exceeded its time budget",
                        format!("offset {offset} ran longer than {budget:?}")
                    )),
                }
            }
            None => self.merge(batch, processing_time).await,
        };

        self.finish(result.map(BatchOutcome::Applied), started)
    }

    async fn process_with_policy(&mut self, batch: Batch) -> EtlResult<BatchOutcome> {
        let retry = self.config.retry.clone();
        let mut retries = 0;

        loop {
            let err = match self.process_batch(batch.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };

            let schema_only = err.kinds().iter().all(|kind| *kind == ErrorKind::SchemaError);
            if schema_only && self.config.on_schema_error == SchemaErrorPolicy::Skip {
                return self.skip_batch(&batch, &err).await;
            }

            let policy = build_error_handling_policy(&err);
            if policy.retry_directive() == RetryDirective::Timed && retries + 1 < retry.max_attempts
            {
                retries += 1;
                let delay = retry.delay_for_retry(retries);
                warn!(
                    table = %self.table,
                    offset = %batch.offset,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying batch"
                );
                tokio::time::sleep(delay).await;

                continue;
            }

            error!(
                table = %self.table,
                offset = %batch.offset,
                error = %err,
                solution = policy.solution().unwrap_or("none"),
                "batch failed"
            );

            return Err(err);
        }
    }

    /// Commits the offset of a batch without applying any of its rows.
    async fn skip_batch(&mut self, batch: &Batch, cause: &EtlError) -> EtlResult<BatchOutcome> {
        let offset = batch.offset;

        if self.checkpoints.pending().is_some() {
            self.checkpoints.recover(&self.target).await?;
        }

        let generation = self.target.read_snapshot(&HashSet::new()).await?.generation();
        self.checkpoints
            .stage(offset, batch_content_hash(batch))
            .await?;

        let commit = AtomicCommit {
            expected_generation: generation,
            offset,
            mutations: Vec::new(),
        };
        match self.target.apply_atomic(commit).await? {
            ApplyOutcome::Committed { .. } => {
                self.checkpoints.commit(offset).await?;
            }
            ApplyOutcome::Conflict { current_generation } => {
                self.checkpoints.abort().await?;
                bail!(
                    ErrorKind::StorageConflict,
                    "Target changed while skipping a batch",
                    format!("expected generation {generation}, found {current_generation}")
                );
            }
        }

        warn!(
            table = %self.table,
            %offset,
            error = %cause,
            "skipped batch that failed schema reconciliation"
        );
        self.record_outcome(&BatchOutcome::SchemaSkipped { offset });

        Ok(BatchOutcome::SchemaSkipped { offset })
    }

    async fn merge(
        &mut self,
        batch: Batch,
        processing_time: DateTime<Utc>,
    ) -> EtlResult<BatchReport> {
        let config = self.config.clone();
        let offset = batch.offset;
        let batch_hash = batch_content_hash(&batch);

        let mut target_schema = self.target.schema().await?;
        let reconciler = SchemaReconciler::new(config.allow_schema_evolution);
        let schema_plan =
            reconciler.reconcile(&batch.schema, &target_schema, &config.partition_by)?;
        if !schema_plan.is_empty() {
            for column in &schema_plan.added_columns {
                info!(
                    table = %self.table,
                    column = %column.name,
                    typ = %column.typ,
                    "adding column"
                );
                self.target.add_column(column.clone()).await?;
            }
            target_schema = self.target.schema().await?;
        }
        reconciler.validate_rows(&batch, &target_schema, &config.partition_by)?;

        let Batch { schema, rows, .. } = batch;
        let records_received = rows.len();
        let records = Deduplicator::new(&schema, &config.partition_by, &config.order_by)?
            .deduplicate(rows)?;
        let duplicates_dropped = records_received - records.len();
        debug!(
            table = %self.table,
            %offset,
            records = records.len(),
            duplicates_dropped,
            "deduplicated batch"
        );

        let mapping = Arc::new(
            ColumnMapping::new(&target_schema, &schema, &config.partition_by)?
                .with_ordering_column(&target_schema, &config.order_by.column),
        );
        let ordering_type = schema
            .iter()
            .find(|column| column.name == config.order_by.column)
            .map(|column| column.typ);
        let processing_time = processing_time_cell(ordering_type, processing_time);

        let batch_keys: HashSet<BusinessKey> =
            records.iter().map(|record| record.key.clone()).collect();
        let records = Arc::new(records);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let planned = match self
                .plan(
                    records.clone(),
                    &batch_keys,
                    mapping.clone(),
                    processing_time.clone(),
                )
                .await
            {
                Ok(planned) => planned,
                Err(err) => {
                    self.checkpoints.abort().await?;
                    return Err(err);
                }
            };
            let PlannedBatch {
                plan,
                unchanged,
                generation,
            } = planned;

            if !plan.rejected.is_empty() {
                counter!(
                    ETL_MERGE_OUT_OF_ORDER_TOTAL,
                    TABLE_NAME_LABEL => self.table.clone()
                )
                .increment(plan.rejected.len() as u64);

                if config.strict_batch_atomicity {
                    self.checkpoints.abort().await?;
                    bail!(
                        ErrorKind::OutOfOrder,
                        "Batch contains out-of-order records",
                        format!(
                            "{} record(s) at offset {offset} are not newer than the current version, first key {}",
                            plan.rejected.len(),
                            plan.rejected[0].key
                        )
                    );
                }
            }

            if self.checkpoints.pending().is_none() {
                self.checkpoints.stage(offset, batch_hash.clone()).await?;
            }

            let commit = AtomicCommit {
                expected_generation: generation,
                offset,
                mutations: plan.mutations,
            };
            match self.target.apply_atomic(commit).await? {
                ApplyOutcome::Committed { generation } => {
                    etl_fail_point(MERGE_AFTER_APPLY_BEFORE_COMMIT)?;
                    self.checkpoints.commit(offset).await?;

                    let report = BatchReport {
                        offset,
                        records_received,
                        duplicates_dropped,
                        inserted: plan.counts.inserted,
                        updated: plan.counts.updated,
                        unchanged,
                        deleted: plan.counts.deleted,
                        backfilled: plan.counts.backfilled,
                        rejected: plan.rejected,
                        added_columns: schema_plan
                            .added_columns
                            .iter()
                            .map(|column| column.name.clone())
                            .collect(),
                        attempts: attempt,
                    };

                    info!(
                        table = %self.table,
                        %offset,
                        generation,
                        inserted = report.inserted,
                        updated = report.updated,
                        unchanged = report.unchanged,
                        deleted = report.deleted,
                        backfilled = report.backfilled,
                        rejected = report.rejected.len(),
                        attempts = report.attempts,
                        "applied batch"
                    );

                    return Ok(report);
                }
                ApplyOutcome::Conflict { current_generation } => {
                    counter!(
                        ETL_MERGE_STORAGE_CONFLICTS_TOTAL,
                        TABLE_NAME_LABEL => self.table.clone()
                    )
                    .increment(1);

                    if attempt >= config.retry.max_attempts {
                        self.checkpoints.abort().await?;
                        bail!(
                            ErrorKind::StorageConflict,
                            "Target kept changing while applying the batch",
                            format!(
                                "offset {offset} conflicted {attempt} time(s), last seen generation {current_generation}"
                            )
                        );
                    }

                    let delay = config.retry.delay_for_retry(attempt);
                    warn!(
                        table = %self.table,
                        %offset,
                        attempt,
                        expected_generation = generation,
                        current_generation,
                        delay_ms = delay.as_millis() as u64,
                        "storage conflict, re-planning batch"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Reads a fresh snapshot and plans the batch against it.
    async fn plan(
        &self,
        records: Arc<Vec<Record>>,
        batch_keys: &HashSet<BusinessKey>,
        mapping: Arc<ColumnMapping>,
        processing_time: Cell,
    ) -> EtlResult<PlannedBatch> {
        let read_keys = if self.config.delete_detection {
            let mut keys = self.target.current_keys().await?;
            keys.extend(batch_keys.iter().cloned());
            keys
        } else {
            batch_keys.clone()
        };

        let snapshot = Arc::new(self.target.read_snapshot(&read_keys).await?);
        let mut change_set = self
            .classify(records, snapshot.clone(), mapping.clone())
            .await?;
        if self.config.delete_detection {
            change_set.deletes =
                ChangeClassifier::new(&snapshot, &mapping).detect_deletes(batch_keys);
        }

        debug!(
            table = %self.table,
            generation = snapshot.generation(),
            inserts = change_set.inserts.len(),
            updates = change_set.updates.len(),
            unchanged = change_set.unchanged.len(),
            deletes = change_set.deletes.len(),
            "classified batch"
        );

        let unchanged = change_set.unchanged.len();
        let plan = match self.config.mode {
            MergeMode::Upsert => MergePlanner::new(&mapping).plan(change_set),
            MergeMode::Scd2 => Scd2Applier::new(&mapping, &snapshot, processing_time)
                .with_backfill(self.config.allow_backfill)
                .apply(change_set)?,
        };

        Ok(PlannedBatch {
            plan,
            unchanged,
            generation: snapshot.generation(),
        })
    }

    /// Classifies `records`, fanning out to blocking workers for large batches.
    async fn classify(
        &self,
        records: Arc<Vec<Record>>,
        snapshot: Arc<TargetSnapshot>,
        mapping: Arc<ColumnMapping>,
    ) -> EtlResult<ChangeSet> {
        let workers = self.config.classification_workers;
        if workers <= 1 || records.len() < PARALLEL_CLASSIFICATION_MIN_RECORDS {
            return Ok(ChangeClassifier::new(&snapshot, &mapping).classify(&records));
        }

        let chunk_size = records.len().div_ceil(workers);
        let handles = (0..records.len()).step_by(chunk_size).map(|start| {
            let end = (start + chunk_size).min(records.len());
            let records = records.clone();
            let snapshot = snapshot.clone();
            let mapping = mapping.clone();

            tokio::task::spawn_blocking(move || {
                ChangeClassifier::new(&snapshot, &mapping).classify(&records[start..end])
            })
        });

        let partials = try_join_all(handles).await?;
        debug!(table = %self.table, chunks = partials.len(), "classified batch in parallel");

        let mut change_set = ChangeSet::default();
        for partial in partials {
            change_set.extend(partial);
        }

        Ok(change_set)
    }

    fn warn_on_replay_mismatch(&self, batch: &Batch) {
        let Some(committed) = self.checkpoints.committed() else {
            return;
        };
        if committed.offset != batch.offset {
            return;
        }

        if let Some(recorded) = &committed.batch_hash {
            let replayed = batch_content_hash(batch);
            if *recorded != replayed {
                warn!(
                    table = %self.table,
                    offset = %batch.offset,
                    recorded = %recorded,
                    replayed = %replayed,
                    "replayed batch differs from the committed one, skipping it anyway"
                );
            }
        }
    }

    fn finish(
        &self,
        result: EtlResult<BatchOutcome>,
        started: Instant,
    ) -> EtlResult<BatchOutcome> {
        histogram!(
            ETL_MERGE_BATCH_DURATION_SECONDS,
            TABLE_NAME_LABEL => self.table.clone()
        )
        .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => self.record_outcome(outcome),
            Err(err) => {
                for kind in err.kinds() {
                    counter!(
                        ETL_MERGE_ERRORS_TOTAL,
                        TABLE_NAME_LABEL => self.table.clone(),
                        ERROR_KIND_LABEL => format!("{kind:?}")
                    )
                    .increment(1);
                }
                counter!(
                    ETL_MERGE_BATCHES_TOTAL,
                    TABLE_NAME_LABEL => self.table.clone(),
                    OUTCOME_LABEL => "failed"
                )
                .increment(1);
            }
        }

        result
    }

    fn record_outcome(&self, outcome: &BatchOutcome) {
        counter!(
            ETL_MERGE_BATCHES_TOTAL,
            TABLE_NAME_LABEL => self.table.clone(),
            OUTCOME_LABEL => outcome.label()
        )
        .increment(1);

        if let BatchOutcome::Applied(report) = outcome {
            for (kind, rows) in [
                ("insert", report.inserted),
                ("update", report.updated),
                ("delete", report.deleted),
                ("backfill", report.backfilled),
            ] {
                if rows > 0 {
                    counter!(
                        ETL_MERGE_ROWS_TOTAL,
                        TABLE_NAME_LABEL => self.table.clone(),
                        MUTATION_KIND_LABEL => kind
                    )
                    .increment(rows);
                }
            }
        }

        if let Some(committed) = self.checkpoints.committed_offset() {
            gauge!(
                ETL_MERGE_COMMITTED_OFFSET,
                TABLE_NAME_LABEL => self.table.clone()
            )
            .set(committed.value() as f64);
        }
    }
}

/// Converts the processing time to the type of the ordering column, so it can be compared
/// with ordering values in the stored history.
///
/// Integer columns receive epoch milliseconds and float columns epoch seconds.
fn processing_time_cell(ordering_type: Option<ColumnType>, now: DateTime<Utc>) -> Cell {
    match ordering_type {
        Some(ColumnType::Timestamp) => Cell::Timestamp(now.naive_utc()),
        Some(ColumnType::Date) => Cell::Date(now.date_naive()),
        Some(ColumnType::Int64) => Cell::I64(now.timestamp_millis()),
        Some(ColumnType::Float64) => Cell::F64(now.timestamp_millis() as f64 / 1000.0),
        Some(ColumnType::Text) => Cell::String(now.to_rfc3339()),
        _ => Cell::TimestampTz(now),
    }
}
