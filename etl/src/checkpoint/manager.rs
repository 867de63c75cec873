use chrono::Utc;
use tracing::{info, warn};

use crate::bail;
use crate::checkpoint::{Checkpoint, CheckpointRecord};
use crate::error::{ErrorKind, EtlResult};
use crate::store::checkpoint::CheckpointStore;
use crate::store::target::TargetStore;
use crate::types::Offset;

/// Outcome of [`CheckpointManager::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Checkpoint and target already agreed.
    Clean,
    /// The target carried the pending offset, so the pending checkpoint was committed.
    CommittedPending(Offset),
    /// The pending batch never reached the target and was dropped.
    DroppedPending(Offset),
    /// The target was ahead of the committed checkpoint and its offset was adopted.
    AdoptedTargetOffset(Offset),
}

/// Tracks committed batch offsets for one pipeline.
#[derive(Debug)]
pub struct CheckpointManager<S> {
    store: S,
    record: CheckpointRecord,
}

impl<S> CheckpointManager<S>
where
    S: CheckpointStore,
{
    /// Loads the stored record, starting empty when nothing was saved yet.
    pub async fn load(store: S) -> EtlResult<Self> {
        let record = store.load().await?.unwrap_or_default();

        info!(
            committed = ?record.committed.as_ref().map(|c| c.offset.value()),
            pending = ?record.pending.as_ref().map(|c| c.offset.value()),
            "loaded checkpoint"
        );

        Ok(Self { store, record })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn committed(&self) -> Option<&Checkpoint> {
        self.record.committed.as_ref()
    }

    pub fn committed_offset(&self) -> Option<Offset> {
        self.committed().map(|checkpoint| checkpoint.offset)
    }

    pub fn pending(&self) -> Option<&Checkpoint> {
        self.record.pending.as_ref()
    }

    /// Returns whether the batch at `offset` is already durable in the target.
    pub fn has_committed(&self, offset: Offset) -> bool {
        self.committed_offset()
            .is_some_and(|committed| offset <= committed)
    }

    /// Records `offset` as pending, before its batch is applied.
    ///
    /// Staging the offset that is already pending replaces its hash.
    pub async fn stage(&mut self, offset: Offset, batch_hash: String) -> EtlResult<()> {
        if self.has_committed(offset) {
            bail!(
                ErrorKind::InvalidState,
                "Cannot stage an offset that is already committed",
                format!(
                    "offset {offset} is at or before the committed offset {}",
                    self.committed_offset().map_or(0, |o| o.value())
                )
            );
        }

        if let Some(pending) = self.pending()
            && pending.offset != offset
        {
            bail!(
                ErrorKind::InvalidState,
                "Another offset is already pending",
                format!("offset {} is pending, cannot stage {offset}", pending.offset)
            );
        }

        let mut next = self.record.clone();
        next.pending = Some(Checkpoint {
            offset,
            batch_hash: Some(batch_hash),
            recorded_at: Utc::now(),
        });

        self.persist(next).await
    }

    /// Confirms the pending checkpoint for `offset`.
    pub async fn commit(&mut self, offset: Offset) -> EtlResult<Checkpoint> {
        let Some(pending) = self.pending().filter(|pending| pending.offset == offset) else {
            bail!(
                ErrorKind::InvalidState,
                "Cannot commit an offset that is not pending",
                format!(
                    "offset {offset} is not pending (pending: {:?})",
                    self.pending().map(|p| p.offset.value())
                )
            );
        };

        let checkpoint = Checkpoint {
            recorded_at: Utc::now(),
            ..pending.clone()
        };
        let next = CheckpointRecord {
            committed: Some(checkpoint.clone()),
            pending: None,
        };
        self.persist(next).await?;

        Ok(checkpoint)
    }

    /// Drops the pending checkpoint, if any.
    pub async fn abort(&mut self) -> EtlResult<()> {
        if self.record.pending.is_none() {
            return Ok(());
        }

        let next = CheckpointRecord {
            committed: self.record.committed.clone(),
            pending: None,
        };

        self.persist(next).await
    }

    /// Resolves a pending checkpoint against the target.
    ///
    /// The target stores the offset of its last apply in the same atomic unit as the rows,
    /// so it decides whether a pending batch landed.
    pub async fn recover<T>(&mut self, target: &T) -> EtlResult<RecoveryAction>
    where
        T: TargetStore,
    {
        let applied = target.last_applied_offset().await?;
        let mut next = self.record.clone();

        let mut action = match next.pending.take() {
            Some(pending) if applied == Some(pending.offset) => {
                let offset = pending.offset;
                next.committed = Some(Checkpoint {
                    recorded_at: Utc::now(),
                    ..pending
                });
                RecoveryAction::CommittedPending(offset)
            }
            Some(pending) => RecoveryAction::DroppedPending(pending.offset),
            None => RecoveryAction::Clean,
        };

        if let Some(applied) = applied {
            let behind = next
                .committed
                .as_ref()
                .is_none_or(|committed| committed.offset < applied);
            if behind {
                next.committed = Some(Checkpoint {
                    offset: applied,
                    batch_hash: None,
                    recorded_at: Utc::now(),
                });
                action = RecoveryAction::AdoptedTargetOffset(applied);
            }
        }

        match action {
            RecoveryAction::Clean => return Ok(action),
            RecoveryAction::CommittedPending(offset) => {
                warn!(%offset, "committed pending checkpoint found applied in the target")
            }
            RecoveryAction::DroppedPending(offset) => {
                warn!(%offset, "dropped pending checkpoint that never reached the target")
            }
            RecoveryAction::AdoptedTargetOffset(offset) => {
                warn!(%offset, "adopted offset from the target ahead of the checkpoint")
            }
        }

        self.persist(next).await?;

        Ok(action)
    }

    /// Moves the committed checkpoint to `offset`, or clears it with [`None`].
    ///
    /// This is an operator action for reprocessing. It is the only way the committed
    /// checkpoint moves backwards. The target keeps its own applied offset, so a target
    /// that was not restored as well is adopted again by the next [`Self::recover`].
    pub async fn reset_to(&mut self, offset: Option<Offset>) -> EtlResult<()> {
        let next = CheckpointRecord {
            committed: offset.map(|offset| Checkpoint {
                offset,
                batch_hash: None,
                recorded_at: Utc::now(),
            }),
            pending: None,
        };

        warn!(
            from = ?self.committed_offset().map(|o| o.value()),
            to = ?offset.map(|o| o.value()),
            "resetting checkpoint"
        );

        self.persist(next).await
    }

    async fn persist(&mut self, next: CheckpointRecord) -> EtlResult<()> {
        self.store.save(&next).await?;
        self.record = next;

        Ok(())
    }
}
