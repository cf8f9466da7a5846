//! Revert a volume to its latest snapshot.
//!
//! A revert claims two entities with two independent conditional status
//! updates: the volume goes `available -> reverting`, then the snapshot goes
//! `available -> restoring`. If the second claim fails the first is undone
//! before the conflict is reported. Nothing is locked in-process; the store's
//! compare-and-swap is the only serialization point, so of two concurrent
//! reverts of one volume exactly one gets past the volume claim.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{ApiError, ResourceKind, Result};
use crate::model::{SnapshotStatus, VolumeStatus};
use crate::store::VolumeStore;
use crate::version::{Feature, FeatureSet};

/// Parsed body of a revert action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevertRequest {
    /// Snapshot to revert to; must be the volume's latest.
    pub snapshot_id: Uuid,
}

impl RevertRequest {
    /// Parse the inner object of `{"revert": {"snapshot_id": "..."}}`.
    pub fn from_json(body: &Value) -> Result<Self> {
        let raw = body
            .get("snapshot_id")
            .ok_or_else(|| ApiError::InvalidInput("revert requires a snapshot_id".to_string()))?;
        let text = raw
            .as_str()
            .ok_or_else(|| ApiError::InvalidInput(format!("snapshot_id must be a string, got {}", raw)))?;
        let snapshot_id = Uuid::parse_str(text.trim())
            .map_err(|_| ApiError::InvalidInput(format!("snapshot_id {:?} is not a valid id", text)))?;
        Ok(Self { snapshot_id })
    }
}

/// Work handed to the backend once both entities are claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertJob {
    /// Volume being reverted, now `reverting`.
    pub volume_id: Uuid,
    /// Source snapshot, now `restoring`.
    pub snapshot_id: Uuid,
    /// User who asked for the revert.
    pub requested_by: String,
}

/// Port to the worker that performs the data copy.
pub trait RevertDispatcher: Send + Sync {
    /// Queue `job`. An error means the job will never run.
    fn dispatch(&self, job: RevertJob) -> Result<()>;
}

impl<F> RevertDispatcher for F
where
    F: Fn(RevertJob) -> Result<()> + Send + Sync,
{
    fn dispatch(&self, job: RevertJob) -> Result<()> {
        self(job)
    }
}

/// Drives a revert request from validation to dispatch.
pub struct RevertStateMachine<'a> {
    store: &'a dyn VolumeStore,
    dispatcher: &'a dyn RevertDispatcher,
}

impl<'a> RevertStateMachine<'a> {
    /// Create a state machine over `store`, handing jobs to `dispatcher`.
    pub fn new(store: &'a dyn VolumeStore, dispatcher: &'a dyn RevertDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Validate, claim both entities and dispatch the revert.
    ///
    /// Every precondition is checked before the first status write. On
    /// success the volume is `reverting`, the snapshot `restoring`, and the
    /// returned job has been handed to the dispatcher.
    pub fn revert(
        &self,
        ctx: &RequestContext,
        features: &FeatureSet,
        volume_id: Uuid,
        request: RevertRequest,
    ) -> Result<RevertJob> {
        features.require(Feature::VolumeRevert)?;

        let volume = self
            .store
            .get_volume(volume_id)?
            .filter(|v| ctx.can_see(&v.project_id))
            .ok_or_else(|| ApiError::NotFound {
                kind: ResourceKind::Volume,
                id: volume_id.to_string(),
            })?;

        let snapshot_id = request.snapshot_id;
        let snapshot = self.store.get_snapshot(snapshot_id)?.ok_or_else(|| ApiError::NotFound {
            kind: ResourceKind::Snapshot,
            id: snapshot_id.to_string(),
        })?;

        if snapshot.volume_id != volume.id {
            return Err(ApiError::Mismatch(format!(
                "snapshot {} does not belong to volume {}",
                snapshot_id, volume_id
            )));
        }
        let latest = self.store.get_latest_snapshot(volume_id)?.map(|s| s.id);
        if latest != Some(snapshot_id) {
            return Err(ApiError::Mismatch(format!(
                "snapshot {} is not the latest snapshot of volume {}",
                snapshot_id, volume_id
            )));
        }

        if !self.store.conditional_update_volume_status(
            volume_id,
            &[VolumeStatus::Available],
            VolumeStatus::Reverting,
        )? {
            tracing::warn!(%volume_id, "revert rejected: volume is not available");
            return Err(ApiError::conflict(format!(
                "volume {} must be available to revert",
                volume_id
            )));
        }
        tracing::info!(%volume_id, "volume claimed for revert");

        let claimed = self.store.conditional_update_snapshot_status(
            snapshot_id,
            &[SnapshotStatus::Available],
            SnapshotStatus::Restoring,
        );
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%volume_id, %snapshot_id, "revert rejected: snapshot is not available");
                let rollback_error = self.release_volume(volume_id);
                return Err(ApiError::Conflict {
                    message: format!("snapshot {} must be available to revert", snapshot_id),
                    rollback_error,
                });
            }
            Err(err) => {
                let rollback_error = self.release_volume(volume_id);
                return Err(err.with_rollback_error(rollback_error));
            }
        }
        tracing::info!(%volume_id, %snapshot_id, "snapshot claimed for revert");

        let job = RevertJob {
            volume_id,
            snapshot_id,
            requested_by: ctx.user_id.clone(),
        };
        if let Err(err) = self.dispatcher.dispatch(job.clone()) {
            tracing::error!(%volume_id, %snapshot_id, error = %err, "failed to dispatch revert");
            let failures: Vec<String> = [self.release_snapshot(snapshot_id), self.release_volume(volume_id)]
                .into_iter()
                .flatten()
                .collect();
            let rollback_error = (!failures.is_empty()).then(|| failures.join("; "));
            return Err(ApiError::backend(format!(
                "failed to dispatch revert of volume {}: {}",
                volume_id, err
            ))
            .with_rollback_error(rollback_error));
        }

        tracing::info!(%volume_id, %snapshot_id, user_id = %ctx.user_id, "revert dispatched");
        Ok(job)
    }

    /// Compensate the volume claim. Returns a description of the failure if
    /// the volume could not be put back.
    fn release_volume(&self, volume_id: Uuid) -> Option<String> {
        let failure = match self.store.conditional_update_volume_status(
            volume_id,
            &[VolumeStatus::Reverting],
            VolumeStatus::Available,
        ) {
            Ok(true) => return None,
            Ok(false) => format!("volume {} was no longer reverting", volume_id),
            Err(err) => err.to_string(),
        };
        tracing::error!(%volume_id, error = %failure, "failed to roll back volume status");
        Some(failure)
    }

    /// Snapshot counterpart of [`Self::release_volume`].
    fn release_snapshot(&self, snapshot_id: Uuid) -> Option<String> {
        let failure = match self.store.conditional_update_snapshot_status(
            snapshot_id,
            &[SnapshotStatus::Restoring],
            SnapshotStatus::Available,
        ) {
            Ok(true) => return None,
            Ok(false) => format!("snapshot {} was no longer restoring", snapshot_id),
            Err(err) => err.to_string(),
        };
        tracing::error!(%snapshot_id, error = %failure, "failed to roll back snapshot status");
        Some(failure)
    }
}

/// Record the worker's outcome for `job`.
///
/// On success both entities return to `available`. On failure the volume
/// goes to `error` and the snapshot is released.
pub fn complete_revert(store: &dyn VolumeStore, job: &RevertJob, succeeded: bool) -> Result<()> {
    let volume_status = if succeeded {
        VolumeStatus::Available
    } else {
        VolumeStatus::Error
    };

    let volume_done =
        store.conditional_update_volume_status(job.volume_id, &[VolumeStatus::Reverting], volume_status)?;
    let snapshot_done = store.conditional_update_snapshot_status(
        job.snapshot_id,
        &[SnapshotStatus::Restoring],
        SnapshotStatus::Available,
    )?;

    if !volume_done || !snapshot_done {
        return Err(ApiError::conflict(format!(
            "revert of volume {} to snapshot {} was not in progress",
            job.volume_id, job.snapshot_id
        )));
    }

    if succeeded {
        tracing::info!(volume_id = %job.volume_id, snapshot_id = %job.snapshot_id, "revert completed");
    } else {
        tracing::warn!(volume_id = %job.volume_id, snapshot_id = %job.snapshot_id, "revert failed, volume set to error");
    }
    Ok(())
}
