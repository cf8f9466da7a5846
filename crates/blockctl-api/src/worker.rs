//! Background revert worker.
//!
//! The request path hands claimed reverts to [`ChannelDispatcher`], which
//! queues them on a bounded tokio channel. [`run_revert_worker`] drains the
//! queue and records each outcome through `complete_revert`.

use std::sync::Arc;

use blockctl_core::revert::complete_revert;
use blockctl_core::{ApiError, RevertDispatcher, RevertJob, VolumeStore};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Performs the data copy for a revert. Returns whether it succeeded.
pub trait RevertExecutor: Send + Sync {
    /// Run `job` to completion.
    fn execute(&self, job: &RevertJob) -> bool;
}

/// Executor for stores without a data plane: every revert succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

impl RevertExecutor for NoopExecutor {
    fn execute(&self, _job: &RevertJob) -> bool {
        true
    }
}

/// Queues revert jobs for the worker task.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<RevertJob>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiving end for the worker.
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<RevertJob>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self { tx }, rx)
    }
}

impl RevertDispatcher for ChannelDispatcher {
    fn dispatch(&self, job: RevertJob) -> blockctl_core::Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => {
                ApiError::backend(format!("revert queue is full, dropped volume {}", job.volume_id))
            }
            TrySendError::Closed(_) => ApiError::backend("revert worker is not running"),
        })
    }
}

/// Drain `rx` until every sender is gone.
pub async fn run_revert_worker(
    store: Arc<dyn VolumeStore>,
    executor: Arc<dyn RevertExecutor>,
    mut rx: mpsc::Receiver<RevertJob>,
) {
    tracing::info!("revert worker started");
    while let Some(job) = rx.recv().await {
        let succeeded = executor.execute(&job);
        if let Err(e) = complete_revert(store.as_ref(), &job, succeeded) {
            tracing::error!(volume_id = %job.volume_id, error = %e, "failed to record revert outcome");
        }
    }
    tracing::info!("revert worker stopped");
}
