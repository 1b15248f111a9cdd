//! Run finalization.
//!
//! Closing a run is a single conditional update on the sync state row (see
//! [`SyncStateRepository::close_run`]). Whoever's update lands performs the follow-up work:
//! history status, failure summary, checkpoint handling and metrics. Every other caller
//! observes `None`/`false` and does nothing, so racing batch completions finalize once.

use metrics::{counter, histogram};
use sea_orm::DbErr;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointManager;
use crate::models::checkpoint::CheckpointStage;
use crate::models::sync_run::RunStatus;
use crate::models::sync_state::Model as SyncStateModel;
use crate::queue::JobQueue;
use crate::repositories::{RunClose, SyncRunRepository, SyncStateRepository};

#[derive(Debug, Clone)]
pub struct RunFinalizer {
    states: SyncStateRepository,
    runs: SyncRunRepository,
    checkpoints: CheckpointManager,
    queue: JobQueue,
}

/// Message stored when some batches of an otherwise finished run failed
pub fn batch_failure_summary(failed: i32, total: i32) -> String {
    format!("{failed} of {total} batches failed")
}

impl RunFinalizer {
    pub fn new(
        states: SyncStateRepository,
        runs: SyncRunRepository,
        checkpoints: CheckpointManager,
        queue: JobQueue,
    ) -> Self {
        Self {
            states,
            runs,
            checkpoints,
            queue,
        }
    }

    /// Close the run if enumeration is done and every batch is accounted for.
    ///
    /// Returns the final status when this call closed the run.
    pub async fn try_complete(&self, run_id: Uuid) -> Result<Option<RunStatus>, DbErr> {
        if !self.states.close_run(run_id, RunClose::Completed).await? {
            return Ok(None);
        }

        let Some(state) = self.states.find_by_run(run_id).await? else {
            warn!(%run_id, "Closed run vanished before follow-up");
            return Ok(None);
        };

        let (status, error) = if state.batch_failed == 0 {
            (RunStatus::Succeeded, None)
        } else {
            let summary = batch_failure_summary(state.batch_failed, state.batch_total);
            self.states.set_last_sync_error(run_id, &summary).await?;
            let status = if state.batch_failed >= state.batch_total {
                RunStatus::Failed
            } else {
                RunStatus::Partial
            };
            (status, Some(summary))
        };

        self.runs.finish(run_id, status, &state, error).await?;

        if status == RunStatus::Succeeded {
            if let Err(err) = self.checkpoints.clear(run_id).await {
                warn!(%run_id, error = %err, "Failed to clear checkpoints");
            }
        } else {
            self.checkpoints
                .save(
                    run_id,
                    None,
                    CheckpointStage::Finalizing,
                    Some(json!({ "status": status.as_str(), "batch_failed": state.batch_failed })),
                )
                .await;
        }

        record_close_metrics(&state, status);
        info!(
            %run_id,
            store_id = %state.store_id,
            status = status.as_str(),
            processed = state.run_processed,
            created = state.run_created,
            updated = state.run_updated,
            deleted = state.run_deleted,
            failed = state.run_failed,
            "Sync run completed"
        );
        Ok(Some(status))
    }

    /// Close the run as failed, cancelled or timed out.
    ///
    /// Pending batches are counted as failed, partial counters are kept and the watermark is
    /// left alone. Returns false when the run was already closed.
    pub async fn fail(&self, run_id: Uuid, status: RunStatus, message: &str) -> Result<bool, DbErr> {
        let closed = self
            .states
            .close_run(
                run_id,
                RunClose::Failed {
                    message: message.to_string(),
                },
            )
            .await?;
        if !closed {
            return Ok(false);
        }

        if let Err(err) = self.queue.cancel_correlated(run_id, message).await {
            warn!(%run_id, error = %err, "Failed to cancel queued batches");
        }

        let state = self.states.find_by_run(run_id).await?;
        if let Some(state) = &state {
            self.runs
                .finish(run_id, status, state, Some(message.to_string()))
                .await?;
            record_close_metrics(state, status);
        }

        self.checkpoints
            .save(
                run_id,
                None,
                CheckpointStage::Failed,
                Some(json!({ "status": status.as_str(), "error": message })),
            )
            .await;

        warn!(%run_id, status = status.as_str(), error = message, "Sync run closed without success");
        Ok(true)
    }
}

fn record_close_metrics(state: &SyncStateModel, status: RunStatus) {
    counter!("catalog_sync_runs_total", "status" => status.as_str()).increment(1);
    if let (Some(started), Some(finished)) = (state.run_started_at, state.run_completed_at) {
        let elapsed = (finished - started).num_milliseconds().max(0) as f64 / 1_000.0;
        histogram!("catalog_sync_run_duration_seconds").record(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_summary_wording() {
        assert_eq!(batch_failure_summary(2, 5), "2 of 5 batches failed");
    }
}
