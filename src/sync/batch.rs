//! Batch processing.
//!
//! A batch is a list of item ids discovered by enumeration. [`BatchProcessor`] fetches their
//! detail in sub-batches with bounded concurrency, upserts each item and folds the counters
//! into the run after every sub-batch. The same processor backs inline dispatch and the
//! queued [`BatchWorker`].
//!
//! Queued batches are delivered at least once. Counters only move for writes the store
//! reports as new to this run, so replaying a batch leaves them unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use metrics::counter;
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::finalize::RunFinalizer;
use super::transform::transform_item;
use crate::models::queue_task::Model as QueueTask;
use crate::models::sync_state::SyncType;
use crate::queue::{TaskError, TaskHandler};
use crate::repositories::{
    ItemRepository, ProgressDelta, SyncRunRepository, SyncStateRepository, UpsertOutcome,
};
use crate::source::{SourceClient, SourceClientFactory, SourceError, StoreCredentials};

/// Payload of a queued batch task; the batch id is the task id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTaskPayload {
    pub run_id: Uuid,
    pub store_id: String,
    pub sync_type: SyncType,
    pub credentials: StoreCredentials,
    pub item_ids: Vec<String>,
    pub batch_id: Uuid,
    pub detail_batch_size: usize,
    pub detail_concurrency: usize,
}

/// Item-level result of processing one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatchReport {
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub failed: i64,
}

impl BatchReport {
    fn absorb(&mut self, delta: ProgressDelta) {
        self.processed += delta.processed;
        self.created += delta.created;
        self.updated += delta.updated;
        self.failed += delta.failed;
    }
}

enum ItemOutcome {
    Upserted(UpsertOutcome),
    Failed { item_id: String, error: String },
}

#[derive(Debug, Clone)]
pub struct BatchProcessor {
    items: ItemRepository,
    states: SyncStateRepository,
    runs: SyncRunRepository,
}

impl BatchProcessor {
    pub fn new(
        items: ItemRepository,
        states: SyncStateRepository,
        runs: SyncRunRepository,
    ) -> Self {
        Self {
            items,
            states,
            runs,
        }
    }

    /// Process one batch.
    ///
    /// Fetch and transform failures are per item: they are recorded against the run and
    /// counted, never returned. Only storage errors abort the batch.
    #[instrument(skip(self, client, item_ids), fields(items = item_ids.len()))]
    #[allow(clippy::too_many_arguments)]
    pub async fn process(
        &self,
        client: &dyn SourceClient,
        run_id: Uuid,
        store_id: &str,
        batch_id: Uuid,
        item_ids: &[String],
        detail_batch_size: usize,
        detail_concurrency: usize,
    ) -> Result<BatchReport, DbErr> {
        let mut report = BatchReport::default();

        for chunk in item_ids.chunks(detail_batch_size.max(1)) {
            let outcomes: Vec<Result<ItemOutcome, DbErr>> =
                futures::stream::iter(chunk.iter().cloned())
                    .map(|item_id| async move {
                        self.process_item(client, run_id, store_id, &item_id).await
                    })
                    .buffer_unordered(detail_concurrency.max(1))
                    .collect()
                    .await;

            let mut delta = ProgressDelta::default();
            for outcome in outcomes {
                match outcome? {
                    ItemOutcome::Upserted(UpsertOutcome::Created) => {
                        delta.processed += 1;
                        delta.created += 1;
                    }
                    ItemOutcome::Upserted(UpsertOutcome::Updated) => {
                        delta.processed += 1;
                        delta.updated += 1;
                    }
                    ItemOutcome::Upserted(UpsertOutcome::AlreadyApplied) => {
                        debug!(%run_id, %batch_id, "Item already written by this run");
                    }
                    ItemOutcome::Failed { item_id, error } => {
                        warn!(%run_id, %batch_id, %item_id, %error, "Item failed");
                        if self
                            .runs
                            .record_error(run_id, Some(&item_id), Some(batch_id), &error)
                            .await?
                        {
                            delta.failed += 1;
                        }
                    }
                }
            }

            counter!("catalog_sync_items_total", "outcome" => "created")
                .increment(delta.created as u64);
            counter!("catalog_sync_items_total", "outcome" => "updated")
                .increment(delta.updated as u64);
            counter!("catalog_sync_items_total", "outcome" => "failed")
                .increment(delta.failed as u64);

            if !self.states.record_item_progress(run_id, delta).await? {
                debug!(%run_id, "Run closed while batch was in flight; progress not recorded");
            }
            report.absorb(delta);
        }

        Ok(report)
    }

    async fn process_item(
        &self,
        client: &dyn SourceClient,
        run_id: Uuid,
        store_id: &str,
        item_id: &str,
    ) -> Result<ItemOutcome, DbErr> {
        let failed = |error: String| ItemOutcome::Failed {
            item_id: item_id.to_string(),
            error,
        };

        let detail = match client.fetch_item(item_id).await {
            Ok(detail) => detail,
            Err(err) => return Ok(failed(err.to_string())),
        };
        let record = match transform_item(store_id, item_id, detail) {
            Ok(record) => record,
            Err(err) => return Ok(failed(err.to_string())),
        };

        let outcome = self.items.upsert(&record, run_id).await?;
        Ok(ItemOutcome::Upserted(outcome))
    }
}

fn task_error_from_source(err: SourceError) -> TaskError {
    match err {
        SourceError::Unauthorized(_) | SourceError::Config(_) => TaskError::permanent(err.to_string()),
        SourceError::RateLimited { retry_after } => TaskError::Transient {
            message: err.to_string(),
            retry_after: Some(retry_after),
        },
        other => TaskError::transient(other.to_string()),
    }
}

/// Queue handler running [`BatchTaskPayload`]s
pub struct BatchWorker {
    processor: BatchProcessor,
    states: SyncStateRepository,
    runs: SyncRunRepository,
    finalizer: RunFinalizer,
    sources: Arc<dyn SourceClientFactory>,
}

impl BatchWorker {
    pub fn new(
        processor: BatchProcessor,
        states: SyncStateRepository,
        runs: SyncRunRepository,
        finalizer: RunFinalizer,
        sources: Arc<dyn SourceClientFactory>,
    ) -> Self {
        Self {
            processor,
            states,
            runs,
            finalizer,
            sources,
        }
    }

    async fn complete_if_terminal(&self, run_id: Uuid) {
        match self.finalizer.try_complete(run_id).await {
            Ok(Some(status)) => debug!(%run_id, status = status.as_str(), "Batch closed the run"),
            Ok(None) => {}
            Err(err) => warn!(%run_id, error = %err, "Completion attempt failed"),
        }
    }
}

#[async_trait]
impl TaskHandler for BatchWorker {
    #[instrument(skip_all, fields(task_id = %task.id))]
    async fn handle(&self, task: &QueueTask) -> Result<JsonValue, TaskError> {
        let payload: BatchTaskPayload = serde_json::from_value(task.payload.clone())
            .map_err(|err| TaskError::permanent(format!("invalid batch payload: {err}")))?;

        let state = self
            .states
            .find_by_run(payload.run_id)
            .await
            .map_err(|err| TaskError::transient(err.to_string()))?;
        let Some(state) = state.filter(|state| state.is_in_progress) else {
            debug!(run_id = %payload.run_id, "Run no longer open; skipping batch");
            return Ok(json!({ "skipped": true }));
        };
        if state.cancel_requested {
            return Err(TaskError::permanent("sync run was cancelled"));
        }

        let client = self
            .sources
            .connect(&payload.credentials)
            .map_err(task_error_from_source)?;

        let report = self
            .processor
            .process(
                client.as_ref(),
                payload.run_id,
                &payload.store_id,
                payload.batch_id,
                &payload.item_ids,
                payload.detail_batch_size,
                payload.detail_concurrency,
            )
            .await
            .map_err(|err| TaskError::transient(err.to_string()))?;

        serde_json::to_value(&report).map_err(|err| TaskError::permanent(err.to_string()))
    }

    async fn on_completed(&self, task: &QueueTask, _output: &JsonValue) {
        let Some(run_id) = task.correlation_id else {
            return;
        };

        match self.states.record_batch_outcome(run_id, true).await {
            Ok(true) => {
                counter!("catalog_sync_batches_total", "outcome" => "succeeded").increment(1)
            }
            Ok(false) => debug!(%run_id, "Batch outcome not recorded; run already closed"),
            Err(err) => warn!(%run_id, error = %err, "Failed to record batch success"),
        }
        self.complete_if_terminal(run_id).await;
    }

    async fn on_failed(&self, task: &QueueTask, error: &TaskError) {
        let Some(run_id) = task.correlation_id else {
            return;
        };

        let message = format!("batch failed: {}", error.message());
        if let Err(err) = self
            .runs
            .record_error(run_id, None, Some(task.id), &message)
            .await
        {
            warn!(%run_id, error = %err, "Failed to record batch error");
        }

        match self.states.record_batch_outcome(run_id, false).await {
            Ok(true) => counter!("catalog_sync_batches_total", "outcome" => "failed").increment(1),
            Ok(false) => debug!(%run_id, "Batch outcome not recorded; run already closed"),
            Err(err) => warn!(%run_id, error = %err, "Failed to record batch failure"),
        }
        self.complete_if_terminal(run_id).await;
    }
}
