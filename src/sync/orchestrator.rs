//! # Sync Orchestrator
//!
//! Drives one sync run for a `(store, sync type)` key:
//!
//! 1. [`SyncOrchestrator::begin_run`] claims the key with a compare-and-set on the sync
//!    state row (resetting an abandoned run first) and decides between a full and an
//!    incremental run.
//! 2. [`SyncOrchestrator::execute`] enumerates ids page by page, deduplicates them, and
//!    dispatches batches either inline or onto the job queue. After a full run whose
//!    enumeration ran to exhaustion, items missing from the enumeration are soft-deleted.
//! 3. The run is closed through [`RunFinalizer`], by this task or by the last queued batch.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::{DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::batch::{BatchProcessor, BatchTaskPayload, BatchWorker};
use super::finalize::RunFinalizer;
use super::options::SyncOptions;
use super::tracker::ExecutionTracker;
use crate::checkpoint::CheckpointManager;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::checkpoint::CheckpointStage;
use crate::models::sync_run::{DispatchMode, RunStatus};
use crate::models::sync_state::{BatchProgress, Model as SyncStateModel, RunMode, SyncStateView, SyncType};
use crate::queue::JobQueue;
use crate::repositories::{ItemRepository, SyncRunRepository, SyncStateRepository};
use crate::source::timestamp::format_source_timestamp;
use crate::source::{SourceClient, SourceClientFactory, SourceFilters, StoreCredentials};

/// Errors included in status views
const STATUS_ERROR_LIMIT: u64 = 100;

/// Why enumeration stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The source had no more pages
    Exhausted,
    /// `max_items` distinct ids were collected
    MaxItems,
    /// Cancellation was requested
    Cancelled,
    /// Enumeration yielded far more ids than the source said it holds
    Runaway,
}

/// Outcome of [`SyncOrchestrator::execute`]
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub store_id: String,
    pub sync_type: SyncType,
    pub mode: RunMode,
    pub dispatch: DispatchMode,
    /// `running` while queued batches are still outstanding
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub discovered: i64,
    pub duplicates: i64,
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub deleted: i64,
    pub failed: i64,
    pub batch_progress: BatchProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A claimed run, ready for [`SyncOrchestrator::execute`]
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub run_id: Uuid,
    pub store_id: String,
    pub sync_type: SyncType,
    pub mode: RunMode,
    pub credentials: StoreCredentials,
    pub options: SyncOptions,
    /// Watermark the incremental filter is computed from
    pub watermark: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl PreparedRun {
    /// Source filters for this run; the lower bound is rendered in the store's timezone
    pub fn filters(&self) -> SourceFilters {
        let updated_at_min = match (self.mode, self.watermark) {
            (RunMode::Incremental, Some(watermark)) => {
                Some(format_source_timestamp(watermark, self.options.timezone))
            }
            _ => None,
        };
        SourceFilters {
            updated_at_min,
            extra: self.options.filters.clone(),
        }
    }
}

/// Stops enumeration whose volume is implausible against the source's own count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunawayGuard {
    estimate: Option<u64>,
    multiplier: f64,
}

impl RunawayGuard {
    pub fn new(estimate: Option<u64>, multiplier: f64) -> Self {
        Self {
            estimate,
            multiplier,
        }
    }

    /// `discovered` counts every id yielded, duplicates included
    pub fn check(&self, discovered: u64, duplicates: u64) -> Option<String> {
        let estimate = self.estimate?.max(1);
        let ceiling = estimate as f64 * self.multiplier;
        if discovered as f64 > ceiling {
            return Some(format!(
                "Runaway enumeration: {discovered} ids discovered against an estimate of {estimate} (limit {ceiling:.0})"
            ));
        }
        if duplicates > estimate {
            return Some(format!(
                "Runaway enumeration: {duplicates} duplicate ids against an estimate of {estimate}"
            ));
        }
        None
    }
}

fn stale_message(run_id: Uuid, threshold_minutes: i64) -> String {
    format!(
        "Sync timed out: run {run_id} exceeded the {threshold_minutes} minute staleness threshold"
    )
}

/// Enumeration state for a single run
struct Enumeration {
    seen: HashSet<String>,
    pending: Vec<String>,
    discovered: u64,
    duplicates: u64,
    batch_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    states: SyncStateRepository,
    runs: SyncRunRepository,
    items: ItemRepository,
    checkpoints: CheckpointManager,
    processor: BatchProcessor,
    finalizer: RunFinalizer,
    tracker: ExecutionTracker,
    queue: JobQueue,
    sources: Arc<dyn SourceClientFactory>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        db: DatabaseConnection,
        queue: JobQueue,
        tracker: ExecutionTracker,
        sources: Arc<dyn SourceClientFactory>,
        config: SyncConfig,
    ) -> Self {
        let states = SyncStateRepository::new(db.clone());
        let runs = SyncRunRepository::new(db.clone());
        let items = ItemRepository::new(db.clone());
        let checkpoints = CheckpointManager::new(db);
        let processor = BatchProcessor::new(items.clone(), states.clone(), runs.clone());
        let finalizer = RunFinalizer::new(
            states.clone(),
            runs.clone(),
            checkpoints.clone(),
            queue.clone(),
        );

        Self {
            states,
            runs,
            items,
            checkpoints,
            processor,
            finalizer,
            tracker,
            queue,
            sources,
            config,
        }
    }

    pub fn finalizer(&self) -> &RunFinalizer {
        &self.finalizer
    }

    pub fn processor(&self) -> &BatchProcessor {
        &self.processor
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Queue handler for this orchestrator's batches
    pub fn batch_worker(&self) -> BatchWorker {
        BatchWorker::new(
            self.processor.clone(),
            self.states.clone(),
            self.runs.clone(),
            self.finalizer.clone(),
            self.sources.clone(),
        )
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Claim the key and open a run.
    ///
    /// Fails with [`SyncError::AlreadyInProgress`] when another run holds the key and is not
    /// yet stale.
    #[instrument(skip_all, fields(%store_id, %sync_type))]
    pub async fn begin_run(
        &self,
        store_id: &str,
        sync_type: SyncType,
        credentials: StoreCredentials,
        options: SyncOptions,
    ) -> Result<PreparedRun, SyncError> {
        options.validate()?;

        let mut state = self.states.ensure(store_id, sync_type).await?;

        if state.is_in_progress && self.is_stale(&state, Utc::now()) {
            self.reset_stale(&state, self.config.stale_after_minutes as i64)
                .await?;
            state = self.states.ensure(store_id, sync_type).await?;
        }

        let run_id = Uuid::new_v4();
        if !self.states.try_claim_run(state.id, run_id).await? {
            return Err(self.conflict(store_id, sync_type).await?);
        }

        let mode = if options.force_full_sync || state.last_synced_at.is_none() {
            RunMode::Full
        } else {
            RunMode::Incremental
        };
        self.states.set_run_mode(run_id, mode).await?;

        let claimed = self
            .states
            .find_by_run(run_id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("sync state for run {run_id}")))?;
        self.runs
            .start(run_id, &claimed, mode, options.dispatch)
            .await?;

        let cancel = self.tracker.register(run_id);
        self.checkpoints
            .save(
                run_id,
                None,
                CheckpointStage::Started,
                Some(json!({
                    "store_id": store_id,
                    "sync_type": sync_type.as_str(),
                    "mode": mode,
                    "dispatch": options.dispatch,
                })),
            )
            .await;

        info!(%run_id, ?mode, dispatch = ?options.dispatch, "Sync run started");

        Ok(PreparedRun {
            run_id,
            store_id: store_id.to_string(),
            sync_type,
            mode,
            credentials,
            options,
            watermark: state.last_synced_at.map(|ts| ts.to_utc()),
            started_at: claimed
                .run_started_at
                .map(|ts| ts.to_utc())
                .unwrap_or_else(Utc::now),
            cancel,
        })
    }

    /// Enumerate, dispatch and (when possible) close the run.
    ///
    /// Every failure is routed through [`RunFinalizer::fail`] so the in-progress flag is always
    /// released; the returned summary reports it. Only a failure to record that closure is
    /// returned as an error.
    #[instrument(skip_all, fields(run_id = %run.run_id, store_id = %run.store_id))]
    pub async fn execute(&self, run: PreparedRun) -> Result<RunSummary, SyncError> {
        let outcome = self.enumerate_and_dispatch(&run).await;
        self.tracker.remove(run.run_id);

        match outcome {
            Ok(stop) => self.summarize(&run, Some(stop), None).await,
            Err(err) => {
                let message = err.to_string();
                warn!(run_id = %run.run_id, error = %message, "Sync run failed");
                self.finalizer
                    .fail(run.run_id, RunStatus::Failed, &message)
                    .await?;
                self.summarize(&run, None, Some(message)).await
            }
        }
    }

    /// [`begin_run`](Self::begin_run) followed by [`execute`](Self::execute)
    pub async fn run_sync(
        &self,
        store_id: &str,
        sync_type: SyncType,
        credentials: StoreCredentials,
        options: SyncOptions,
    ) -> Result<RunSummary, SyncError> {
        let run = self
            .begin_run(store_id, sync_type, credentials, options)
            .await?;
        self.execute(run).await
    }

    async fn enumerate_and_dispatch(&self, run: &PreparedRun) -> Result<StopReason, SyncError> {
        let client = self.sources.connect(&run.credentials)?;
        let filters = run.filters();
        debug!(updated_at_min = ?filters.updated_at_min, "Computed source filters");

        let snapshot = if run.mode == RunMode::Full {
            let ids = self.items.active_item_ids(&run.store_id).await?;
            self.states
                .set_pre_sync_snapshot(run.run_id, ids.clone())
                .await?;
            Some(ids)
        } else {
            None
        };

        let estimate = match client.count_items(&filters).await {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!(error = %err, "Could not fetch item count; runaway guard disabled");
                None
            }
        };
        let guard = RunawayGuard::new(estimate, self.config.runaway_multiplier);

        self.checkpoints
            .save(
                run.run_id,
                None,
                CheckpointStage::Enumerating,
                Some(json!({
                    "updated_at_min": filters.updated_at_min,
                    "estimate": estimate,
                    "snapshot_size": snapshot.as_ref().map(Vec::len),
                })),
            )
            .await;

        let mut state = Enumeration {
            seen: HashSet::new(),
            pending: Vec::new(),
            discovered: 0,
            duplicates: 0,
            batch_ids: Vec::new(),
        };
        let mut pages = client.stream_item_ids(&filters);
        let mut runaway = None;

        let stop = loop {
            if self.should_stop(run).await? {
                break StopReason::Cancelled;
            }

            let page = tokio::select! {
                _ = run.cancel.cancelled() => break StopReason::Cancelled,
                page = pages.next_page() => page,
            };
            let page = match page {
                None => break StopReason::Exhausted,
                Some(page) => page?,
            };

            let mut capped = false;
            for item_id in page {
                state.discovered += 1;
                if state.seen.contains(&item_id) {
                    state.duplicates += 1;
                    continue;
                }
                if let Some(max) = run.options.max_items
                    && state.seen.len() as u64 >= max
                {
                    capped = true;
                    break;
                }
                state.seen.insert(item_id.clone());
                state.pending.push(item_id);
            }

            self.states
                .set_discovered(
                    run.run_id,
                    state.seen.len() as i64,
                    state.duplicates as i64,
                )
                .await?;

            if let Some(reason) = guard.check(state.discovered, state.duplicates) {
                runaway = Some(reason);
                break StopReason::Runaway;
            }

            while state.pending.len() >= run.options.batch_size {
                if self.should_stop(run).await? {
                    break;
                }
                let batch: Vec<String> = state.pending.drain(..run.options.batch_size).collect();
                self.dispatch(run, client.as_ref(), &mut state, batch).await?;
            }

            // Reaching the cap exactly is not enough; the source may be exhausted on the next pull
            if capped {
                break StopReason::MaxItems;
            }
        };
        pages.stop();

        info!(
            ?stop,
            discovered = state.discovered,
            unique = state.seen.len(),
            duplicates = state.duplicates,
            pages = pages.pages_pulled(),
            "Enumeration finished"
        );

        if stop == StopReason::Cancelled {
            self.finalizer
                .fail(run.run_id, RunStatus::Cancelled, "Sync cancelled")
                .await?;
            return Ok(stop);
        }

        // Queued leftovers of a runaway run would only be cancelled again by the failure close
        if stop == StopReason::Runaway && run.options.dispatch == DispatchMode::Queued {
            debug!(
                dropped = state.pending.len(),
                "Runaway run; not enqueueing leftover ids"
            );
            state.pending.clear();
        }

        while !state.pending.is_empty() {
            let take = state.pending.len().min(run.options.batch_size);
            let batch: Vec<String> = state.pending.drain(..take).collect();
            self.dispatch(run, client.as_ref(), &mut state, batch).await?;
        }

        match stop {
            StopReason::Runaway => {
                let message = runaway.unwrap_or_else(|| "Runaway enumeration".to_string());
                self.finalizer
                    .fail(run.run_id, RunStatus::Failed, &message)
                    .await?;
            }
            StopReason::Exhausted => {
                if let Some(snapshot) = snapshot {
                    self.reconcile(run, snapshot, &state.seen).await?;
                }
                self.states
                    .mark_enumeration_done(run.run_id, true)
                    .await?;
                self.finalizer.try_complete(run.run_id).await?;
            }
            StopReason::MaxItems => {
                self.states
                    .mark_enumeration_done(run.run_id, false)
                    .await?;
                self.finalizer.try_complete(run.run_id).await?;
            }
            StopReason::Cancelled => {}
        }

        Ok(stop)
    }

    async fn should_stop(&self, run: &PreparedRun) -> Result<bool, DbErr> {
        if run.cancel.is_cancelled() {
            return Ok(true);
        }
        self.states.should_stop(run.run_id).await
    }

    async fn dispatch(
        &self,
        run: &PreparedRun,
        client: &dyn SourceClient,
        state: &mut Enumeration,
        item_ids: Vec<String>,
    ) -> Result<(), SyncError> {
        let batch_id = Uuid::new_v4();
        state.batch_ids.push(batch_id);
        self.states
            .add_dispatched_batch(run.run_id, &state.batch_ids)
            .await?;
        let last_id = item_ids.last().cloned();
        let size = item_ids.len();

        match run.options.dispatch {
            DispatchMode::Inline => {
                let report = self
                    .processor
                    .process(
                        client,
                        run.run_id,
                        &run.store_id,
                        batch_id,
                        &item_ids,
                        run.options.detail_batch_size,
                        run.options.detail_concurrency,
                    )
                    .await?;
                self.states.record_batch_outcome(run.run_id, true).await?;
                counter!("catalog_sync_batches_total", "outcome" => "succeeded").increment(1);
                debug!(%batch_id, ?report, "Inline batch processed");
            }
            DispatchMode::Queued => {
                let payload = BatchTaskPayload {
                    run_id: run.run_id,
                    store_id: run.store_id.clone(),
                    sync_type: run.sync_type,
                    credentials: run.credentials.clone(),
                    item_ids,
                    batch_id,
                    detail_batch_size: run.options.detail_batch_size,
                    detail_concurrency: run.options.detail_concurrency,
                };
                self.queue
                    .enqueue_with_id(batch_id, &payload, Some(run.run_id))
                    .await?;
                debug!(%batch_id, size, "Batch enqueued");
            }
        }

        self.checkpoints
            .save(
                run.run_id,
                last_id.as_deref(),
                CheckpointStage::BatchDispatched,
                Some(json!({ "batch_id": batch_id, "size": size })),
            )
            .await;
        Ok(())
    }

    /// Soft-delete snapshot ids that enumeration did not produce, then purge old tombstones
    async fn reconcile(
        &self,
        run: &PreparedRun,
        snapshot: Vec<String>,
        enumerated: &HashSet<String>,
    ) -> Result<(), SyncError> {
        let missing: Vec<String> = snapshot
            .into_iter()
            .filter(|id| !enumerated.contains(id))
            .collect();

        self.checkpoints
            .save(
                run.run_id,
                None,
                CheckpointStage::Reconciling,
                Some(json!({ "missing": missing.len() })),
            )
            .await;

        if !missing.is_empty() {
            let deleted = self
                .items
                .soft_delete(&run.store_id, &missing, Some(run.run_id))
                .await?;
            self.states
                .record_deleted(run.run_id, deleted as i64)
                .await?;
            counter!("catalog_sync_items_total", "outcome" => "deleted").increment(deleted);
            info!(deleted, "Soft-deleted items missing from full enumeration");
        }

        if let Some(days) = run.options.purge_deleted_after_days {
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            let purged = self
                .items
                .purge_deleted_before(&run.store_id, cutoff.fixed_offset())
                .await?;
            if purged > 0 {
                info!(purged, days, "Purged long-deleted items");
            }
        }

        Ok(())
    }

    async fn summarize(
        &self,
        run: &PreparedRun,
        stop_reason: Option<StopReason>,
        error: Option<String>,
    ) -> Result<RunSummary, SyncError> {
        let history = self.runs.find(run.run_id).await?;
        let state = self.states.find_by_run(run.run_id).await?;

        let status = history.as_ref().map(|h| h.status).unwrap_or(RunStatus::Failed);
        let error = error.or_else(|| history.as_ref().and_then(|h| h.error.clone()));

        let summary = match state {
            Some(state) => RunSummary {
                run_id: run.run_id,
                store_id: run.store_id.clone(),
                sync_type: run.sync_type,
                mode: run.mode,
                dispatch: run.options.dispatch,
                status,
                stop_reason,
                discovered: state.run_total_to_process,
                duplicates: state.run_duplicates,
                processed: state.run_processed,
                created: state.run_created,
                updated: state.run_updated,
                deleted: state.run_deleted,
                failed: state.run_failed,
                batch_progress: state.batch_progress(),
                error,
            },
            None => RunSummary {
                run_id: run.run_id,
                store_id: run.store_id.clone(),
                sync_type: run.sync_type,
                mode: run.mode,
                dispatch: run.options.dispatch,
                status,
                stop_reason,
                discovered: 0,
                duplicates: 0,
                processed: 0,
                created: 0,
                updated: 0,
                deleted: 0,
                failed: 0,
                batch_progress: BatchProgress::default(),
                error,
            },
        };
        Ok(summary)
    }

    /// Request cancellation of a run.
    ///
    /// If the run's enumeration executes in this process it stops at the next page or batch
    /// boundary and closes the run itself. Otherwise the run is closed here directly.
    /// Returns false when the run is not in progress.
    pub async fn cancel(&self, run_id: Uuid) -> Result<bool, SyncError> {
        if !self.states.request_cancel(run_id).await? {
            return Ok(false);
        }

        if self.tracker.cancel(run_id) {
            info!(%run_id, "Cancellation signalled to running enumeration");
            return Ok(true);
        }

        self.finalizer
            .fail(run_id, RunStatus::Cancelled, "Sync cancelled")
            .await?;
        Ok(true)
    }

    fn is_stale(&self, state: &SyncStateModel, now: DateTime<Utc>) -> bool {
        let threshold = Duration::minutes(self.config.stale_after_minutes as i64);
        match state.run_started_at {
            Some(started) => started.to_utc() < now - threshold,
            None => true,
        }
    }

    async fn reset_stale(
        &self,
        state: &SyncStateModel,
        threshold_minutes: i64,
    ) -> Result<bool, SyncError> {
        let Some(run_id) = state.run_id else {
            return Ok(false);
        };

        let message = stale_message(run_id, threshold_minutes);
        let reset = self
            .finalizer
            .fail(run_id, RunStatus::TimedOut, &message)
            .await?;
        if reset {
            self.tracker.cancel(run_id);
            self.tracker.remove(run_id);
            counter!("catalog_sync_stale_runs_reset_total").increment(1);
            warn!(%run_id, store_id = %state.store_id, "Reset stale sync run");
        }
        Ok(reset)
    }

    /// Force-finalize every run that has been in progress longer than the staleness threshold
    pub async fn reset_stale_runs(&self) -> Result<u64, SyncError> {
        let minutes = self.config.stale_after_minutes as i64;
        let cutoff = Utc::now() - Duration::minutes(minutes);
        let stale = self.states.find_stale(cutoff.fixed_offset()).await?;

        let mut reset = 0;
        for state in stale {
            if self.reset_stale(&state, minutes).await? {
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Operator "fix stuck sync": reset the key's run regardless of age.
    ///
    /// Returns the state view afterwards, or `None` if the key has never synced.
    pub async fn force_reset(
        &self,
        store_id: &str,
        sync_type: SyncType,
    ) -> Result<Option<SyncStateView>, SyncError> {
        let Some(state) = self.states.find(store_id, sync_type).await? else {
            return Ok(None);
        };
        if state.is_in_progress {
            self.reset_stale(&state, 0).await?;
        }
        Ok(self.status(store_id, sync_type).await?)
    }

    pub async fn status(
        &self,
        store_id: &str,
        sync_type: SyncType,
    ) -> Result<Option<SyncStateView>, DbErr> {
        let Some(state) = self.states.find(store_id, sync_type).await? else {
            return Ok(None);
        };
        let errors = match state.run_id {
            Some(run_id) => self.runs.errors(run_id, STATUS_ERROR_LIMIT).await?,
            None => Vec::new(),
        };
        Ok(Some(state.view(errors)))
    }

    async fn conflict(&self, store_id: &str, sync_type: SyncType) -> Result<SyncError, DbErr> {
        let state = self.states.ensure(store_id, sync_type).await?;
        let errors = match state.run_id {
            Some(run_id) => self.runs.errors(run_id, STATUS_ERROR_LIMIT).await?,
            None => Vec::new(),
        };
        Ok(SyncError::AlreadyInProgress {
            store_id: store_id.to_string(),
            sync_type,
            state: Box::new(state.view(errors)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn runaway_guard_trips_on_volume_or_duplicates() {
        let guard = RunawayGuard::new(Some(100), 2.0);
        assert_eq!(guard.check(200, 0), None);
        assert!(guard.check(201, 0).is_some());
        assert!(guard.check(150, 101).is_some());
        assert_eq!(guard.check(150, 100), None);
    }

    #[test]
    fn runaway_guard_is_inert_without_estimate() {
        let guard = RunawayGuard::new(None, 2.0);
        assert_eq!(guard.check(1_000_000, 1_000_000), None);

        let empty = RunawayGuard::new(Some(0), 2.0);
        assert_eq!(empty.check(2, 0), None);
        assert!(empty.check(3, 0).is_some());
    }

    #[test]
    fn stale_message_names_run_and_threshold() {
        let run_id = Uuid::nil();
        assert_eq!(
            stale_message(run_id, 60),
            "Sync timed out: run 00000000-0000-0000-0000-000000000000 exceeded the 60 minute staleness threshold"
        );
    }

    fn prepared(mode: RunMode, timezone: chrono_tz::Tz) -> PreparedRun {
        let options = SyncOptions {
            timezone,
            ..SyncOptions::from_config(&SyncConfig::default()).unwrap()
        };
        PreparedRun {
            run_id: Uuid::new_v4(),
            store_id: "store-1".into(),
            sync_type: SyncType::Products,
            mode,
            credentials: StoreCredentials {
                shop_domain: "acme.myshopify.com".into(),
                access_token: "token".into(),
            },
            options,
            watermark: Some(Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn incremental_filter_uses_store_timezone() {
        let run = prepared(RunMode::Incremental, chrono_tz::America::New_York);
        assert_eq!(
            run.filters().updated_at_min.as_deref(),
            Some("2024-07-01T08:00:00-04:00")
        );

        let full = prepared(RunMode::Full, chrono_tz::UTC);
        assert_eq!(full.filters().updated_at_min, None);
    }
}
