//! # Sync State Repository
//!
//! Every mutation here is a single UPDATE whose SET clause uses column arithmetic and whose
//! WHERE clause carries the precondition, so concurrent writers (the orchestrator and any
//! number of batch workers) never read-modify-write the shared record. Methods that have a
//! winner report it through `rows_affected`.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict, SimpleExpr};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    Value,
};
use tracing::debug;
use uuid::Uuid;

use crate::models::sync_state::{
    ActiveModel, BatchIds, Column, Entity, IdList, Model, RunMode, SyncType,
};

/// Item-level counter increments for the current run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub failed: i64,
}

impl ProgressDelta {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.created == 0 && self.updated == 0 && self.failed == 0
    }
}

impl std::ops::AddAssign for ProgressDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.failed += rhs.failed;
    }
}

/// How a run is being closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunClose {
    /// All batches are accounted for and enumeration finished
    Completed,
    /// Failure, cancellation, timeout; pending batches are counted as failed
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    db: DatabaseConnection,
}

impl SyncStateRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Load the state for a key, creating it on first use
    pub async fn ensure(&self, store_id: &str, sync_type: SyncType) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let fresh = ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id.to_string()),
            sync_type: Set(sync_type),
            total_syncs: Set(0),
            total_processed: Set(0),
            total_created: Set(0),
            total_updated: Set(0),
            total_deleted: Set(0),
            last_synced_at: Set(None),
            is_in_progress: Set(false),
            cancel_requested: Set(false),
            last_sync_error: Set(None),
            run_id: Set(None),
            run_mode: Set(None),
            run_started_at: Set(None),
            run_completed_at: Set(None),
            run_total_to_process: Set(0),
            run_processed: Set(0),
            run_created: Set(0),
            run_updated: Set(0),
            run_deleted: Set(0),
            run_failed: Set(0),
            run_duplicates: Set(0),
            run_enumeration_done: Set(false),
            run_watermark_eligible: Set(false),
            batch_total: Set(0),
            batch_completed: Set(0),
            batch_failed: Set(0),
            batch_pending: Set(0),
            batch_ids: Set(None),
            pre_sync_existing_ids: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Entity::insert(fresh)
            .on_conflict(
                OnConflict::columns([Column::StoreId, Column::SyncType])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        self.find(store_id, sync_type)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("sync state {store_id}/{sync_type}")))
    }

    pub async fn find(&self, store_id: &str, sync_type: SyncType) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::StoreId.eq(store_id))
            .filter(Column::SyncType.eq(sync_type))
            .one(&self.db)
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(&self.db).await
    }

    /// State whose current (or most recent) run is `run_id`
    pub async fn find_by_run(&self, run_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::RunId.eq(run_id))
            .one(&self.db)
            .await
    }

    pub async fn list(&self, store_id: Option<&str>) -> Result<Vec<Model>, DbErr> {
        let mut query = Entity::find().order_by_asc(Column::StoreId);
        if let Some(store_id) = store_id {
            query = query.filter(Column::StoreId.eq(store_id));
        }
        query.all(&self.db).await
    }

    /// Compare-and-set the in-progress flag and reset the current run snapshot.
    ///
    /// Returns true only for the caller that flipped the flag.
    pub async fn try_claim_run(&self, state_id: Uuid, run_id: Uuid) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let reset = ActiveModel {
            is_in_progress: Set(true),
            cancel_requested: Set(false),
            run_id: Set(Some(run_id)),
            run_mode: Set(None),
            run_started_at: Set(Some(now)),
            run_completed_at: Set(None),
            run_total_to_process: Set(0),
            run_processed: Set(0),
            run_created: Set(0),
            run_updated: Set(0),
            run_deleted: Set(0),
            run_failed: Set(0),
            run_duplicates: Set(0),
            run_enumeration_done: Set(false),
            run_watermark_eligible: Set(false),
            batch_total: Set(0),
            batch_completed: Set(0),
            batch_failed: Set(0),
            batch_pending: Set(0),
            batch_ids: Set(Some(BatchIds::default())),
            pre_sync_existing_ids: Set(None),
            updated_at: Set(now),
            ..Default::default()
        };

        let result = Entity::update_many()
            .set(reset)
            .filter(Column::Id.eq(state_id))
            .filter(Column::IsInProgress.eq(false))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn update_run(&self, run_id: Uuid, changes: ActiveModel) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .set(changes)
            .filter(Column::RunId.eq(run_id))
            .filter(Column::IsInProgress.eq(true))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn set_run_mode(&self, run_id: Uuid, mode: RunMode) -> Result<bool, DbErr> {
        self.update_run(
            run_id,
            ActiveModel {
                run_mode: Set(Some(mode)),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_pre_sync_snapshot(&self, run_id: Uuid, ids: Vec<String>) -> Result<bool, DbErr> {
        self.update_run(
            run_id,
            ActiveModel {
                pre_sync_existing_ids: Set(Some(IdList(ids))),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            },
        )
        .await
    }

    /// Record enumeration totals; the orchestrator is the only writer of these columns
    pub async fn set_discovered(
        &self,
        run_id: Uuid,
        discovered: i64,
        duplicates: i64,
    ) -> Result<bool, DbErr> {
        self.update_run(
            run_id,
            ActiveModel {
                run_total_to_process: Set(discovered),
                run_duplicates: Set(duplicates),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            },
        )
        .await
    }

    /// Count a newly dispatched batch as pending
    pub async fn add_dispatched_batch(
        &self,
        run_id: Uuid,
        batch_ids: &[Uuid],
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::BatchTotal, Expr::col(Column::BatchTotal).add(1))
            .col_expr(Column::BatchPending, Expr::col(Column::BatchPending).add(1))
            .col_expr(
                Column::BatchIds,
                Expr::value(BatchIds(batch_ids.to_vec())),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::RunId.eq(run_id))
            .filter(Column::IsInProgress.eq(true))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn record_item_progress(
        &self,
        run_id: Uuid,
        delta: ProgressDelta,
    ) -> Result<bool, DbErr> {
        if delta.is_empty() {
            return Ok(true);
        }

        let result = Entity::update_many()
            .col_expr(
                Column::RunProcessed,
                Expr::col(Column::RunProcessed).add(delta.processed),
            )
            .col_expr(
                Column::RunCreated,
                Expr::col(Column::RunCreated).add(delta.created),
            )
            .col_expr(
                Column::RunUpdated,
                Expr::col(Column::RunUpdated).add(delta.updated),
            )
            .col_expr(
                Column::RunFailed,
                Expr::col(Column::RunFailed).add(delta.failed),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::RunId.eq(run_id))
            .filter(Column::IsInProgress.eq(true))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Move one pending batch to completed or failed.
    ///
    /// The `batch_pending > 0` guard keeps `completed + failed <= total` even if a batch
    /// outcome is reported twice.
    pub async fn record_batch_outcome(&self, run_id: Uuid, succeeded: bool) -> Result<bool, DbErr> {
        let target = if succeeded {
            Column::BatchCompleted
        } else {
            Column::BatchFailed
        };

        let result = Entity::update_many()
            .col_expr(target, Expr::col(target).add(1))
            .col_expr(Column::BatchPending, Expr::col(Column::BatchPending).sub(1))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::RunId.eq(run_id))
            .filter(Column::IsInProgress.eq(true))
            .filter(Column::BatchPending.gt(0))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn record_deleted(&self, run_id: Uuid, deleted: i64) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(
                Column::RunDeleted,
                Expr::col(Column::RunDeleted).add(deleted),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::RunId.eq(run_id))
            .filter(Column::IsInProgress.eq(true))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Mark the id producer as finished; `watermark_eligible` is false when enumeration was cut short
    pub async fn mark_enumeration_done(
        &self,
        run_id: Uuid,
        watermark_eligible: bool,
    ) -> Result<bool, DbErr> {
        self.update_run(
            run_id,
            ActiveModel {
                run_enumeration_done: Set(true),
                run_watermark_eligible: Set(watermark_eligible),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn request_cancel(&self, run_id: Uuid) -> Result<bool, DbErr> {
        self.update_run(
            run_id,
            ActiveModel {
                cancel_requested: Set(true),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            },
        )
        .await
    }

    /// True once cancellation was requested, or the run was closed or superseded elsewhere
    pub async fn should_stop(&self, run_id: Uuid) -> Result<bool, DbErr> {
        let flags = Entity::find()
            .select_only()
            .column(Column::CancelRequested)
            .column(Column::IsInProgress)
            .filter(Column::RunId.eq(run_id))
            .into_tuple::<(bool, bool)>()
            .one(&self.db)
            .await?;
        Ok(match flags {
            Some((cancel_requested, in_progress)) => cancel_requested || !in_progress,
            None => true,
        })
    }

    pub async fn set_last_sync_error(&self, run_id: Uuid, message: &str) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::LastSyncError, Expr::value(message))
            .filter(Column::RunId.eq(run_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Runs still in progress that started before `cutoff`
    pub async fn find_stale(&self, cutoff: DateTimeWithTimeZone) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::IsInProgress.eq(true))
            .filter(
                Column::RunStartedAt
                    .lt(cutoff)
                    .or(Column::RunStartedAt.is_null()),
            )
            .all(&self.db)
            .await
    }

    /// Close the run and fold its counters into the cumulative totals.
    ///
    /// Only one caller can win: the update is conditional on the run still being in progress,
    /// and for [`RunClose::Completed`] also on every batch being accounted for. The watermark
    /// only moves when no batch failed and enumeration ran to exhaustion.
    pub async fn close_run(&self, run_id: Uuid, close: RunClose) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();

        let mut update = Entity::update_many()
            .col_expr(Column::IsInProgress, Expr::value(false))
            .col_expr(Column::CancelRequested, Expr::value(false))
            .col_expr(Column::RunCompletedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .col_expr(Column::TotalSyncs, Expr::col(Column::TotalSyncs).add(1))
            .col_expr(
                Column::TotalProcessed,
                Expr::col(Column::TotalProcessed).add(Expr::col(Column::RunProcessed)),
            )
            .col_expr(
                Column::TotalCreated,
                Expr::col(Column::TotalCreated).add(Expr::col(Column::RunCreated)),
            )
            .col_expr(
                Column::TotalUpdated,
                Expr::col(Column::TotalUpdated).add(Expr::col(Column::RunUpdated)),
            )
            .col_expr(
                Column::TotalDeleted,
                Expr::col(Column::TotalDeleted).add(Expr::col(Column::RunDeleted)),
            )
            .filter(Column::RunId.eq(run_id))
            .filter(Column::IsInProgress.eq(true));

        match close {
            RunClose::Completed => {
                let clean = Expr::col(Column::BatchFailed)
                    .eq(0)
                    .and(Expr::col(Column::RunWatermarkEligible).eq(true));

                update = update
                    .col_expr(
                        Column::LastSyncedAt,
                        SimpleExpr::Case(Box::new(
                            Expr::case(clean, Expr::value(now))
                                .finally(Expr::col(Column::LastSyncedAt)),
                        )),
                    )
                    .col_expr(
                        Column::LastSyncError,
                        SimpleExpr::Case(Box::new(
                            Expr::case(
                                Expr::col(Column::BatchFailed).eq(0),
                                Expr::value(Value::String(None)),
                            )
                            .finally(Expr::col(Column::LastSyncError)),
                        )),
                    )
                    .filter(Column::RunEnumerationDone.eq(true))
                    .filter(
                        Expr::expr(
                            Expr::col(Column::BatchCompleted).add(Expr::col(Column::BatchFailed)),
                        )
                        .gte(Expr::col(Column::BatchTotal)),
                    );
            }
            RunClose::Failed { message } => {
                update = update
                    .col_expr(Column::LastSyncError, Expr::value(message))
                    .col_expr(
                        Column::BatchFailed,
                        Expr::col(Column::BatchFailed).add(Expr::col(Column::BatchPending)),
                    )
                    .col_expr(Column::BatchPending, Expr::value(0));
            }
        }

        let result = update.exec(&self.db).await?;
        let won = result.rows_affected > 0;
        debug!(%run_id, won, "close_run");
        Ok(won)
    }
}
