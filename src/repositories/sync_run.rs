//! # Sync Run Repository
//!
//! Execution history and the per-run error ledger.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::models::sync_run::{self, DispatchMode, RunStatus};
use crate::models::sync_run_error;
use crate::models::sync_state::{self, RunErrorEntry, RunMode};

#[derive(Debug, Clone)]
pub struct SyncRunRepository {
    db: DatabaseConnection,
}

impl SyncRunRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Write the history row for a freshly claimed run
    pub async fn start(
        &self,
        run_id: Uuid,
        state: &sync_state::Model,
        mode: RunMode,
        dispatch: DispatchMode,
    ) -> Result<sync_run::Model, DbErr> {
        let now = Utc::now().fixed_offset();
        sync_run::ActiveModel {
            id: Set(run_id),
            state_id: Set(state.id),
            store_id: Set(state.store_id.clone()),
            sync_type: Set(state.sync_type),
            mode: Set(mode),
            dispatch: Set(dispatch),
            status: Set(RunStatus::Running),
            started_at: Set(state.run_started_at.unwrap_or(now)),
            finished_at: Set(None),
            processed: Set(0),
            created: Set(0),
            updated: Set(0),
            deleted: Set(0),
            failed: Set(0),
            batch_total: Set(0),
            batch_failed: Set(0),
            error: Set(None),
            created_at: Set(now),
        }
        .insert(&self.db)
        .await
    }

    /// Copy the final counters from the closed state row onto the history row.
    ///
    /// Guarded on `status = running` so a history row is only finalized once.
    pub async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        state: &sync_state::Model,
        error: Option<String>,
    ) -> Result<bool, DbErr> {
        let changes = sync_run::ActiveModel {
            status: Set(status),
            finished_at: Set(Some(
                state
                    .run_completed_at
                    .unwrap_or_else(|| Utc::now().fixed_offset()),
            )),
            processed: Set(state.run_processed),
            created: Set(state.run_created),
            updated: Set(state.run_updated),
            deleted: Set(state.run_deleted),
            failed: Set(state.run_failed),
            batch_total: Set(state.batch_total),
            batch_failed: Set(state.batch_failed),
            error: Set(error),
            ..Default::default()
        };

        let result = sync_run::Entity::update_many()
            .set(changes)
            .filter(sync_run::Column::Id.eq(run_id))
            .filter(sync_run::Column::Status.eq(RunStatus::Running))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Append an error to the run's ledger.
    ///
    /// Item errors are unique per `(run_id, item_id)`; returns false when this item already has
    /// one, so a redelivered batch neither duplicates the entry nor recounts the failure.
    /// Batch-level errors (no item id) are always appended.
    pub async fn record_error(
        &self,
        run_id: Uuid,
        item_id: Option<&str>,
        batch_id: Option<Uuid>,
        error: &str,
    ) -> Result<bool, DbErr> {
        let entry = sync_run_error::ActiveModel {
            id: Set(Uuid::new_v4()),
            run_id: Set(run_id),
            item_id: Set(item_id.map(str::to_string)),
            batch_id: Set(batch_id),
            error: Set(error.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        };

        let inserted = sync_run_error::Entity::insert(entry)
            .on_conflict(
                OnConflict::columns([
                    sync_run_error::Column::RunId,
                    sync_run_error::Column::ItemId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(inserted > 0)
    }

    pub async fn errors(&self, run_id: Uuid, limit: u64) -> Result<Vec<RunErrorEntry>, DbErr> {
        let rows = sync_run_error::Entity::find()
            .filter(sync_run_error::Column::RunId.eq(run_id))
            .order_by_asc(sync_run_error::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(RunErrorEntry::from).collect())
    }

    pub async fn find(&self, run_id: Uuid) -> Result<Option<sync_run::Model>, DbErr> {
        sync_run::Entity::find_by_id(run_id).one(&self.db).await
    }

    pub async fn list(
        &self,
        store_id: Option<&str>,
        status: Option<RunStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<sync_run::Model>, u64), DbErr> {
        let mut query = sync_run::Entity::find();
        if let Some(store_id) = store_id {
            query = query.filter(sync_run::Column::StoreId.eq(store_id));
        }
        if let Some(status) = status {
            query = query.filter(sync_run::Column::Status.eq(status));
        }

        let total = query.clone().count(&self.db).await?;
        let runs = query
            .order_by_desc(sync_run::Column::StartedAt)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok((runs, total))
    }
}
