//! # Checkpoint Manager
//!
//! Append-only progress markers for sync runs. Saving is best effort: a failed write is
//! logged and swallowed so checkpointing can never fail the sync that produced it.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::models::checkpoint::{ActiveModel, CheckpointStage, Column, Entity, Model};

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    db: DatabaseConnection,
}

impl CheckpointManager {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Append a checkpoint; errors are logged, never returned
    pub async fn save(
        &self,
        job_id: Uuid,
        last_processed_id: Option<&str>,
        stage: CheckpointStage,
        metadata: Option<JsonValue>,
    ) {
        let checkpoint = ActiveModel {
            job_id: Set(job_id),
            last_processed_id: Set(last_processed_id.map(str::to_string)),
            stage: Set(stage),
            metadata: Set(metadata),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };

        if let Err(err) = checkpoint.insert(&self.db).await {
            warn!(%job_id, ?stage, error = %err, "Failed to save checkpoint");
        }
    }

    /// Most recent checkpoint for the job
    pub async fn get_latest(&self, job_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .one(&self.db)
            .await
    }

    /// All checkpoints for the job, oldest first
    pub async fn list(&self, job_id: Uuid) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
    }

    /// Remove a job's checkpoints; only called once the run is known to have succeeded
    pub async fn clear(&self, job_id: Uuid) -> Result<u64, DbErr> {
        let result = Entity::delete_many()
            .filter(Column::JobId.eq(job_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
