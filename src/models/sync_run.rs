//! SyncRun entity model
//!
//! Execution history: one row per sync run, written when the run starts and updated once
//! by whichever path finalizes it.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::sync_state::{RunMode, SyncType};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_runs")]
pub struct Model {
    /// Run id, shared with `sync_states.run_id` and checkpoint job ids
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub state_id: Uuid,
    pub store_id: String,
    pub sync_type: SyncType,
    pub mode: RunMode,
    pub dispatch: DispatchMode,
    pub status: RunStatus,
    pub started_at: DateTimeWithTimeZone,
    pub finished_at: Option<DateTimeWithTimeZone>,
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub deleted: i64,
    pub failed: i64,
    pub batch_total: i32,
    pub batch_failed: i32,
    pub error: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum RunStatus {
    #[sea_orm(string_value = "running")]
    #[serde(rename = "running")]
    #[default]
    Running,

    #[sea_orm(string_value = "succeeded")]
    #[serde(rename = "succeeded")]
    Succeeded,

    /// Finished, but at least one batch failed
    #[sea_orm(string_value = "partial")]
    #[serde(rename = "partial")]
    Partial,

    #[sea_orm(string_value = "failed")]
    #[serde(rename = "failed")]
    Failed,

    #[sea_orm(string_value = "cancelled")]
    #[serde(rename = "cancelled")]
    Cancelled,

    #[sea_orm(string_value = "timed_out")]
    #[serde(rename = "timed_out")]
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::TimedOut => "timed_out",
        }
    }
}

/// Where batches of a run are executed
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum DispatchMode {
    /// Batches are processed by the orchestrator task itself
    #[sea_orm(string_value = "inline")]
    #[serde(rename = "inline")]
    #[default]
    Inline,

    /// Batches are enqueued and processed by queue workers
    #[sea_orm(string_value = "queued")]
    #[serde(rename = "queued")]
    Queued,
}

impl std::str::FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(DispatchMode::Inline),
            "queued" => Ok(DispatchMode::Queued),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_run_error::Entity")]
    Errors,
}

impl Related<super::sync_run_error::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Errors.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Public representation of a sync execution
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExecutionInfo {
    pub run_id: Uuid,
    pub store_id: String,
    pub sync_type: SyncType,
    pub mode: RunMode,
    pub dispatch: DispatchMode,
    pub status: RunStatus,
    #[schema(value_type = String, example = "2025-01-01T12:00:00Z")]
    pub started_at: DateTimeWithTimeZone,
    #[schema(value_type = Option<String>, example = "2025-01-01T12:05:00Z")]
    pub finished_at: Option<DateTimeWithTimeZone>,
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub deleted: i64,
    pub failed: i64,
    pub batch_total: i32,
    pub batch_failed: i32,
    pub error: Option<String>,
}

impl From<Model> for ExecutionInfo {
    fn from(model: Model) -> Self {
        Self {
            run_id: model.id,
            store_id: model.store_id,
            sync_type: model.sync_type,
            mode: model.mode,
            dispatch: model.dispatch,
            status: model.status,
            started_at: model.started_at,
            finished_at: model.finished_at,
            processed: model.processed,
            created: model.created,
            updated: model.updated,
            deleted: model.deleted,
            failed: model.failed,
            batch_total: model.batch_total,
            batch_failed: model.batch_failed,
            error: model.error,
        }
    }
}
