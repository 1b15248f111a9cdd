//! Checkpoint entity model
//!
//! Append-only progress markers used to inspect and recover interrupted runs.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkpoints")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Run id the checkpoint belongs to
    pub job_id: Uuid,

    pub last_processed_id: Option<String>,

    pub stage: CheckpointStage,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum CheckpointStage {
    #[sea_orm(string_value = "started")]
    #[serde(rename = "started")]
    Started,

    #[sea_orm(string_value = "enumerating")]
    #[serde(rename = "enumerating")]
    Enumerating,

    #[sea_orm(string_value = "batch_dispatched")]
    #[serde(rename = "batch_dispatched")]
    BatchDispatched,

    #[sea_orm(string_value = "reconciling")]
    #[serde(rename = "reconciling")]
    Reconciling,

    #[sea_orm(string_value = "finalizing")]
    #[serde(rename = "finalizing")]
    Finalizing,

    #[sea_orm(string_value = "failed")]
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
