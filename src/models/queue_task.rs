//! QueueTask entity model
//!
//! Durable ledger rows behind the job queue. A task is claimed by stamping a lease id,
//! retried with backoff until `max_attempts`, and retained after it finishes.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Logical queue name
    pub queue: String,

    /// Groups tasks belonging to the same sync run
    pub correlation_id: Option<Uuid>,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    pub status: TaskStatus,

    /// Higher values are claimed first
    pub priority: i16,

    pub attempts: i32,
    pub max_attempts: i32,

    pub scheduled_at: DateTimeWithTimeZone,

    /// Earliest time a failed task becomes claimable again
    pub retry_after: Option<DateTimeWithTimeZone>,

    pub started_at: Option<DateTimeWithTimeZone>,
    pub finished_at: Option<DateTimeWithTimeZone>,

    pub lease_id: Option<Uuid>,

    #[sea_orm(column_type = "JsonBinary")]
    pub output: Option<JsonValue>,

    #[sea_orm(column_type = "JsonBinary")]
    pub error: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
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
pub enum TaskStatus {
    #[sea_orm(string_value = "queued")]
    #[serde(rename = "queued")]
    #[default]
    Queued,

    #[sea_orm(string_value = "running")]
    #[serde(rename = "running")]
    Running,

    #[sea_orm(string_value = "succeeded")]
    #[serde(rename = "succeeded")]
    Succeeded,

    #[sea_orm(string_value = "failed")]
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
