//! # Sync State Model
//!
//! One durable record per `(store_id, sync_type)` holding cumulative counters, the success
//! watermark, the mutual-exclusion flag and a flattened snapshot of the running sync.

use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, FromJsonQueryResult};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub store_id: String,
    pub sync_type: SyncType,

    pub total_syncs: i64,
    pub total_processed: i64,
    pub total_created: i64,
    pub total_updated: i64,
    pub total_deleted: i64,

    /// Watermark for the next incremental filter; only written on success
    pub last_synced_at: Option<DateTimeWithTimeZone>,

    pub is_in_progress: bool,
    pub cancel_requested: bool,
    pub last_sync_error: Option<String>,

    pub run_id: Option<Uuid>,
    pub run_mode: Option<RunMode>,
    pub run_started_at: Option<DateTimeWithTimeZone>,
    pub run_completed_at: Option<DateTimeWithTimeZone>,
    pub run_total_to_process: i64,
    pub run_processed: i64,
    pub run_created: i64,
    pub run_updated: i64,
    pub run_deleted: i64,
    pub run_failed: i64,
    pub run_duplicates: i64,
    pub run_enumeration_done: bool,
    pub run_watermark_eligible: bool,

    pub batch_total: i32,
    pub batch_completed: i32,
    pub batch_failed: i32,
    pub batch_pending: i32,

    #[sea_orm(column_type = "JsonBinary")]
    pub batch_ids: Option<BatchIds>,

    /// Non-deleted item ids captured before a full sync started enumerating
    #[sea_orm(column_type = "JsonBinary")]
    pub pre_sync_existing_ids: Option<IdList>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum SyncType {
    #[sea_orm(string_value = "products")]
    #[serde(rename = "products")]
    #[default]
    Products,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Products => "products",
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum RunMode {
    #[sea_orm(string_value = "full")]
    #[serde(rename = "full")]
    Full,

    #[sea_orm(string_value = "incremental")]
    #[serde(rename = "incremental")]
    Incremental,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct IdList(pub Vec<String>);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct BatchIds(pub Vec<Uuid>);

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Batch bookkeeping for the current run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatchProgress {
    pub total: i32,
    pub completed: i32,
    pub failed: i32,
    pub pending: i32,
    pub batch_ids: Vec<Uuid>,
}

impl BatchProgress {
    pub fn is_terminal(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RunErrorEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentRun {
    pub run_id: Uuid,
    pub mode: Option<RunMode>,
    #[schema(value_type = String, example = "2025-01-01T12:00:00Z")]
    pub started_at: DateTimeWithTimeZone,
    #[schema(value_type = Option<String>, example = "2025-01-01T12:05:00Z")]
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub total_to_process: i64,
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub deleted: i64,
    pub failed: i64,
    pub duplicates: i64,
    /// processed / discovered so far, as a percentage clamped to 100
    pub progress: f64,
    pub errors: Vec<RunErrorEntry>,
    pub batch_progress: BatchProgress,
    /// Only populated for full syncs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_sync_existing_count: Option<usize>,
}

/// Public view of a sync state record
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncStateView {
    pub store_id: String,
    pub sync_type: SyncType,
    pub is_in_progress: bool,
    #[schema(value_type = Option<String>, example = "2025-01-01T12:00:00Z")]
    pub last_synced_at: Option<DateTimeWithTimeZone>,
    pub last_sync_error: Option<String>,
    pub total_syncs: i64,
    pub total_processed: i64,
    pub total_created: i64,
    pub total_updated: i64,
    pub total_deleted: i64,
    pub current_run: Option<CurrentRun>,
}

pub fn progress_percent(processed: i64, discovered: i64) -> f64 {
    if discovered <= 0 {
        return 0.0;
    }
    (processed as f64 / discovered as f64 * 100.0).min(100.0)
}

impl Model {
    pub fn batch_progress(&self) -> BatchProgress {
        BatchProgress {
            total: self.batch_total,
            completed: self.batch_completed,
            failed: self.batch_failed,
            pending: self.batch_pending,
            batch_ids: self
                .batch_ids
                .as_ref()
                .map(|ids| ids.0.clone())
                .unwrap_or_default(),
        }
    }

    pub fn current_run(&self, errors: Vec<RunErrorEntry>) -> Option<CurrentRun> {
        let (run_id, started_at) = (self.run_id?, self.run_started_at?);
        Some(CurrentRun {
            run_id,
            mode: self.run_mode,
            started_at,
            completed_at: self.run_completed_at,
            total_to_process: self.run_total_to_process,
            processed: self.run_processed,
            created: self.run_created,
            updated: self.run_updated,
            deleted: self.run_deleted,
            failed: self.run_failed,
            duplicates: self.run_duplicates,
            progress: progress_percent(self.run_processed, self.run_total_to_process),
            errors,
            batch_progress: self.batch_progress(),
            pre_sync_existing_count: self.pre_sync_existing_ids.as_ref().map(|ids| ids.0.len()),
        })
    }

    pub fn view(&self, errors: Vec<RunErrorEntry>) -> SyncStateView {
        SyncStateView {
            store_id: self.store_id.clone(),
            sync_type: self.sync_type,
            is_in_progress: self.is_in_progress,
            last_synced_at: self.last_synced_at,
            last_sync_error: self.last_sync_error.clone(),
            total_syncs: self.total_syncs,
            total_processed: self.total_processed,
            total_created: self.total_created,
            total_updated: self.total_updated,
            total_deleted: self.total_deleted,
            current_run: self.current_run(errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped_and_safe_on_zero() {
        assert_eq!(progress_percent(0, 0), 0.0);
        assert_eq!(progress_percent(5, 10), 50.0);
        assert_eq!(progress_percent(12, 10), 100.0);
    }

    #[test]
    fn batch_progress_terminal_when_all_accounted_for() {
        let mut progress = BatchProgress {
            total: 3,
            completed: 2,
            failed: 0,
            pending: 1,
            batch_ids: vec![],
        };
        assert!(!progress.is_terminal());
        progress.failed = 1;
        progress.pending = 0;
        assert!(progress.is_terminal());
    }
}
