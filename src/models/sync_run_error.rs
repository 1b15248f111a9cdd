//! Append-only error ledger for sync runs.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sync_state::RunErrorEntry;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_run_errors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub run_id: Uuid,
    /// Set for per-item failures
    pub item_id: Option<String>,
    /// Set for batch-level failures
    pub batch_id: Option<Uuid>,
    pub error: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_run::Entity",
        from = "Column::RunId",
        to = "super::sync_run::Column::Id"
    )]
    Run,
}

impl Related<super::sync_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for RunErrorEntry {
    fn from(model: Model) -> Self {
        Self {
            item_id: model.item_id,
            batch_id: model.batch_id,
            error: model.error,
        }
    }
}
