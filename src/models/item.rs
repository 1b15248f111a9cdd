//! # Item Model
//!
//! Mirrored catalog items keyed by `(store_id, item_id)`, together with the sync metadata
//! used for create/update/delete reconciliation.

use std::collections::BTreeSet;

use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, FromJsonQueryResult};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub store_id: String,

    /// Upstream identifier, unique per store
    pub item_id: String,

    pub title: String,
    pub description: Option<String>,
    pub handle: Option<String>,
    pub category: Option<String>,
    pub vendor: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub tags: Tags,

    #[sea_orm(column_type = "JsonBinary")]
    pub variants: Variants,

    pub source_created_at: Option<DateTimeWithTimeZone>,
    pub source_updated_at: Option<DateTimeWithTimeZone>,
    pub local_created_at: DateTimeWithTimeZone,
    pub local_updated_at: DateTimeWithTimeZone,

    /// Set when a full sync no longer enumerates the item
    pub deleted_at: Option<DateTimeWithTimeZone>,

    pub last_action: LastAction,

    /// Never rewritten after the first insert
    pub first_seen_at: DateTimeWithTimeZone,

    pub last_modified_at: DateTimeWithTimeZone,

    /// Run id that last touched the item
    pub cursor: Option<String>,
}

/// Tag set; ordered so stored documents compare stably across syncs
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema,
)]
pub struct Tags(pub BTreeSet<String>);

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema,
)]
pub struct Variants(pub Vec<Variant>);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Variant {
    pub variant_id: String,
    /// Decimal price as sent upstream, kept as text to avoid float rounding
    pub price: String,
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_at_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_qty: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_item_id: Option<String>,
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
pub enum LastAction {
    #[sea_orm(string_value = "ADDED")]
    #[serde(rename = "ADDED")]
    #[default]
    Added,

    #[sea_orm(string_value = "UPDATED")]
    #[serde(rename = "UPDATED")]
    Updated,

    #[sea_orm(string_value = "DELETED")]
    #[serde(rename = "DELETED")]
    Deleted,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Public representation of a mirrored item
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ItemResponse {
    pub store_id: String,
    pub item_id: String,
    pub title: String,
    pub description: Option<String>,
    pub handle: Option<String>,
    pub category: Option<String>,
    pub vendor: Option<String>,
    pub tags: Vec<String>,
    pub variants: Vec<Variant>,
    #[schema(value_type = Option<String>, example = "2025-01-01T12:00:00Z")]
    pub source_created_at: Option<DateTimeWithTimeZone>,
    #[schema(value_type = Option<String>, example = "2025-01-01T12:00:00Z")]
    pub source_updated_at: Option<DateTimeWithTimeZone>,
    #[schema(value_type = String, example = "2025-01-01T12:00:00Z")]
    pub first_seen_at: DateTimeWithTimeZone,
    #[schema(value_type = String, example = "2025-01-01T12:00:00Z")]
    pub last_modified_at: DateTimeWithTimeZone,
    #[schema(value_type = Option<String>, example = "2025-01-01T12:00:00Z")]
    pub deleted_at: Option<DateTimeWithTimeZone>,
    pub last_action: LastAction,
}

impl From<Model> for ItemResponse {
    fn from(model: Model) -> Self {
        Self {
            store_id: model.store_id,
            item_id: model.item_id,
            title: model.title,
            description: model.description,
            handle: model.handle,
            category: model.category,
            vendor: model.vendor,
            tags: model.tags.0.into_iter().collect(),
            variants: model.variants.0,
            source_created_at: model.source_created_at,
            source_updated_at: model.source_updated_at,
            first_seen_at: model.first_seen_at,
            last_modified_at: model.last_modified_at,
            deleted_at: model.deleted_at,
            last_action: model.last_action,
        }
    }
}
