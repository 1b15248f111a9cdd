//! # Item Repository
//!
//! Storage operations for mirrored catalog items. Writes go through an atomic
//! insert-or-update keyed on `(store_id, item_id)` so concurrent batch workers can never
//! produce duplicate documents.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::item::{self, ActiveModel, Column, Entity, LastAction, Model, Tags, Variants};

/// Soft deletes are issued in chunks so the IN list stays well under driver parameter limits
const DELETE_CHUNK_SIZE: usize = 500;

/// Transformed item ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub store_id: String,
    pub item_id: String,
    pub title: String,
    pub description: Option<String>,
    pub handle: Option<String>,
    pub category: Option<String>,
    pub vendor: Option<String>,
    pub tags: Tags,
    pub variants: Variants,
    pub source_created_at: Option<DateTimeWithTimeZone>,
    pub source_updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// The live row was already written by this run; nothing changed
    AlreadyApplied,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ItemStats {
    pub total: u64,
    pub active: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone)]
pub struct ItemRepository {
    db: DatabaseConnection,
}

impl ItemRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert the item, or update it in place if `(store_id, item_id)` already exists.
    ///
    /// `first_seen_at` and `local_created_at` are only written by the insert branch, and an
    /// update always clears `deleted_at` so a reappearing item is live again.
    ///
    /// `cursor` holds the id of the run that last wrote the row. A second write of a live row
    /// by the same run is reported as [`UpsertOutcome::AlreadyApplied`], which keeps run
    /// counters exact when a batch is delivered more than once.
    pub async fn upsert(&self, record: &ItemRecord, run_id: Uuid) -> Result<UpsertOutcome, DbErr> {
        let now = Utc::now().fixed_offset();
        let cursor = Some(run_id.to_string());

        let fresh = ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(record.store_id.clone()),
            item_id: Set(record.item_id.clone()),
            title: Set(record.title.clone()),
            description: Set(record.description.clone()),
            handle: Set(record.handle.clone()),
            category: Set(record.category.clone()),
            vendor: Set(record.vendor.clone()),
            tags: Set(record.tags.clone()),
            variants: Set(record.variants.clone()),
            source_created_at: Set(record.source_created_at),
            source_updated_at: Set(record.source_updated_at),
            local_created_at: Set(now),
            local_updated_at: Set(now),
            deleted_at: Set(None),
            last_action: Set(LastAction::Added),
            first_seen_at: Set(now),
            last_modified_at: Set(now),
            cursor: Set(cursor.clone()),
        };

        let inserted = Entity::insert(fresh)
            .on_conflict(
                OnConflict::columns([Column::StoreId, Column::ItemId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        if inserted > 0 {
            return Ok(UpsertOutcome::Created);
        }

        let changes = ActiveModel {
            title: Set(record.title.clone()),
            description: Set(record.description.clone()),
            handle: Set(record.handle.clone()),
            category: Set(record.category.clone()),
            vendor: Set(record.vendor.clone()),
            tags: Set(record.tags.clone()),
            variants: Set(record.variants.clone()),
            source_created_at: Set(record.source_created_at),
            source_updated_at: Set(record.source_updated_at),
            local_updated_at: Set(now),
            deleted_at: Set(None),
            last_action: Set(LastAction::Updated),
            last_modified_at: Set(now),
            cursor: Set(cursor),
            ..Default::default()
        };

        let run_cursor = run_id.to_string();
        let updated = Entity::update_many()
            .set(changes)
            .filter(Column::StoreId.eq(record.store_id.as_str()))
            .filter(Column::ItemId.eq(record.item_id.as_str()))
            .filter(
                Condition::any()
                    .add(Column::Cursor.is_null())
                    .add(Column::Cursor.ne(run_cursor.as_str()))
                    .add(Column::DeletedAt.is_not_null()),
            )
            .exec(&self.db)
            .await?;

        if updated.rows_affected > 0 {
            return Ok(UpsertOutcome::Updated);
        }

        // Either a redelivered write for this run or a hard delete in between
        match self.find(&record.store_id, &record.item_id).await? {
            Some(_) => Ok(UpsertOutcome::AlreadyApplied),
            None => Err(DbErr::RecordNotUpdated),
        }
    }

    /// Ids of items that are not soft-deleted
    pub async fn active_item_ids(&self, store_id: &str) -> Result<Vec<String>, DbErr> {
        Entity::find()
            .select_only()
            .column(Column::ItemId)
            .filter(Column::StoreId.eq(store_id))
            .filter(Column::DeletedAt.is_null())
            .order_by_asc(Column::ItemId)
            .into_tuple::<String>()
            .all(&self.db)
            .await
    }

    /// Soft-delete the given ids; already deleted items are left untouched
    pub async fn soft_delete(
        &self,
        store_id: &str,
        item_ids: &[String],
        run_id: Option<Uuid>,
    ) -> Result<u64, DbErr> {
        let now = Utc::now().fixed_offset();
        let mut affected = 0;

        for chunk in item_ids.chunks(DELETE_CHUNK_SIZE) {
            let mut changes = ActiveModel {
                deleted_at: Set(Some(now)),
                last_action: Set(LastAction::Deleted),
                last_modified_at: Set(now),
                local_updated_at: Set(now),
                ..Default::default()
            };
            if let Some(run_id) = run_id {
                changes.cursor = Set(Some(run_id.to_string()));
            }

            let result = Entity::update_many()
                .set(changes)
                .filter(Column::StoreId.eq(store_id))
                .filter(Column::ItemId.is_in(chunk.iter().map(String::as_str)))
                .filter(Column::DeletedAt.is_null())
                .exec(&self.db)
                .await?;
            affected += result.rows_affected;
        }

        Ok(affected)
    }

    /// Hard-delete items soft-deleted before `cutoff`
    pub async fn purge_deleted_before(
        &self,
        store_id: &str,
        cutoff: DateTimeWithTimeZone,
    ) -> Result<u64, DbErr> {
        let result = Entity::delete_many()
            .filter(Column::StoreId.eq(store_id))
            .filter(Column::DeletedAt.is_not_null())
            .filter(Column::DeletedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn find(&self, store_id: &str, item_id: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::StoreId.eq(store_id))
            .filter(Column::ItemId.eq(item_id))
            .one(&self.db)
            .await
    }

    /// Page through a store's items, returning the page and the total matching count
    pub async fn list(
        &self,
        store_id: &str,
        include_deleted: bool,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Model>, u64), DbErr> {
        let mut query = Entity::find().filter(Column::StoreId.eq(store_id));
        if !include_deleted {
            query = query.filter(Column::DeletedAt.is_null());
        }

        let total = query.clone().count(&self.db).await?;
        let items = query
            .order_by_asc(Column::ItemId)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?;

        Ok((items, total))
    }

    /// Delete one item; returns false when nothing matched
    pub async fn delete(&self, store_id: &str, item_id: &str, hard: bool) -> Result<bool, DbErr> {
        if hard {
            let result = Entity::delete_many()
                .filter(Column::StoreId.eq(store_id))
                .filter(Column::ItemId.eq(item_id))
                .exec(&self.db)
                .await?;
            return Ok(result.rows_affected > 0);
        }

        let affected = self
            .soft_delete(store_id, &[item_id.to_string()], None)
            .await?;
        Ok(affected > 0)
    }

    pub async fn stats(&self, store_id: &str) -> Result<ItemStats, DbErr> {
        let total = Entity::find()
            .filter(Column::StoreId.eq(store_id))
            .count(&self.db)
            .await?;
        let deleted = Entity::find()
            .filter(Column::StoreId.eq(store_id))
            .filter(item::Column::DeletedAt.is_not_null())
            .count(&self.db)
            .await?;

        Ok(ItemStats {
            total,
            active: total.saturating_sub(deleted),
            deleted,
        })
    }
}
