//! Migration to create the items table.
//!
//! Items are the mirrored catalog documents, keyed by `(store_id, item_id)`, together with
//! the bookkeeping the sync loop needs for create/update/delete reconciliation.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Items::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Items::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Items::StoreId).text().not_null())
                    .col(ColumnDef::new(Items::ItemId).text().not_null())
                    .col(ColumnDef::new(Items::Title).text().not_null())
                    .col(ColumnDef::new(Items::Description).text().null())
                    .col(ColumnDef::new(Items::Handle).text().null())
                    .col(ColumnDef::new(Items::Category).text().null())
                    .col(ColumnDef::new(Items::Vendor).text().null())
                    .col(ColumnDef::new(Items::Tags).json_binary().not_null())
                    .col(ColumnDef::new(Items::Variants).json_binary().not_null())
                    .col(
                        ColumnDef::new(Items::SourceCreatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Items::SourceUpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Items::LocalCreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Items::LocalUpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Items::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Items::LastAction)
                            .text()
                            .not_null()
                            .default("ADDED"),
                    )
                    .col(
                        ColumnDef::new(Items::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Items::LastModifiedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Items::Cursor).text().null())
                    .to_owned(),
            )
            .await?;

        // The atomic upsert relies on this constraint as its conflict target
        manager
            .create_index(
                Index::create()
                    .name("uq_items_store_item")
                    .table(Items::Table)
                    .col(Items::StoreId)
                    .col(Items::ItemId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_items_store_deleted_at")
                    .table(Items::Table)
                    .col(Items::StoreId)
                    .col(Items::DeletedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_items_store_deleted_at").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("uq_items_store_item").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Items::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Items {
    Table,
    Id,
    StoreId,
    ItemId,
    Title,
    Description,
    Handle,
    Category,
    Vendor,
    Tags,
    Variants,
    SourceCreatedAt,
    SourceUpdatedAt,
    LocalCreatedAt,
    LocalUpdatedAt,
    DeletedAt,
    LastAction,
    FirstSeenAt,
    LastModifiedAt,
    Cursor,
}
