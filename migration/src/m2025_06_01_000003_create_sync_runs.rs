//! Migration to create the sync_runs and sync_run_errors tables.
//!
//! sync_runs keeps one row per execution for history and operator views. sync_run_errors is
//! the append-only per-run error ledger written by the orchestrator and batch workers.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncRuns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncRuns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncRuns::StateId).uuid().not_null())
                    .col(ColumnDef::new(SyncRuns::StoreId).text().not_null())
                    .col(ColumnDef::new(SyncRuns::SyncType).text().not_null())
                    .col(ColumnDef::new(SyncRuns::Mode).text().not_null())
                    .col(ColumnDef::new(SyncRuns::Dispatch).text().not_null())
                    .col(
                        ColumnDef::new(SyncRuns::Status)
                            .text()
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::Processed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::Created)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::Updated)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::Deleted)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::Failed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::BatchTotal)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::BatchFailed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncRuns::Error).text().null())
                    .col(
                        ColumnDef::new(SyncRuns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_runs_store_started")
                    .table(SyncRuns::Table)
                    .col(SyncRuns::StoreId)
                    .col(SyncRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SyncRunErrors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncRunErrors::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncRunErrors::RunId).uuid().not_null())
                    .col(ColumnDef::new(SyncRunErrors::ItemId).text().null())
                    .col(ColumnDef::new(SyncRunErrors::BatchId).uuid().null())
                    .col(ColumnDef::new(SyncRunErrors::Error).text().not_null())
                    .col(
                        ColumnDef::new(SyncRunErrors::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_run_errors_run_id")
                            .from(SyncRunErrors::Table, SyncRunErrors::RunId)
                            .to(SyncRuns::Table, SyncRuns::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_sync_run_errors_run_item")
                    .table(SyncRunErrors::Table)
                    .col(SyncRunErrors::RunId)
                    .col(SyncRunErrors::ItemId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uq_sync_run_errors_run_item").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SyncRunErrors::Table).to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_sync_runs_store_started").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SyncRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncRuns {
    Table,
    Id,
    StateId,
    StoreId,
    SyncType,
    Mode,
    Dispatch,
    Status,
    StartedAt,
    FinishedAt,
    Processed,
    Created,
    Updated,
    Deleted,
    Failed,
    BatchTotal,
    BatchFailed,
    Error,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SyncRunErrors {
    Table,
    Id,
    RunId,
    ItemId,
    BatchId,
    Error,
    CreatedAt,
}
